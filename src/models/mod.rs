//! Core data models for the location directory.

pub mod address;
pub mod element;
pub mod viewport;
pub mod watermark;

pub use address::Address;
pub use element::{Coordinate, Element, PaymentMethods};
pub use viewport::{MapPoint, MapRect, Viewport};
pub use watermark::Watermark;
