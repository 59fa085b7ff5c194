//! Locus - offline-first location directory sync and map viewport engine
//!
//! Keeps a local copy of a remote element feed current through incremental
//! sync, decides which elements a map viewport shows, and resolves their
//! addresses through a bounded reverse geocoder with an LRU cache.

pub mod annotations;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod geocode;
pub mod models;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::EngineConfig;
pub use engine::{Completion, Engine, EngineEvent, EventStream};
pub use error::{GeocodeFailure, NoCoordinateError, SyncError};
pub use models::{Address, Coordinate, Element, Viewport, Watermark};
