//! Address resolution: bounded reverse geocoding and the LRU address cache.

mod cache;
mod nominatim;
mod service;

pub use cache::{AddressCache, LruCache};
pub use nominatim::{NominatimGeocoder, DEFAULT_NOMINATIM_URL};
pub use service::{Geocoder, GeocodingService, Placemark};
