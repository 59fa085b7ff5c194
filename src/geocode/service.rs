//! Reverse geocoding with a bounded number of in-flight lookups.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use crate::error::GeocodeFailure;
use crate::models::{Address, Coordinate};

/// Reverse geocoding answer from an external provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placemark {
    pub street_number: Option<String>,
    pub street_name: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
    pub administrative_area: Option<String>,
    pub country: Option<String>,
}

impl From<Placemark> for Address {
    fn from(placemark: Placemark) -> Self {
        Address {
            housenumber: placemark.street_number,
            street: placemark.street_name,
            city: placemark.locality,
            postcode: placemark.postal_code,
            region: placemark.administrative_area,
            country: placemark.country,
        }
    }
}

/// External reverse geocoding capability
pub trait Geocoder: Send + Sync + 'static {
    /// `Ok(None)` when the provider knows no placemark for the coordinate
    fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> impl Future<Output = Result<Option<Placemark>>> + Send;
}

struct LookupRequest {
    coordinate: Coordinate,
    reply: oneshot::Sender<Option<Address>>,
}

/// Front for a [`Geocoder`] that never lets more than `max_concurrent` calls
/// run at once.
///
/// Requests go through a single worker task which takes a semaphore permit per
/// request before starting it, so queued requests start in arrival order.
#[derive(Clone)]
pub struct GeocodingService {
    requests: mpsc::UnboundedSender<LookupRequest>,
    max_concurrent: usize,
}

impl GeocodingService {
    /// Start the worker for `geocoder`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<G: Geocoder>(geocoder: G, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (requests, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            Arc::new(geocoder),
            Arc::new(Semaphore::new(max_concurrent)),
            receiver,
        ));

        Self {
            requests,
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Resolve a coordinate to an address
    pub async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<Address, GeocodeFailure> {
        let failure = || GeocodeFailure {
            key: coordinate.cache_key(),
        };

        let (reply, response) = oneshot::channel();
        self.requests
            .send(LookupRequest { coordinate, reply })
            .map_err(|_| failure())?;

        match response.await {
            Ok(Some(address)) => Ok(address),
            _ => Err(failure()),
        }
    }
}

async fn run_worker<G: Geocoder>(
    geocoder: Arc<G>,
    permits: Arc<Semaphore>,
    mut requests: mpsc::UnboundedReceiver<LookupRequest>,
) {
    while let Some(request) = requests.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let geocoder = Arc::clone(&geocoder);

        tokio::spawn(async move {
            let _permit = permit;
            let key = request.coordinate.cache_key();
            let address = match geocoder.reverse_geocode(request.coordinate).await {
                Ok(Some(placemark)) => Some(Address::from(placemark)),
                Ok(None) => {
                    debug!("No placemark for {}", key);
                    None
                }
                Err(e) => {
                    warn!("Reverse geocoding {} failed: {:#}", key, e);
                    None
                }
            };
            // The caller may have stopped waiting.
            let _ = request.reply.send(address);
        });
    }

    debug!("Geocoding worker stopped");
}
