//! In-memory doubles for the remote element source and the external geocoder.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;

use crate::error::SyncError;
use crate::geocode::{Geocoder, Placemark};
use crate::models::{Coordinate, Element};
use crate::store::{FetchQuery, RemoteSource};

#[derive(Default)]
struct RemoteState {
    responses: VecDeque<Result<Vec<Element>, SyncError>>,
    queries: Vec<FetchQuery>,
}

/// Replays queued responses in order; an empty queue answers with no records.
#[derive(Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: Result<Vec<Element>, SyncError>) {
        self.state.lock().unwrap().responses.push_back(response);
    }

    pub fn queries(&self) -> Vec<FetchQuery> {
        self.state.lock().unwrap().queries.clone()
    }
}

impl RemoteSource for MockRemote {
    fn fetch(
        &self,
        query: &FetchQuery,
    ) -> impl Future<Output = Result<Vec<Element>, SyncError>> + Send {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.queries.push(query.clone());
            state.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        };
        async move { response }
    }
}

#[derive(Default)]
struct GeocoderState {
    calls: Mutex<Vec<Coordinate>>,
    unknown: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Answers every lookup after a short delay, tracking concurrency.
#[derive(Clone, Default)]
pub struct MockGeocoder {
    state: Arc<GeocoderState>,
}

impl MockGeocoder {
    pub const DELAY: Duration = Duration::from_millis(10);

    pub fn new() -> Self {
        Self::default()
    }

    /// Make lookups for `coordinate` return no placemark
    pub fn forget(&self, coordinate: Coordinate) {
        self.state
            .unknown
            .lock()
            .unwrap()
            .insert(coordinate.cache_key());
    }

    pub fn calls(&self) -> Vec<Coordinate> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// The placemark returned for a known coordinate
    pub fn placemark_for(coordinate: Coordinate) -> Placemark {
        Placemark {
            street_number: Some("1".to_string()),
            street_name: Some(format!("Street {}", coordinate.cache_key())),
            locality: Some("Geocoded City".to_string()),
            postal_code: Some("00000".to_string()),
            administrative_area: None,
            country: Some("Testland".to_string()),
        }
    }
}

impl Geocoder for MockGeocoder {
    fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> impl Future<Output = Result<Option<Placemark>>> + Send {
        let state = Arc::clone(&self.state);

        async move {
            state.calls.lock().unwrap().push(coordinate);
            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Self::DELAY).await;

            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            let unknown = state
                .unknown
                .lock()
                .unwrap()
                .contains(&coordinate.cache_key());
            if unknown {
                Ok(None)
            } else {
                Ok(Some(Self::placemark_for(coordinate)))
            }
        }
    }
}
