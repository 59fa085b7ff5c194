//! Owner context tying the store, the geocoder and the map annotations together.
//!
//! Fetches, lookups and timers run on worker tasks and post a [`Completion`]
//! to the engine inbox. Only [`Engine::handle`] mutates state, so every
//! mutation happens on whichever task drives the engine.

use std::collections::HashMap;
use std::fs;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::annotations::{resolve_symbol, Delta, ViewportAnnotationManager};
use crate::config::EngineConfig;
use crate::debounce::{Fired, RegionChangeDebouncer};
use crate::error::{GeocodeFailure, SyncError};
use crate::geocode::{AddressCache, Geocoder, GeocodingService};
use crate::models::{Address, Coordinate, Viewport, Watermark};
use crate::store::{ElementStore, FetchResult, RemoteSource, Settings, SnapshotFile};

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A sync merged; `count` is the size of the whole collection
    SnapshotUpdated { count: usize, watermark: Watermark },
    Delta(Delta),
    /// Better address for a visible element than the one handed out before
    AddressResolved { id: String, address: Address },
    SyncFailed { error: SyncError },
}

/// Stream of [`EngineEvent`]s, in the order the engine produced them
pub struct EventStream {
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Stream for EventStream {
    type Item = EngineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// Work finished off the owner task
pub enum Completion {
    Synced(FetchResult),
    RecomputeDue(Fired),
    Geocoded {
        key: String,
        result: Result<Address, GeocodeFailure>,
    },
}

impl From<Fired> for Completion {
    fn from(fired: Fired) -> Self {
        Completion::RecomputeDue(fired)
    }
}

/// Exponential backoff between automatic sync attempts
#[derive(Debug)]
struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
    next_attempt: Option<Instant>,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
            next_attempt: None,
        }
    }

    /// `base * 2^(failures - 1)`, capped at `max`
    fn delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(self.failures - 1);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.delay();
        self.next_attempt = Some(now + delay);
        delay
    }

    fn record_success(&mut self) {
        self.failures = 0;
        self.next_attempt = None;
    }

    /// Time left before an automatic attempt is allowed
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.next_attempt
            .filter(|at| *at > now)
            .map(|at| at - now)
    }
}

pub struct Engine<R> {
    store: ElementStore<R>,
    settings: Settings,
    geocoder: GeocodingService,
    addresses: AddressCache,
    annotations: ViewportAnnotationManager,
    debouncer: RegionChangeDebouncer<Completion>,
    /// Element ids waiting on each cache key being geocoded
    geocoding: HashMap<String, Vec<String>>,
    backoff: Backoff,
    completions: mpsc::UnboundedSender<Completion>,
    inbox: mpsc::UnboundedReceiver<Completion>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl<R: RemoteSource> Engine<R> {
    /// Open persisted state under the configured data directory.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open<G: Geocoder>(config: &EngineConfig, remote: R, geocoder: G) -> Result<(Self, EventStream)> {
        fs::create_dir_all(&config.cache.data_dir).with_context(|| {
            format!("Failed to create data directory {}", config.cache.data_dir.display())
        })?;
        let settings = Settings::open(config.settings_path())?;
        let snapshot = SnapshotFile::new(config.snapshot_path());

        Ok(Self::with_storage(config, remote, geocoder, snapshot, settings))
    }

    /// Build an engine over explicit storage handles.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_storage<G: Geocoder>(
        config: &EngineConfig,
        remote: R,
        geocoder: G,
        snapshot: SnapshotFile,
        settings: Settings,
    ) -> (Self, EventStream) {
        let store = ElementStore::open(
            Arc::new(remote),
            snapshot,
            settings.clone(),
            &config.app_version,
        );

        let mut addresses = AddressCache::new(config.cache.address_capacity);
        addresses.set_values(settings.address_cache());
        debug!("Restored {} cached addresses", addresses.len());

        let (completions, inbox) = mpsc::unbounded_channel();
        let (events, receiver) = mpsc::unbounded_channel();

        let engine = Self {
            store,
            settings,
            geocoder: GeocodingService::new(geocoder, config.geocoding.max_concurrent),
            addresses,
            annotations: ViewportAnnotationManager::new(config.viewport.cutoff_miles),
            debouncer: RegionChangeDebouncer::new(config.debounce_interval(), completions.clone()),
            geocoding: HashMap::new(),
            backoff: Backoff::new(config.backoff_base(), config.backoff_max()),
            completions,
            inbox,
            events,
        };

        (engine, EventStream { events: receiver })
    }

    /// User-triggered sync; always attempts unless one is already in flight.
    ///
    /// Returns whether a fetch was issued.
    pub fn request_sync(&mut self) -> bool {
        let Some(ticket) = self.store.begin_sync() else {
            return false;
        };

        info!("Syncing elements ({:?})", ticket.query());
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let fetched = ticket.run().await;
            let _ = completions.send(Completion::Synced(fetched));
        });
        true
    }

    /// Lifecycle-triggered sync, held back while failures are backing off
    pub fn on_foreground(&mut self) -> bool {
        if let Some(remaining) = self.backoff.remaining(Instant::now()) {
            debug!(
                "Skipping foreground sync after {} failures, retry in {:?}",
                self.backoff.failures, remaining
            );
            return false;
        }
        self.request_sync()
    }

    pub fn on_viewport_changed(&mut self, viewport: Viewport) {
        self.debouncer.on_viewport_changed(viewport);
    }

    /// Best address known right now for element `id`.
    ///
    /// An incomplete tag address is completed from the cache, or a lookup is
    /// scheduled and its result arrives later as [`EngineEvent::AddressResolved`].
    pub fn resolve_address(&mut self, id: &str) -> Option<Address> {
        let element = self.store.get(id)?;
        let preferred = element.address.clone();
        if preferred.as_ref().is_some_and(Address::is_complete) {
            return preferred;
        }

        let Ok(coordinate) = element.require_coordinate() else {
            return preferred;
        };
        let key = coordinate.cache_key();

        if let Some(cached) = self.addresses.get(&key) {
            return Some(combine(preferred.as_ref(), cached));
        }

        self.schedule_geocode(id, key, coordinate);
        preferred
    }

    fn schedule_geocode(&mut self, id: &str, key: String, coordinate: Coordinate) {
        let waiting = self.geocoding.entry(key.clone()).or_default();
        let first = waiting.is_empty();
        if !waiting.iter().any(|w| w == id) {
            waiting.push(id.to_string());
        }
        if !first {
            debug!("Geocoding of {} already in flight", key);
            return;
        }

        let service = self.geocoder.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = service.reverse_geocode(coordinate).await;
            let _ = completions.send(Completion::Geocoded { key, result });
        });
    }

    /// Category symbol for element `id`
    pub fn symbol_for(&self, id: &str) -> Option<&'static str> {
        self.store.get(id).map(|element| resolve_symbol(&element.tags))
    }

    /// Wait for the next finished piece of background work
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.inbox.recv().await
    }

    /// Apply a completion to the engine state
    pub fn handle(&mut self, completion: Completion) {
        match completion {
            Completion::Synced(fetched) => self.handle_synced(fetched),
            Completion::RecomputeDue(fired) => {
                if let Some(viewport) = self.debouncer.take_if_current(fired) {
                    self.render(&viewport);
                }
            }
            Completion::Geocoded { key, result } => self.handle_geocoded(key, result),
        }
    }

    fn handle_synced(&mut self, fetched: FetchResult) {
        match self.store.complete_sync(fetched) {
            Ok(summary) => {
                self.backoff.record_success();
                self.emit(EngineEvent::SnapshotUpdated {
                    count: self.store.len(),
                    watermark: summary.watermark,
                });
                if let Some(viewport) = self.debouncer.on_data_refreshed() {
                    self.render(&viewport);
                }
            }
            Err(error) => {
                let delay = self.backoff.record_failure(Instant::now());
                warn!(
                    "Sync failed {} time(s) in a row, next automatic attempt in {:?}",
                    self.backoff.failures, delay
                );
                self.emit(EngineEvent::SyncFailed { error });
            }
        }
    }

    fn handle_geocoded(&mut self, key: String, result: Result<Address, GeocodeFailure>) {
        let waiting = self.geocoding.remove(&key).unwrap_or_default();
        let geocoded = match result {
            Ok(address) => address,
            Err(e) => {
                debug!("{}, keeping best known address for {} element(s)", e, waiting.len());
                return;
            }
        };

        if let Some((evicted, _)) = self.addresses.set(key, geocoded.clone()) {
            debug!("Evicted cached address {}", evicted);
        }

        for id in waiting {
            let Some(element) = self.store.get(&id) else {
                continue;
            };
            let address = combine(element.address.as_ref(), &geocoded);
            self.emit(EngineEvent::AddressResolved { id, address });
        }
    }

    fn render(&mut self, viewport: &Viewport) {
        let index = self.store.index();
        let delta = self.annotations.update(&index, viewport);
        if !delta.is_empty() {
            self.emit(EngineEvent::Delta(delta));
        }
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Handle completions as they arrive, for hosts with nothing else to drive
    pub async fn run(mut self) {
        while let Some(completion) = self.next_completion().await {
            self.handle(completion);
        }
    }

    /// Export the address cache and wait for pending snapshot writes
    pub async fn save(&mut self) -> Result<()> {
        self.store.flush().await;
        self.settings
            .set_address_cache(&self.addresses.all_values())
            .context("Failed to save address cache")?;
        self.settings.flush()
    }

    pub fn store(&self) -> &ElementStore<R> {
        &self.store
    }

    pub fn annotations(&self) -> &ViewportAnnotationManager {
        &self.annotations
    }

    pub fn addresses(&self) -> &AddressCache {
        &self.addresses
    }
}

/// Tag-derived fields first, geocoded fields filling the gaps
fn combine(preferred: Option<&Address>, geocoded: &Address) -> Address {
    match preferred {
        Some(address) => address.merged_with(geocoded),
        None => geocoded.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::element::tests::element;
    use crate::models::Element;
    use crate::test_support::{MockGeocoder, MockRemote};
    use futures::StreamExt;

    struct Harness {
        engine: Engine<MockRemote>,
        events: EventStream,
        remote: MockRemote,
        geocoder: MockGeocoder,
        settings: Settings,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let remote = MockRemote::new();
        let geocoder = MockGeocoder::new();
        let settings = Settings::temporary().unwrap();
        let (engine, events) = Engine::with_storage(
            &EngineConfig::default(),
            remote.clone(),
            geocoder.clone(),
            SnapshotFile::new(dir.path().join("elements.json")),
            settings.clone(),
        );
        Harness {
            engine,
            events,
            remote,
            geocoder,
            settings,
            _dir: dir,
        }
    }

    impl Harness {
        async fn pump(&mut self) {
            let completion = self.engine.next_completion().await.unwrap();
            self.engine.handle(completion);
        }

        async fn sync_with(&mut self, batch: Vec<Element>) {
            self.remote.respond(Ok(batch));
            assert!(self.engine.request_sync());
            self.pump().await;
        }

        async fn event(&mut self) -> EngineEvent {
            self.events.next().await.unwrap()
        }
    }

    fn street_only(id: &str, lat: f64, lon: f64) -> Element {
        let mut e = element(id, lat, lon, "2024-01-01T00:00:00Z");
        e.address = Some(Address {
            street: Some("Tag Street".to_string()),
            ..Default::default()
        });
        e
    }

    fn viewport() -> Viewport {
        Viewport::from_region(Coordinate::new(40.0, -75.0).unwrap(), 0.2, 0.2)
    }

    #[tokio::test]
    async fn test_sync_emits_snapshot_update() {
        let mut h = harness();
        h.sync_with(vec![
            element("A", 40.0, -75.0, "2024-01-01T00:00:00Z"),
            element("B", 40.0, -75.0, "2024-01-02T00:00:00Z"),
            element("C", 40.0, -75.0, "2024-01-03T00:00:00Z"),
        ])
        .await;

        assert_eq!(
            h.event().await,
            EngineEvent::SnapshotUpdated {
                count: 3,
                watermark: Watermark::new("2024-01-03T00:00:00Z"),
            }
        );
        assert!(!h.engine.store().is_syncing());
    }

    #[tokio::test]
    async fn test_second_request_while_in_flight_is_ignored() {
        let mut h = harness();
        assert!(h.engine.request_sync());
        assert!(!h.engine.request_sync());
        h.pump().await;
        assert_eq!(h.remote.queries().len(), 1);
        assert!(h.engine.request_sync());
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_change_renders_after_quiet_interval() {
        let mut h = harness();
        h.sync_with(vec![
            element("a", 40.0, -75.0, "2024-01-01T00:00:00Z"),
            element("b", 40.01, -75.01, "2024-01-01T00:00:00Z"),
        ])
        .await;
        h.event().await;

        h.engine.on_viewport_changed(viewport());
        h.pump().await;

        let EngineEvent::Delta(delta) = h.event().await else {
            panic!("expected a delta");
        };
        let ids: Vec<&str> = delta.additions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(h.engine.annotations().rendered().len(), 2);

        // New data re-renders at once without a second quiet interval.
        h.sync_with(vec![element("c", 40.02, -75.0, "2024-01-05T00:00:00Z")])
            .await;
        assert!(matches!(h.event().await, EngineEvent::SnapshotUpdated { count: 3, .. }));
        let EngineEvent::Delta(delta) = h.event().await else {
            panic!("expected a delta");
        };
        assert_eq!(delta.additions.len(), 1);
        assert!(delta.removals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sync_backs_off_foreground_attempts() {
        let mut h = harness();
        h.remote.respond(Err(SyncError::Network("unreachable".to_string())));
        assert!(h.engine.on_foreground());
        h.pump().await;
        assert!(matches!(h.event().await, EngineEvent::SyncFailed { .. }));

        assert!(!h.engine.on_foreground());
        tokio::time::advance(Duration::from_secs(31)).await;

        h.remote.respond(Err(SyncError::Status { status: 503 }));
        assert!(h.engine.on_foreground());
        h.pump().await;
        h.event().await;

        // Second failure doubles the wait.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!h.engine.on_foreground());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(h.engine.on_foreground());
        h.pump().await;
        assert!(matches!(h.event().await, EngineEvent::SnapshotUpdated { .. }));
        assert_eq!(h.engine.backoff.failures, 0);
    }

    #[tokio::test]
    async fn test_user_sync_ignores_backoff() {
        let mut h = harness();
        h.remote.respond(Err(SyncError::Decode("bad body".to_string())));
        assert!(h.engine.request_sync());
        h.pump().await;
        assert!(!h.engine.on_foreground());
        assert!(h.engine.request_sync());
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(100));
        let now = Instant::now();
        assert_eq!(backoff.record_failure(now), Duration::from_secs(30));
        assert_eq!(backoff.record_failure(now), Duration::from_secs(60));
        assert_eq!(backoff.record_failure(now), Duration::from_secs(100));
        assert_eq!(backoff.record_failure(now), Duration::from_secs(100));
        backoff.record_success();
        assert_eq!(backoff.remaining(now), None);
    }

    #[tokio::test]
    async fn test_incomplete_address_is_geocoded_once_per_key() {
        let mut h = harness();
        h.sync_with(vec![street_only("x", 40.0, -75.0), street_only("y", 40.0, -75.0)])
            .await;
        h.event().await;

        let partial = h.engine.resolve_address("x").unwrap();
        assert_eq!(partial.street.as_deref(), Some("Tag Street"));
        h.engine.resolve_address("y");
        h.engine.resolve_address("x");

        h.pump().await;
        assert_eq!(h.geocoder.calls().len(), 1);

        let mut resolved = Vec::new();
        for _ in 0..2 {
            let EngineEvent::AddressResolved { id, address } = h.event().await else {
                panic!("expected an address");
            };
            assert_eq!(address.street.as_deref(), Some("Tag Street"));
            assert_eq!(address.housenumber.as_deref(), Some("1"));
            assert_eq!(address.city.as_deref(), Some("Geocoded City"));
            resolved.push(id);
        }
        assert_eq!(resolved, vec!["x", "y"]);

        // Cached now; no second lookup.
        let cached = h.engine.resolve_address("y").unwrap();
        assert_eq!(cached.city.as_deref(), Some("Geocoded City"));
        assert_eq!(h.geocoder.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_address_skips_geocoding() {
        let mut h = harness();
        let mut e = element("full", 40.0, -75.0, "2024-01-01T00:00:00Z");
        e.address = Some(Address {
            housenumber: Some("5".to_string()),
            street: Some("Main St".to_string()),
            city: Some("Springfield".to_string()),
            ..Default::default()
        });
        h.sync_with(vec![e]).await;

        let address = h.engine.resolve_address("full").unwrap();
        assert_eq!(address.city.as_deref(), Some("Springfield"));
        assert!(h.geocoder.calls().is_empty());
        assert_eq!(h.engine.resolve_address("missing"), None);
    }

    #[tokio::test]
    async fn test_geocode_failure_keeps_partial_address() {
        let mut h = harness();
        let e = street_only("x", 40.0, -75.0);
        h.geocoder.forget(e.coordinate.unwrap());
        h.sync_with(vec![e]).await;
        h.event().await;

        h.engine.resolve_address("x");
        h.pump().await;
        assert!(h.engine.addresses().is_empty());

        let again = h.engine.resolve_address("x").unwrap();
        assert_eq!(again.street.as_deref(), Some("Tag Street"));
        assert!(again.city.is_none());
    }

    #[tokio::test]
    async fn test_save_exports_address_cache() {
        let mut h = harness();
        h.sync_with(vec![street_only("x", 40.0, -75.0)]).await;
        h.engine.resolve_address("x");
        h.pump().await;

        h.engine.save().await.unwrap();
        let exported = h.settings.address_cache();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].0, Coordinate::new(40.0, -75.0).unwrap().cache_key());
    }

    #[tokio::test]
    async fn test_symbol_for_element() {
        let mut h = harness();
        let mut e = element("atm", 40.0, -75.0, "2024-01-01T00:00:00Z");
        e.tags.insert("amenity".to_string(), "atm".to_string());
        h.sync_with(vec![e]).await;

        assert_eq!(h.engine.symbol_for("atm"), Some("local_atm"));
        assert_eq!(h.engine.symbol_for("nope"), None);
    }
}
