//! Authoritative element collection kept current by incremental sync.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{FetchQuery, RemoteSource, Settings, SnapshotFile, SpatialIndex};
use crate::error::SyncError;
use crate::models::{Element, Watermark};

/// Result of applying one batch
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    /// Records in the batch
    pub received: usize,
    /// Records inserted or replaced
    pub applied: usize,
    /// Records older than the stored version, ignored
    pub stale: usize,
    /// Watermark after the merge
    pub watermark: Watermark,
}

/// Outcome of [`ElementStore::sync`]
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Merged(MergeSummary),
    /// Another sync was pending; nothing was issued
    AlreadyInFlight,
}

/// Permission to run one fetch, handed out while no other fetch is pending
pub struct SyncTicket<R> {
    remote: Arc<R>,
    query: FetchQuery,
}

/// Fetch result carried back to the owner of the store
pub struct FetchResult {
    pub query: FetchQuery,
    pub result: Result<Vec<Element>, SyncError>,
}

impl<R: RemoteSource> SyncTicket<R> {
    pub fn query(&self) -> &FetchQuery {
        &self.query
    }

    /// Run the fetch. Safe to spawn on a worker task.
    pub async fn run(self) -> FetchResult {
        let result = self.remote.fetch(&self.query).await;
        FetchResult {
            query: self.query,
            result,
        }
    }
}

/// Element collection, its watermark and their persisted copies
pub struct ElementStore<R> {
    remote: Arc<R>,
    elements: BTreeMap<String, Arc<Element>>,
    watermark: Watermark,
    index: Arc<SpatialIndex>,
    snapshot: SnapshotFile,
    settings: Settings,
    in_flight: bool,
    pending_write: Option<JoinHandle<()>>,
    /// Bumped by `invalidate`. Writers hold the lock while writing and skip
    /// writes scheduled under an older generation.
    persist_generation: Arc<Mutex<u64>>,
}

impl<R: RemoteSource> ElementStore<R> {
    /// Open the store, invalidating persisted state when the application
    /// version changed, then hydrating from the snapshot.
    pub fn open(remote: Arc<R>, snapshot: SnapshotFile, settings: Settings, app_version: &str) -> Self {
        let mut store = Self {
            remote,
            elements: BTreeMap::new(),
            watermark: Watermark::epoch(),
            index: Arc::new(SpatialIndex::default()),
            snapshot,
            settings,
            in_flight: false,
            pending_write: None,
            persist_generation: Arc::new(Mutex::new(0)),
        };

        let known_version = store.settings.app_version();
        if known_version.as_deref() != Some(app_version) {
            info!(
                "Application version changed ({} -> {}), invalidating element cache",
                known_version.as_deref().unwrap_or("none"),
                app_version
            );
            store.invalidate();
            if let Err(e) = store.settings.set_app_version(app_version) {
                error!("Failed to record application version: {:#}", e);
            }
        }

        store.hydrate();
        store
    }

    fn hydrate(&mut self) {
        let Some(elements) = self.snapshot.read() else {
            // Without a snapshot the stored watermark would skip records we no longer have.
            self.watermark = Watermark::epoch();
            return;
        };

        self.elements = elements
            .into_iter()
            .map(|element| (element.id.clone(), Arc::new(element)))
            .collect();
        self.watermark = self.settings.watermark().unwrap_or_default();
        self.rebuild_index();

        info!(
            "Loaded {} elements from snapshot (watermark {})",
            self.elements.len(),
            self.watermark
        );
    }

    /// Read the persisted snapshot; absent or corrupt files yield an empty collection
    pub fn load(&self) -> Vec<Element> {
        self.snapshot.load()
    }

    /// Drop every persisted and in-memory record; the next sync is a full resync.
    pub fn invalidate(&mut self) {
        self.elements.clear();
        self.watermark = Watermark::epoch();
        self.rebuild_index();

        if let Some(pending) = self.pending_write.take() {
            pending.abort();
        }

        // Waits out a write already in progress; later ones see the new generation.
        let generation = Arc::clone(&self.persist_generation);
        let mut current = generation.lock().unwrap_or_else(PoisonError::into_inner);
        *current += 1;

        if let Err(e) = self.snapshot.remove() {
            error!("Failed to clear snapshot: {:#}", e);
        }
        if let Err(e) = self.settings.clear_watermark() {
            error!("Failed to clear watermark: {:#}", e);
        }
    }

    /// Claim the in-flight slot for an incremental fetch from the current watermark
    pub fn begin_sync(&mut self) -> Option<SyncTicket<R>> {
        self.begin(FetchQuery::UpdatedSince(self.watermark.clone()))
    }

    /// Claim the in-flight slot for a region-bounded fetch
    pub fn begin_region_sync(&mut self, bbox: [f64; 4]) -> Option<SyncTicket<R>> {
        self.begin(FetchQuery::BoundingBox(bbox))
    }

    fn begin(&mut self, query: FetchQuery) -> Option<SyncTicket<R>> {
        if self.in_flight {
            debug!("Sync already in flight, ignoring request");
            return None;
        }
        self.in_flight = true;
        Some(SyncTicket {
            remote: Arc::clone(&self.remote),
            query,
        })
    }

    /// Release the in-flight slot and merge a successful fetch.
    ///
    /// Failures leave the collection and watermark untouched.
    pub fn complete_sync(&mut self, fetched: FetchResult) -> Result<MergeSummary, SyncError> {
        self.in_flight = false;
        match fetched.result {
            Ok(batch) => Ok(self.merge(batch)),
            Err(e) => {
                warn!("Sync failed ({:?}): {}", fetched.query, e);
                Err(e)
            }
        }
    }

    /// Fetch records updated since the watermark and merge them
    pub async fn sync(&mut self) -> Result<SyncOutcome, SyncError> {
        let Some(ticket) = self.begin_sync() else {
            return Ok(SyncOutcome::AlreadyInFlight);
        };
        let fetched = ticket.run().await;
        self.complete_sync(fetched).map(SyncOutcome::Merged)
    }

    /// Fetch the records inside a bounding box and merge them
    pub async fn sync_region(&mut self, bbox: [f64; 4]) -> Result<SyncOutcome, SyncError> {
        let Some(ticket) = self.begin_region_sync(bbox) else {
            return Ok(SyncOutcome::AlreadyInFlight);
        };
        let fetched = ticket.run().await;
        self.complete_sync(fetched).map(SyncOutcome::Merged)
    }

    /// Insert or replace each record by id, newest revision winning.
    ///
    /// Ids missing from the batch are kept: the feed is incremental.
    pub fn merge(&mut self, batch: Vec<Element>) -> MergeSummary {
        let received = batch.len();
        let mut applied = 0usize;
        let mut stale = 0usize;
        let mut newest = self.watermark.clone();

        for element in batch {
            if let Some(updated_at) = &element.updated_at {
                newest.advance(&Watermark::new(updated_at.as_str()));
            }

            let is_stale = self.elements.get(&element.id).is_some_and(|existing| {
                Watermark::new(existing.revision())
                    .cmp_instant(&Watermark::new(element.revision()))
                    == Ordering::Greater
            });
            if is_stale {
                stale += 1;
                continue;
            }

            self.elements.insert(element.id.clone(), Arc::new(element));
            applied += 1;
        }

        let advanced = self.watermark.advance(&newest);

        if applied > 0 || advanced {
            self.rebuild_index();
            self.schedule_persist();
        }

        info!(
            "Merged {} of {} elements ({} stale), {} total, watermark {}",
            applied,
            received,
            stale,
            self.elements.len(),
            self.watermark
        );

        MergeSummary {
            received,
            applied,
            stale,
            watermark: self.watermark.clone(),
        }
    }

    fn rebuild_index(&mut self) {
        self.index = Arc::new(SpatialIndex::build(self.elements.values()));
    }

    /// Write the full snapshot in the background, then record the watermark
    /// it corresponds to. Writes are chained so they land in merge order.
    fn schedule_persist(&mut self) {
        let elements: Vec<Arc<Element>> = self.elements.values().cloned().collect();
        let watermark = self.watermark.clone();
        let snapshot = self.snapshot.clone();
        let settings = self.settings.clone();
        let generation = Arc::clone(&self.persist_generation);
        let scheduled = *generation.lock().unwrap_or_else(PoisonError::into_inner);

        let write = move || {
            let current = generation.lock().unwrap_or_else(PoisonError::into_inner);
            if *current != scheduled {
                debug!("Dropping snapshot write scheduled before invalidation");
                return;
            }

            match snapshot.write(&elements) {
                Ok(()) => {
                    if let Err(e) = settings.set_watermark(&watermark) {
                        error!("Failed to persist watermark: {:#}", e);
                    }
                }
                Err(e) => error!("Failed to persist element snapshot: {:#}", e),
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let previous = self.pending_write.take();
                self.pending_write = Some(handle.spawn(async move {
                    if let Some(previous) = previous {
                        let _ = previous.await;
                    }
                    if let Err(e) = tokio::task::spawn_blocking(write).await {
                        error!("Snapshot writer panicked: {}", e);
                    }
                }));
            }
            Err(_) => write(),
        }
    }

    /// Wait for any scheduled snapshot write to finish
    pub async fn flush(&mut self) {
        if let Some(pending) = self.pending_write.take() {
            if let Err(e) = pending.await {
                error!("Snapshot write task failed: {}", e);
            }
        }
    }

    /// Copy of the current collection, ordered by id
    pub fn snapshot(&self) -> Vec<Element> {
        self.elements.values().map(|e| e.as_ref().clone()).collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Arc<Element>> {
        self.elements.values()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Element>> {
        self.elements.get(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    /// Spatial index of the current generation
    pub fn index(&self) -> Arc<SpatialIndex> {
        Arc::clone(&self.index)
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::element::tests::element;
    use crate::test_support::MockRemote;

    const T1: &str = "2024-01-01T00:00:00.000Z";
    const T2: &str = "2024-01-02T00:00:00.000Z";
    const T3: &str = "2024-01-03T00:00:00.000Z";
    const T4: &str = "2024-01-04T00:00:00.000Z";

    fn open_store(
        remote: MockRemote,
        dir: &std::path::Path,
        settings: &Settings,
    ) -> ElementStore<MockRemote> {
        ElementStore::open(
            Arc::new(remote),
            SnapshotFile::new(dir.join("elements.json")),
            settings.clone(),
            "1.0.0",
        )
    }

    fn ids(store: &ElementStore<MockRemote>) -> Vec<String> {
        store.elements().map(|e| e.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_sync_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let remote = MockRemote::new();
        remote.respond(Ok(vec![
            element("A", 1.0, 1.0, T1),
            element("B", 2.0, 2.0, T2),
            element("C", 3.0, 3.0, T3),
        ]));
        let mut b2 = element("B", 2.5, 2.5, T4);
        b2.tags.insert("name".to_string(), "B prime".to_string());
        remote.respond(Ok(vec![b2.clone(), element("D", 4.0, 4.0, T4)]));

        let mut store = open_store(remote.clone(), dir.path(), &settings);
        assert!(store.is_empty());

        store.sync().await.unwrap();
        assert_eq!(store.watermark().as_str(), T3);
        assert_eq!(ids(&store), vec!["A", "B", "C"]);

        store.sync().await.unwrap();
        assert_eq!(store.watermark().as_str(), T4);
        assert_eq!(ids(&store), vec!["A", "B", "C", "D"]);
        assert_eq!(store.get("B").unwrap().as_ref(), &b2);

        let queries = remote.queries();
        assert_eq!(
            queries,
            vec![
                FetchQuery::UpdatedSince(Watermark::epoch()),
                FetchQuery::UpdatedSince(Watermark::new(T3)),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_sync_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let remote = MockRemote::new();
        remote.respond(Ok(vec![element("A", 1.0, 1.0, T1)]));
        remote.respond(Err(SyncError::Network("connection reset".to_string())));
        remote.respond(Err(SyncError::Decode("expected array".to_string())));

        let mut store = open_store(remote, dir.path(), &settings);
        store.sync().await.unwrap();
        let before = store.snapshot();
        let mark = store.watermark().clone();

        assert!(matches!(store.sync().await, Err(SyncError::Network(_))));
        assert!(matches!(store.sync().await, Err(SyncError::Decode(_))));
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.watermark(), &mark);
        assert!(!store.is_syncing());
    }

    #[tokio::test]
    async fn test_in_flight_guard() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let mut store = open_store(MockRemote::new(), dir.path(), &settings);

        let ticket = store.begin_sync();
        assert!(ticket.is_some());
        assert!(store.begin_sync().is_none());
        assert!(store.begin_region_sync([0.0, 0.0, 1.0, 1.0]).is_none());
        assert_eq!(store.sync().await, Ok(SyncOutcome::AlreadyInFlight));

        let fetched = ticket.unwrap().run().await;
        store.complete_sync(fetched).unwrap();
        assert!(store.begin_sync().is_some());
    }

    #[test]
    fn test_merge_union_keeps_later_revision() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let mut store = open_store(MockRemote::new(), dir.path(), &settings);

        let newer = element("B", 2.0, 2.0, T3);
        store.merge(vec![element("A", 1.0, 1.0, T1), newer.clone()]);
        let summary = store.merge(vec![element("B", 9.0, 9.0, T2), element("C", 3.0, 3.0, T2)]);

        assert_eq!(summary.stale, 1);
        assert_eq!(summary.applied, 1);
        assert_eq!(ids(&store), vec!["A", "B", "C"]);
        assert_eq!(store.get("B").unwrap().as_ref(), &newer);
        assert_eq!(store.watermark().as_str(), T3);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let mut store = open_store(MockRemote::new(), dir.path(), &settings);
        store.merge(vec![element("A", 1.0, 1.0, T1), element("B", 2.0, 2.0, T2)]);
        store.merge(vec![element("C", 3.0, 3.0, T3)]);
        store.flush().await;

        assert_eq!(store.load(), store.snapshot());

        let snapshot = store.snapshot();
        drop(store);
        let reopened = open_store(MockRemote::new(), dir.path(), &settings);
        assert_eq!(reopened.snapshot(), snapshot);
        assert_eq!(reopened.watermark().as_str(), T3);
        assert_eq!(reopened.index().len(), 3);
    }

    #[tokio::test]
    async fn test_version_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let mut store = open_store(MockRemote::new(), dir.path(), &settings);
        store.merge(vec![element("A", 1.0, 1.0, T1)]);
        store.flush().await;
        drop(store);

        let upgraded = ElementStore::open(
            Arc::new(MockRemote::new()),
            SnapshotFile::new(dir.path().join("elements.json")),
            settings.clone(),
            "2.0.0",
        );
        assert!(upgraded.is_empty());
        assert_eq!(upgraded.watermark(), &Watermark::epoch());
        assert!(upgraded.load().is_empty());
        assert_eq!(settings.app_version().as_deref(), Some("2.0.0"));
    }

    #[tokio::test]
    async fn test_invalidate_discards_pending_write() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let mut store = open_store(MockRemote::new(), dir.path(), &settings);

        store.merge(vec![element("A", 1.0, 1.0, T1)]);
        store.invalidate();
        store.flush().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(store.is_empty());
        assert!(store.load().is_empty());
        assert_eq!(settings.watermark(), None);

        drop(store);
        let reopened = open_store(MockRemote::new(), dir.path(), &settings);
        assert!(reopened.is_empty());
        assert_eq!(reopened.watermark(), &Watermark::epoch());
    }

    #[tokio::test]
    async fn test_writes_after_invalidate_still_persist() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let mut store = open_store(MockRemote::new(), dir.path(), &settings);

        store.merge(vec![element("A", 1.0, 1.0, T1)]);
        store.invalidate();
        store.merge(vec![element("B", 2.0, 2.0, T2)]);
        store.flush().await;

        let ids: Vec<String> = store.load().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["B"]);
        assert_eq!(settings.watermark(), Some(Watermark::new(T2)));
    }

    #[test]
    fn test_merge_orders_timestamps_without_offset() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let mut store = open_store(MockRemote::new(), dir.path(), &settings);

        store.merge(vec![element("A", 1.0, 1.0, "2024-01-01T00:00:00")]);
        assert_eq!(store.watermark().as_str(), "2024-01-01T00:00:00");

        let newer = element("A", 2.0, 2.0, "2024-06-01T00:00:00");
        let summary = store.merge(vec![newer.clone()]);
        assert_eq!(summary.applied, 1);
        assert_eq!(store.watermark().as_str(), "2024-06-01T00:00:00");
        assert_eq!(store.get("A").unwrap().as_ref(), &newer);

        // No-offset revision older than a stored offset-bearing one is stale.
        store.merge(vec![element("B", 3.0, 3.0, "2024-07-01T00:00:00Z")]);
        let summary = store.merge(vec![element("B", 4.0, 4.0, "2024-06-30T23:00:00")]);
        assert_eq!(summary.stale, 1);
    }

    #[test]
    fn test_missing_snapshot_resets_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        settings.set_app_version("1.0.0").unwrap();
        settings.set_watermark(&Watermark::new(T4)).unwrap();

        let store = open_store(MockRemote::new(), dir.path(), &settings);
        assert_eq!(store.watermark(), &Watermark::epoch());
    }

    #[tokio::test]
    async fn test_region_sync_merges_without_removal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::temporary().unwrap();
        let remote = MockRemote::new();
        remote.respond(Ok(vec![element("Z", 5.0, 5.0, T2)]));

        let mut store = open_store(remote.clone(), dir.path(), &settings);
        store.merge(vec![element("A", 1.0, 1.0, T1)]);
        store.sync_region([4.0, 4.0, 6.0, 6.0]).await.unwrap();

        assert_eq!(ids(&store), vec!["A", "Z"]);
        assert_eq!(
            remote.queries(),
            vec![FetchQuery::BoundingBox([4.0, 4.0, 6.0, 6.0])]
        );
    }
}
