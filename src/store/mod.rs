//! Element storage: remote sync, merge, persistence and spatial indexing.

mod element_store;
mod index;
mod remote;
mod settings;
mod snapshot;

pub use element_store::{ElementStore, FetchResult, MergeSummary, SyncOutcome, SyncTicket};
pub use index::{IndexedElement, SpatialIndex};
pub use remote::{decode_batch, FetchQuery, HttpRemoteSource, RemoteSource};
pub use settings::Settings;
pub use snapshot::SnapshotFile;
