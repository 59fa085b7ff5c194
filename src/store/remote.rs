//! Remote element source: incremental and region-bounded fetches.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::SyncError;
use crate::models::{Element, Watermark};

/// What to ask the element source for
#[derive(Debug, Clone, PartialEq)]
pub enum FetchQuery {
    /// Records updated at or after the watermark
    UpdatedSince(Watermark),
    /// Records inside `[minLon, minLat, maxLon, maxLat]`
    BoundingBox([f64; 4]),
}

impl FetchQuery {
    /// Query-string pair for this fetch mode
    pub fn query_pair(&self) -> (&'static str, String) {
        match self {
            FetchQuery::UpdatedSince(since) => ("updated_since", since.to_string()),
            FetchQuery::BoundingBox([min_lon, min_lat, max_lon, max_lat]) => (
                "bbox",
                format!("{},{},{},{}", min_lon, min_lat, max_lon, max_lat),
            ),
        }
    }
}

/// A source of element batches. Implemented over HTTP in production and by
/// in-memory doubles in tests.
pub trait RemoteSource: Send + Sync + 'static {
    fn fetch(
        &self,
        query: &FetchQuery,
    ) -> impl Future<Output = Result<Vec<Element>, SyncError>> + Send;
}

/// Decode a response body into elements.
///
/// The body must be a JSON array. Records that fail to decode individually are
/// skipped so one bad row cannot hold back the rest of the feed.
pub fn decode_batch(body: &[u8]) -> Result<Vec<Element>, SyncError> {
    let values: Vec<serde_json::Value> = serde_json::from_slice(body)?;
    let total = values.len();

    let mut elements = Vec::with_capacity(total);
    let mut skipped = 0usize;

    for value in values {
        match serde_json::from_value::<Element>(value) {
            Ok(element) => elements.push(element),
            Err(e) => {
                skipped += 1;
                debug!("Skipping undecodable element record: {}", e);
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} of {} malformed element records", skipped, total);
    }

    Ok(elements)
}

/// HTTP element source returning a JSON array of records
#[derive(Clone)]
pub struct HttpRemoteSource {
    client: Client,
    endpoint: Url,
}

impl HttpRemoteSource {
    pub fn new(endpoint: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("Invalid element endpoint URL")?;
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, endpoint })
    }

    /// Full request URL for a query
    pub fn url_for(&self, query: &FetchQuery) -> Url {
        let (key, value) = query.query_pair();
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair(key, &value);
        url
    }
}

impl RemoteSource for HttpRemoteSource {
    fn fetch(
        &self,
        query: &FetchQuery,
    ) -> impl Future<Output = Result<Vec<Element>, SyncError>> + Send {
        let url = self.url_for(query);
        let client = self.client.clone();

        async move {
            info!("Fetching elements from {}", url);

            let response = client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                warn!("Element source answered with status {}", status);
                return Err(SyncError::Status {
                    status: status.as_u16(),
                });
            }

            let body = response.bytes().await?;
            let elements = decode_batch(&body)?;
            debug!("Decoded {} elements ({} bytes)", elements.len(), body.len());
            Ok(elements)
        }
    }
}
