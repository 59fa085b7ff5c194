//! Error types for the sync, visibility and geocoding paths.

use thiserror::Error;

/// Failure of a single sync attempt. Never leaves a partial merge behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transport failure reaching the element source
    #[error("request to element source failed: {0}")]
    Network(String),

    /// The element source answered with a non-success status
    #[error("element source returned HTTP {status}")]
    Status { status: u16 },

    /// Response body was not a JSON array of element records
    #[error("malformed element response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::Status {
                status: status.as_u16(),
            }
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

/// An element lacks any usable coordinate and cannot be placed on the map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("element {id} has no usable coordinate")]
pub struct NoCoordinateError {
    pub id: String,
}

/// Reverse lookup produced no placemark for a coordinate key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no placemark found for {key}")]
pub struct GeocodeFailure {
    pub key: String,
}
