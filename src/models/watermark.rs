//! Sync watermark: the newest `updated_at` seen across merged batches.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Lower bound used when nothing has been synced yet
pub const EPOCH_WATERMARK: &str = "2000-01-01T00:00:00.000Z";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(String);

impl Watermark {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn epoch() -> Self {
        Self(EPOCH_WATERMARK.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parsed instant. Timestamps without an offset are taken as UTC.
    pub fn instant(&self) -> Option<DateTime<FixedOffset>> {
        if let Ok(instant) = DateTime::parse_from_rfc3339(&self.0) {
            return Some(instant);
        }
        let naive = NaiveDateTime::parse_from_str(&self.0, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Some(FixedOffset::east_opt(0)?.from_utc_datetime(&naive))
    }

    /// Compare by instant. Unparseable timestamps sort below every valid one.
    pub fn cmp_instant(&self, other: &Watermark) -> Ordering {
        match (self.instant(), other.instant()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.0.cmp(&other.0),
        }
    }

    /// Advance to `candidate` if it is newer. Never moves backwards.
    pub fn advance(&mut self, candidate: &Watermark) -> bool {
        if candidate.cmp_instant(self) == Ordering::Greater {
            self.0 = candidate.0.clone();
            true
        } else {
            false
        }
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
