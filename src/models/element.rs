//! Point-of-interest records as delivered by the remote element feed.

use geo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Address;
use crate::error::NoCoordinateError;

/// Geographic coordinate (lat/lon, WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Validate a raw lat/lon pair
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }

    /// Key used by the address cache; ~1m precision
    pub fn cache_key(&self) -> String {
        format!("{:.5},{:.5}", self.lat, self.lon)
    }

    /// Convert to a geo point (x = lon, y = lat)
    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// Wire/snapshot layout of an element record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawElement {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
    #[serde(default)]
    tags: Option<HashMap<String, String>>,
    created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<String>,
}

/// A point of interest. Immutable value record: updates replace, never mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawElement", into = "RawElement")]
pub struct Element {
    /// Stable source-assigned identifier, e.g. "node:1234"
    pub id: String,

    /// Absent for malformed records
    pub coordinate: Option<Coordinate>,

    /// Open-ended OSM-style tags
    pub tags: HashMap<String, String>,

    pub created_at: String,
    pub updated_at: Option<String>,
    pub deleted_at: Option<String>,

    /// Derived from `addr:*` tags at decode time; not part of the wire schema
    pub address: Option<Address>,
}

impl From<RawElement> for Element {
    fn from(raw: RawElement) -> Self {
        let tags = raw.tags.unwrap_or_default();
        let coordinate = match (raw.lat, raw.lon) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon),
            _ => None,
        };
        let address = Address::from_tags(&tags);

        Self {
            id: raw.id,
            coordinate,
            tags,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            deleted_at: raw.deleted_at,
            address,
        }
    }
}

impl From<Element> for RawElement {
    fn from(element: Element) -> Self {
        Self {
            id: element.id,
            lat: element.coordinate.map(|c| c.lat),
            lon: element.coordinate.map(|c| c.lon),
            tags: Some(element.tags),
            created_at: element.created_at,
            updated_at: element.updated_at,
            deleted_at: element.deleted_at,
        }
    }
}

/// Payment acceptance flags derived from `payment:*` tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentMethods {
    pub onchain: bool,
    pub lightning: bool,
    pub lightning_contactless: bool,
    /// Only set when none of the specific flags are present at all
    pub bitcoin_generic: bool,
}

const TAG_ONCHAIN: &str = "payment:onchain";
const TAG_LIGHTNING: &str = "payment:lightning";
const TAG_LIGHTNING_CONTACTLESS: &str = "payment:lightning_contactless";
const TAG_BITCOIN: &str = "payment:bitcoin";

impl Element {
    /// Look up a tag, treating blank values as absent
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.tag("name")
    }

    pub fn operator(&self) -> Option<&str> {
        self.tag("operator")
    }

    /// Name, falling back to the operator tag
    pub fn display_name(&self) -> Option<&str> {
        self.name().or_else(|| self.operator())
    }

    pub fn phone(&self) -> Option<&str> {
        self.tag("phone").or_else(|| self.tag("contact:phone"))
    }

    pub fn website(&self) -> Option<&str> {
        self.tag("website").or_else(|| self.tag("contact:website"))
    }

    pub fn opening_hours(&self) -> Option<&str> {
        self.tag("opening_hours")
    }

    /// Soft-deleted records carry a non-empty `deleted_at`
    pub fn is_deleted(&self) -> bool {
        self.deleted_at
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// Coordinate or a typed error for callers that need one
    pub fn require_coordinate(&self) -> Result<Coordinate, NoCoordinateError> {
        self.coordinate.ok_or_else(|| NoCoordinateError {
            id: self.id.clone(),
        })
    }

    /// Timestamp used to decide which of two versions of a record is newer
    pub fn revision(&self) -> &str {
        self.updated_at.as_deref().unwrap_or(&self.created_at)
    }

    fn tag_is_yes(&self, key: &str) -> bool {
        self.tag(key) == Some("yes")
    }

    pub fn accepts_onchain(&self) -> bool {
        self.tag_is_yes(TAG_ONCHAIN)
    }

    pub fn accepts_lightning(&self) -> bool {
        self.tag_is_yes(TAG_LIGHTNING)
    }

    pub fn accepts_lightning_contactless(&self) -> bool {
        self.tag_is_yes(TAG_LIGHTNING_CONTACTLESS)
    }

    /// Generic acceptance counts only when every specific payment key is absent.
    ///
    /// Downstream icon and label selection relies on the four flags being
    /// mutually exclusive in this way.
    pub fn accepts_bitcoin_generic(&self) -> bool {
        self.tag_is_yes(TAG_BITCOIN)
            && [TAG_ONCHAIN, TAG_LIGHTNING, TAG_LIGHTNING_CONTACTLESS]
                .iter()
                .all(|key| !self.tags.contains_key(*key))
    }

    pub fn payment_methods(&self) -> PaymentMethods {
        PaymentMethods {
            onchain: self.accepts_onchain(),
            lightning: self.accepts_lightning(),
            lightning_contactless: self.accepts_lightning_contactless(),
            bitcoin_generic: self.accepts_bitcoin_generic(),
        }
    }
}
