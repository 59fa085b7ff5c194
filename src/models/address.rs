//! Structured postal address components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Address components, every field independently optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub housenumber: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Returns the trimmed value if it carries any text.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl Address {
    /// Build an address from `addr:*` tags. Returns `None` when no field is present.
    pub fn from_tags(tags: &HashMap<String, String>) -> Option<Self> {
        let field = |key: &str| {
            tags.get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(String::from)
        };

        let address = Self {
            housenumber: field("addr:housenumber"),
            street: field("addr:street"),
            city: field("addr:city"),
            postcode: field("addr:postcode"),
            region: field("addr:state").or_else(|| field("addr:province")),
            country: field("addr:country"),
        };

        if address.is_empty() {
            None
        } else {
            Some(address)
        }
    }

    /// True when no field carries any text
    pub fn is_empty(&self) -> bool {
        [
            &self.housenumber,
            &self.street,
            &self.city,
            &self.postcode,
            &self.region,
            &self.country,
        ]
        .into_iter()
        .all(|field| non_empty(field).is_none())
    }

    /// An address is complete when street number, street name and city are all set.
    ///
    /// Incomplete addresses are the ones worth a reverse geocoding attempt.
    pub fn is_complete(&self) -> bool {
        non_empty(&self.housenumber).is_some()
            && non_empty(&self.street).is_some()
            && non_empty(&self.city).is_some()
    }

    /// Combine two addresses field by field, preferring `self` wherever it has a value.
    pub fn merged_with(&self, fallback: &Address) -> Address {
        let pick = |preferred: &Option<String>, other: &Option<String>| {
            non_empty(preferred)
                .or_else(|| non_empty(other))
                .map(String::from)
        };

        Address {
            housenumber: pick(&self.housenumber, &fallback.housenumber),
            street: pick(&self.street, &fallback.street),
            city: pick(&self.city, &fallback.city),
            postcode: pick(&self.postcode, &fallback.postcode),
            region: pick(&self.region, &fallback.region),
            country: pick(&self.country, &fallback.country),
        }
    }

    /// Single-line display form, e.g. "12 Main St, Springfield 12345, IL, US"
    pub fn one_line(&self) -> String {
        let street_line = [non_empty(&self.housenumber), non_empty(&self.street)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let city_line = [non_empty(&self.city), non_empty(&self.postcode)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        [
            Some(street_line.as_str()),
            Some(city_line.as_str()),
            non_empty(&self.region),
            non_empty(&self.country),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}
