//! Nominatim reverse geocoder over HTTP.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{Geocoder, Placemark};
use crate::models::Coordinate;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    error: Option<String>,
}

/// First non-empty string among `keys`
fn first_of(address: &HashMap<String, serde_json::Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| address.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(String::from)
}

fn placemark_from(address: &HashMap<String, serde_json::Value>) -> Placemark {
    Placemark {
        street_number: first_of(address, &["house_number"]),
        street_name: first_of(address, &["road", "pedestrian", "footway", "square"]),
        locality: first_of(address, &["city", "town", "village", "hamlet", "municipality"]),
        postal_code: first_of(address, &["postcode"]),
        administrative_area: first_of(address, &["state", "province", "region"]),
        country: first_of(address, &["country"]),
    }
}

/// Reverse geocoder backed by a Nominatim instance
#[derive(Clone)]
pub struct NominatimGeocoder {
    client: Client,
    base: Url,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let base = Url::parse(base_url).context("Invalid Nominatim URL")?;
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base })
    }

    fn reverse_url(&self, coordinate: Coordinate) -> Result<Url> {
        let mut url = self.base.join("reverse").context("Invalid Nominatim URL")?;
        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("addressdetails", "1")
            .append_pair("lat", &coordinate.lat.to_string())
            .append_pair("lon", &coordinate.lon.to_string());
        Ok(url)
    }
}

impl Geocoder for NominatimGeocoder {
    fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> impl Future<Output = Result<Option<Placemark>>> + Send {
        let client = self.client.clone();
        let url = self.reverse_url(coordinate);

        async move {
            let url = url?;
            let response = client
                .get(url)
                .send()
                .await
                .context("Nominatim request failed")?;

            if !response.status().is_success() {
                anyhow::bail!("Nominatim returned status {}", response.status());
            }

            let body: ReverseResponse = response
                .json()
                .await
                .context("Failed to parse Nominatim response")?;

            if let Some(error) = body.error {
                debug!("Nominatim has no result for {}: {}", coordinate.cache_key(), error);
                return Ok(None);
            }

            Ok(body.address.as_ref().map(placemark_from))
        }
    }
}
