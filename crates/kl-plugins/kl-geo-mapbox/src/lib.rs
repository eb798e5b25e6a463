//! Geolocation adapters.
//!
//! [`MapboxGeocoder`] wraps the Mapbox places API for reverse geocoding using
//! [`reqwest`]. [`FixedPositionSource`] answers position requests with
//! coordinates configured on the server, which is all a headless service can
//! offer in place of a device sensor.

use std::time::Duration;

use async_trait::async_trait;
use kl_core::error::{AppError, PositionError, Result};
use kl_core::models::{Coordinates, PositionRequest};
use kl_core::traits::{Geocoder, PositionSource};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

/// HTTP client for the Mapbox reverse geocoding endpoint.
pub struct MapboxGeocoder {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
}

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    place_name: Option<String>,
}

impl MapboxGeocoder {
    /// * `base_url` - e.g. `https://api.mapbox.com`, no trailing path.
    /// * `timeout` - applied to every request as the client timeout.
    pub fn new(base_url: impl Into<String>, token: SecretString, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("building http client: {e}")))?;
        Ok(Self::with_client(client, base_url, token))
    }

    /// Reuse an existing [`reqwest::Client`] (and its connection pool).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn endpoint(&self, coordinates: Coordinates) -> String {
        // Mapbox takes longitude first.
        format!(
            "{}/geocoding/v5/mapbox.places/{},{}.json",
            self.base_url, coordinates.longitude, coordinates.latitude
        )
    }
}

/// First feature's `place_name`, if any.
fn place_name_from(body: &serde_json::Value) -> Result<Option<String>> {
    let parsed = PlacesResponse::deserialize(body)
        .map_err(|e| AppError::Upstream(format!("unexpected geocoder response: {e}")))?;
    Ok(parsed
        .features
        .into_iter()
        .find_map(|f| f.place_name)
        .filter(|name| !name.trim().is_empty()))
}

#[async_trait]
impl Geocoder for MapboxGeocoder {
    async fn reverse(&self, coordinates: Coordinates) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.endpoint(coordinates))
            .query(&[("access_token", self.token.expose_secret()), ("limit", "1")])
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("geocoder request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!("geocoder returned {status}: {body}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("geocoder body: {}", e.without_url())))?;
        let address = place_name_from(&body)?;
        debug!(found = address.is_some(), "reverse geocode finished");
        Ok(address)
    }
}

/// Used when no Mapbox token is configured: every point has no known address.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGeocoder;

#[async_trait]
impl Geocoder for OfflineGeocoder {
    async fn reverse(&self, _coordinates: Coordinates) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Position source backed by server configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPositionSource {
    coordinates: Option<Coordinates>,
}

impl FixedPositionSource {
    pub fn new(coordinates: Option<Coordinates>) -> Self {
        Self { coordinates }
    }
}

#[async_trait]
impl PositionSource for FixedPositionSource {
    async fn current_position(
        &self,
        _request: &PositionRequest,
    ) -> std::result::Result<Coordinates, PositionError> {
        self.coordinates.ok_or(PositionError::Unsupported)
    }
}
