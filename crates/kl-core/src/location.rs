//! Geolocation Capture: device position plus a best-effort street address.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{PositionRequest, UserLocation};
use crate::traits::{Geocoder, PositionSource};

/// Reverse-geocoding budget when none is configured.
pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct LocationCapture {
    source: Arc<dyn PositionSource>,
    geocoder: Arc<dyn Geocoder>,
    request: PositionRequest,
    geocode_timeout: Duration,
}

impl LocationCapture {
    pub fn new(source: Arc<dyn PositionSource>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            source,
            geocoder,
            request: PositionRequest::default(),
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
        }
    }

    pub fn with_geocode_timeout(mut self, timeout: Duration) -> Self {
        self.geocode_timeout = timeout;
        self
    }


    /// Fails only when no position can be obtained; a geocoding failure just
    /// leaves `address` empty.
    pub async fn capture_location(&self) -> Result<UserLocation> {
        let coordinates =
            match tokio::time::timeout(self.request.timeout, self.source.current_position(&self.request)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(AppError::LocationUnavailable(format!(
                        "no position within {:?}",
                        self.request.timeout
                    )))
                }
            };

        let address = match tokio::time::timeout(self.geocode_timeout, self.geocoder.reverse(coordinates)).await {
            Ok(Ok(address)) => address,
            Ok(Err(err)) => {
                warn!(error = %err, "reverse geocoding failed, continuing without address");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.geocode_timeout, "reverse geocoding timed out, continuing without address");
                None
            }
        };
        debug!(
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            has_address = address.is_some(),
            "location captured"
        );

        Ok(UserLocation {
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            address,
        })
    }
}
