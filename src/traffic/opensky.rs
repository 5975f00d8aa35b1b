//! OpenSky Network primary source
//!
//! Queries `/states/all` with a bounding box around the field. State
//! vectors arrive as heterogeneous JSON arrays in metric units; each row
//! is normalized on its own and malformed rows are dropped, never failing
//! the batch. Authentication is OAuth2 client credentials when configured,
//! HTTP Basic as the alternative, anonymous (heavily rate limited) last.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{AirportConfig, OpenSkyConfig};
use crate::geo::{self, BoundingBox, METERS_TO_FEET, MS_TO_FPM, MS_TO_KNOTS};
use crate::snapshot::{AircraftSnapshot, clean_callsign};
use crate::traffic::{FetchError, TrafficSource};

/// Refresh the cached token this long before its stated expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// `/states/all` body. `states` is null when the box is empty.
#[derive(Debug, Deserialize)]
struct StatesResponse {
    #[serde(default)]
    states: Option<Vec<serde_json::Value>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn new(access_token: String, expires_in: u64) -> Self {
        let lifetime = Duration::from_secs(expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        Self {
            access_token,
            expires_at: Instant::now() + lifetime,
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

pub struct OpenSkySource {
    client: Client,
    config: OpenSkyConfig,
    bbox: BoundingBox,
    token: Mutex<Option<CachedToken>>,
}

impl OpenSkySource {
    pub fn new(config: OpenSkyConfig, airport: &AirportConfig) -> Self {
        let bbox = geo::bounding_box(airport.latitude, airport.longitude, airport.radius_km);
        Self {
            client: Client::new(),
            config,
            bbox,
            token: Mutex::new(None),
        }
    }

    fn states_request(&self) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/states/all", self.config.api_url))
            .query(&[
                ("lamin", self.bbox.lat_min.to_string()),
                ("lomin", self.bbox.lon_min.to_string()),
                ("lamax", self.bbox.lat_max.to_string()),
                ("lomax", self.bbox.lon_max.to_string()),
            ])
            .timeout(REQUEST_TIMEOUT)
    }

    /// Cached token, exchanging credentials when absent or stale
    async fn get_token(&self, client_id: &str, client_secret: &str) -> Result<String, FetchError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_fresh()
        {
            return Ok(token.access_token.clone());
        }

        let response = self.exchange_token(client_id, client_secret).await?;
        let token = CachedToken::new(response.access_token, response.expires_in);
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn exchange_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse, FetchError> {
        debug!("exchanging OpenSky client credentials for a token");
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Auth(format!(
                "token endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| FetchError::Auth(format!("token response not parseable: {}", e)))
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn decode_states(
        &self,
        response: reqwest::Response,
    ) -> Result<Vec<AircraftSnapshot>, FetchError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let states: StatesResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        let rows = states.states.unwrap_or_default();
        let mut batch = Vec::with_capacity(rows.len());
        let mut dropped = 0u64;
        for row in &rows {
            match parse_state_row(row) {
                Some(snapshot) => batch.push(snapshot),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!("dropped {} OpenSky rows without a usable position", dropped);
            metrics::counter!("traffic.rows_dropped_total", "source" => "opensky")
                .increment(dropped);
        }
        debug!("OpenSky returned {} aircraft from {} rows", batch.len(), rows.len());
        Ok(batch)
    }
}

#[async_trait::async_trait]
impl TrafficSource for OpenSkySource {
    async fn fetch(&self) -> Result<Vec<AircraftSnapshot>, FetchError> {
        // OAuth2 first. A 401 with a cached token means it was revoked
        // early; invalidate and re-exchange exactly once before giving up.
        if let (Some(client_id), Some(client_secret)) = (
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
        ) {
            let token = self.get_token(&client_id, &client_secret).await?;
            let response = self
                .states_request()
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;

            if response.status() == StatusCode::UNAUTHORIZED {
                warn!("OpenSky rejected the cached token, re-exchanging once");
                self.invalidate_token().await;
                let token = self.get_token(&client_id, &client_secret).await?;
                let retry = self
                    .states_request()
                    .bearer_auth(&token)
                    .send()
                    .await
                    .map_err(|e| FetchError::Network(e.to_string()))?;
                if retry.status() == StatusCode::UNAUTHORIZED {
                    return Err(FetchError::Auth(
                        "unauthorized after token re-exchange".to_string(),
                    ));
                }
                return self.decode_states(retry).await;
            }
            return self.decode_states(response).await;
        }

        // Basic auth when configured, anonymous otherwise
        let mut request = self.states_request();
        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(username, Some(password));
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        self.decode_states(response).await
    }

    fn name(&self) -> &str {
        "opensky"
    }
}

/// Normalize one state-vector row.
///
/// Index layout: 0 icao24, 1 callsign, 5 longitude, 6 latitude,
/// 7 baro altitude (m), 9 velocity (m/s), 10 true track (deg),
/// 11 vertical rate (m/s), 4 last contact (unix seconds). Rows without a
/// position are useless to the classifier and return None.
fn parse_state_row(row: &serde_json::Value) -> Option<AircraftSnapshot> {
    let fields = row.as_array()?;
    let longitude = fields.get(5)?.as_f64()?;
    let latitude = fields.get(6)?.as_f64()?;

    let hex = fields
        .get(0)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let callsign = clean_callsign(fields.get(1).and_then(|v| v.as_str()));

    let seen_at = fields
        .get(4)
        .and_then(|v| v.as_i64())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    Some(AircraftSnapshot {
        hex,
        callsign,
        latitude,
        longitude,
        altitude_ft: fields
            .get(7)
            .and_then(|v| v.as_f64())
            .map(|m| m * METERS_TO_FEET),
        ground_speed_kt: fields
            .get(9)
            .and_then(|v| v.as_f64())
            .map(|ms| ms * MS_TO_KNOTS),
        track_deg: fields.get(10).and_then(|v| v.as_f64()),
        vertical_rate_fpm: fields
            .get(11)
            .and_then(|v| v.as_f64())
            .map(|ms| ms * MS_TO_FPM),
        seen_at,
    })
}
