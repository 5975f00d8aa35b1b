//! RapidAPI-hosted ADS-B Exchange fallback source
//!
//! Point-and-distance query, keyed header auth, payload already in
//! aviation units. Only consulted while the primary is resting.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::{AirportConfig, RapidApiConfig};
use crate::geo::KM_PER_NM;
use crate::snapshot::{AircraftSnapshot, clean_callsign};
use crate::traffic::{FetchError, TrafficSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct AdsbExchangeResponse {
    #[serde(default)]
    ac: Option<Vec<AdsbAircraft>>,
}

/// One aircraft object from the v2 API. Everything is optional; rows
/// missing a position are dropped during normalization.
#[derive(Debug, Default, Deserialize)]
struct AdsbAircraft {
    #[serde(default)]
    hex: Option<String>,
    #[serde(default)]
    flight: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    /// Feet, or the literal string "ground"
    #[serde(default)]
    alt_baro: Option<serde_json::Value>,
    /// Ground speed in knots
    #[serde(default)]
    gs: Option<f64>,
    /// Track over ground in degrees
    #[serde(default)]
    track: Option<f64>,
    /// Barometric rate in feet per minute
    #[serde(default)]
    baro_rate: Option<f64>,
}

pub struct RapidApiSource {
    client: Client,
    config: RapidApiConfig,
    latitude: f64,
    longitude: f64,
    dist_nm: u32,
}

impl RapidApiSource {
    pub fn new(config: RapidApiConfig, airport: &AirportConfig) -> Self {
        let dist_nm = (airport.radius_km / KM_PER_NM).ceil() as u32;
        Self {
            client: Client::new(),
            config,
            latitude: airport.latitude,
            longitude: airport.longitude,
            dist_nm,
        }
    }
}

#[async_trait::async_trait]
impl TrafficSource for RapidApiSource {
    async fn fetch(&self) -> Result<Vec<AircraftSnapshot>, FetchError> {
        let Some(api_key) = &self.config.api_key else {
            return Err(FetchError::Unconfigured);
        };

        let url = format!(
            "https://{}/v2/lat/{}/lon/{}/dist/{}/",
            self.config.host, self.latitude, self.longitude, self.dist_nm
        );
        let response = self
            .client
            .get(&url)
            .header("X-RapidAPI-Key", api_key)
            .header("X-RapidAPI-Host", &self.config.host)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

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
        let parsed: AdsbExchangeResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        let rows = parsed.ac.unwrap_or_default();
        let total = rows.len();
        let mut dropped = 0u64;
        let mut batch = Vec::with_capacity(total);
        for row in rows {
            match normalize_aircraft(row) {
                Some(snapshot) => batch.push(snapshot),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!("dropped {} RapidAPI rows without a usable position", dropped);
            metrics::counter!("traffic.rows_dropped_total", "source" => "rapidapi")
                .increment(dropped);
        }
        debug!("RapidAPI returned {} aircraft from {} rows", batch.len(), total);
        Ok(batch)
    }

    fn name(&self) -> &str {
        "rapidapi"
    }
}

fn normalize_aircraft(row: AdsbAircraft) -> Option<AircraftSnapshot> {
    let latitude = row.lat?;
    let longitude = row.lon?;

    Some(AircraftSnapshot {
        hex: row
            .hex
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        callsign: clean_callsign(row.flight.as_deref()),
        latitude,
        longitude,
        altitude_ft: parse_alt_baro(row.alt_baro.as_ref()),
        ground_speed_kt: row.gs,
        track_deg: row.track,
        vertical_rate_fpm: row.baro_rate,
        seen_at: Utc::now(),
    })
}

/// `alt_baro` is a number in feet, or the string "ground" for aircraft on
/// the surface. The sentinel maps to 0 ft so the landing detector sees a
/// definitive low altitude rather than an unknown.
fn parse_alt_baro(value: Option<&serde_json::Value>) -> Option<f64> {
    let value = value?;
    if let Some(feet) = value.as_f64() {
        return Some(feet);
    }
    if value.as_str() == Some("ground") {
        return Some(0.0);
    }
    None
}
