//! Normalized aircraft state vectors. Upstream adapters convert their wire
//! formats into [`AircraftSnapshot`] so the classifier and alert store never
//! see provider-specific units or field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity for one aircraft across polls.
///
/// Derivation order: transponder hex (trimmed, lowercased), then callsign
/// (trimmed, uppercased), then a random `anon-` key. Anonymous keys will not
/// correlate across polls; that is an accepted limitation for rows carrying
/// no identity at all, not something to repair here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlightKey(String);

impl FlightKey {
    pub fn derive(hex: Option<&str>, callsign: Option<&str>) -> Self {
        if let Some(hex) = hex.map(str::trim).filter(|s| !s.is_empty()) {
            return FlightKey(hex.to_lowercase());
        }
        if let Some(cs) = callsign.map(str::trim).filter(|s| !s.is_empty()) {
            return FlightKey(cs.to_uppercase());
        }
        FlightKey(format!("anon-{:08x}", rand::random::<u32>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FlightKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlightKey {
    fn from(s: &str) -> Self {
        FlightKey(s.to_string())
    }
}

/// One observed aircraft state vector in aviation units.
///
/// Kinematic fields are optional because every upstream emits partial rows.
/// Unknown stays `None` all the way to the classifier, which decides per
/// gate whether a missing field passes or rejects; nothing here coerces
/// unknown to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftSnapshot {
    /// Transponder hex address, preferred identity
    pub hex: Option<String>,
    pub callsign: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Barometric altitude in feet
    pub altitude_ft: Option<f64>,
    /// Ground speed in knots
    pub ground_speed_kt: Option<f64>,
    /// Track over ground in degrees true, [0, 360)
    pub track_deg: Option<f64>,
    /// Vertical rate in feet per minute, positive when climbing
    pub vertical_rate_fpm: Option<f64>,
    pub seen_at: DateTime<Utc>,
}

impl AircraftSnapshot {
    pub fn flight_key(&self) -> FlightKey {
        FlightKey::derive(self.hex.as_deref(), self.callsign.as_deref())
    }

    /// Display label for log lines: callsign when present, hex otherwise.
    pub fn label(&self) -> &str {
        match (&self.callsign, &self.hex) {
            (Some(cs), _) if !cs.is_empty() => cs,
            (_, Some(hex)) => hex,
            _ => "unknown",
        }
    }
}

/// Trim a raw callsign field. Upstreams pad callsigns with trailing spaces;
/// an all-whitespace value means "not reported".
pub fn clean_callsign(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
