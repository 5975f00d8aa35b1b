use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directional gate strategy for the approach classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStrategy {
    /// Compare track against the bearing from the aircraft to the field
    BearingToDestination,
    /// Compare track against the configured runway headings
    RunwayAlignment,
}

impl std::fmt::Display for GateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStrategy::BearingToDestination => write!(f, "bearing_to_destination"),
            GateStrategy::RunwayAlignment => write!(f, "runway_alignment"),
        }
    }
}

/// Airport reference point and classification thresholds.
///
/// Everything the classifier and landing detector read lives here; the rest
/// of the file configures the service around them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirportConfig {
    #[serde(default = "default_ident")]
    pub ident: String,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    /// Search radius around the reference point in kilometers
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
    /// Aircraft above this altitude are never considered on approach
    #[serde(default = "default_altitude_ceiling_ft")]
    pub altitude_ceiling_ft: f64,
    /// Coarse ETA ceiling in minutes
    #[serde(default = "default_max_eta_minutes")]
    pub max_eta_minutes: f64,
    #[serde(default = "default_gate_strategy")]
    pub gate_strategy: GateStrategy,
    /// Bearing-to-destination strategy: max |track - bearing| in degrees
    #[serde(default = "default_max_bearing_deviation_deg")]
    pub max_bearing_deviation_deg: f64,
    /// Runway-alignment strategy: runway true headings in degrees
    #[serde(default = "default_runway_headings")]
    pub runway_headings_deg: Vec<f64>,
    /// Runway-alignment strategy: max angular difference from a runway heading
    #[serde(default = "default_runway_tolerance_deg")]
    pub runway_tolerance_deg: f64,
    /// Runway-alignment strategy only applies inside this radius; farther out
    /// an aircraft may still be vectoring and its track proves nothing
    #[serde(default = "default_close_in_radius_km")]
    pub close_in_radius_km: f64,
    /// Landing detector: below this altitude in feet
    #[serde(default = "default_landing_altitude_ft")]
    pub landing_altitude_ft: f64,
    /// Landing detector: below this ground speed in knots
    #[serde(default = "default_landing_speed_kt")]
    pub landing_speed_kt: f64,
}

fn default_ident() -> String {
    "KSEA".to_string()
}

fn default_latitude() -> f64 {
    47.4502
}

fn default_longitude() -> f64 {
    -122.3088
}

fn default_radius_km() -> f64 {
    60.0
}

fn default_altitude_ceiling_ft() -> f64 {
    10_000.0
}

fn default_max_eta_minutes() -> f64 {
    25.0
}

fn default_gate_strategy() -> GateStrategy {
    GateStrategy::RunwayAlignment
}

fn default_max_bearing_deviation_deg() -> f64 {
    45.0
}

fn default_runway_headings() -> Vec<f64> {
    // SEA 16L/C/R and the 34 reciprocals
    vec![163.0, 343.0]
}

fn default_runway_tolerance_deg() -> f64 {
    25.0
}

fn default_close_in_radius_km() -> f64 {
    30.0
}

fn default_landing_altitude_ft() -> f64 {
    200.0
}

fn default_landing_speed_kt() -> f64 {
    50.0
}

impl Default for AirportConfig {
    fn default() -> Self {
        Self {
            ident: default_ident(),
            latitude: default_latitude(),
            longitude: default_longitude(),
            radius_km: default_radius_km(),
            altitude_ceiling_ft: default_altitude_ceiling_ft(),
            max_eta_minutes: default_max_eta_minutes(),
            gate_strategy: default_gate_strategy(),
            max_bearing_deviation_deg: default_max_bearing_deviation_deg(),
            runway_headings_deg: default_runway_headings(),
            runway_tolerance_deg: default_runway_tolerance_deg(),
            close_in_radius_km: default_close_in_radius_km(),
            landing_altitude_ft: default_landing_altitude_ft(),
            landing_speed_kt: default_landing_speed_kt(),
        }
    }
}

impl AirportConfig {
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            bail!("latitude {} out of range [-90, 90]", self.latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            bail!("longitude {} out of range [-180, 180]", self.longitude);
        }
        if self.radius_km <= 0.0 {
            bail!("radius_km must be positive, got {}", self.radius_km);
        }
        if self.altitude_ceiling_ft <= 0.0 {
            bail!(
                "altitude_ceiling_ft must be positive, got {}",
                self.altitude_ceiling_ft
            );
        }
        if self.gate_strategy == GateStrategy::RunwayAlignment
            && self.runway_headings_deg.is_empty()
        {
            bail!("runway_alignment strategy requires at least one runway heading");
        }
        for heading in &self.runway_headings_deg {
            if !(0.0..360.0).contains(heading) {
                bail!("runway heading {} out of range [0, 360)", heading);
            }
        }
        Ok(())
    }
}

/// Poll loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_seconds")]
    pub interval_seconds: u64,
    /// Uniform jitter applied each cycle, plus or minus this many seconds
    #[serde(default = "default_poll_jitter_seconds")]
    pub jitter_seconds: u64,
}

fn default_poll_interval_seconds() -> u64 {
    10
}

fn default_poll_jitter_seconds() -> u64 {
    1
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_poll_interval_seconds(),
            jitter_seconds: default_poll_jitter_seconds(),
        }
    }
}

/// Upstream fetch retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_retry_initial_backoff_ms() -> u64 {
    800
}

fn default_retry_max_backoff_ms() -> u64 {
    6000
}

fn default_retry_jitter_ms() -> u64 {
    400
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
            jitter_ms: default_retry_jitter_ms(),
        }
    }
}

/// Primary/fallback switch-over behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Consecutive successful-but-empty primary fetches before falling back
    #[serde(default = "default_empty_cycle_threshold")]
    pub empty_cycle_threshold: u32,
    /// How long to serve from the fallback before re-trying the primary
    #[serde(default = "default_failover_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

fn default_empty_cycle_threshold() -> u32 {
    3
}

fn default_failover_cooldown_seconds() -> u64 {
    120
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            empty_cycle_threshold: default_empty_cycle_threshold(),
            cooldown_seconds: default_failover_cooldown_seconds(),
        }
    }
}

/// OpenSky Network credentials and endpoints.
///
/// OAuth2 client credentials are preferred, Basic auth second, anonymous
/// (heavily rate-limited) last. Credentials normally arrive via environment
/// variables rather than the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSkyConfig {
    #[serde(default = "default_opensky_api_url")]
    pub api_url: String,
    #[serde(default = "default_opensky_token_url")]
    pub token_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_opensky_api_url() -> String {
    "https://opensky-network.org/api".to_string()
}

fn default_opensky_token_url() -> String {
    "https://auth.opensky-network.org/auth/realms/opensky-network/protocol/openid-connect/token"
        .to_string()
}

impl Default for OpenSkyConfig {
    fn default() -> Self {
        Self {
            api_url: default_opensky_api_url(),
            token_url: default_opensky_token_url(),
            client_id: None,
            client_secret: None,
            username: None,
            password: None,
        }
    }
}

/// RapidAPI-hosted ADS-B Exchange fallback feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RapidApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_rapidapi_host")]
    pub host: String,
}

fn default_rapidapi_host() -> String {
    "adsbexchange-com1.p.rapidapi.com".to_string()
}

impl Default for RapidApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            host: default_rapidapi_host(),
        }
    }
}

/// Listen interface and ports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            port: default_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

/// Top-level configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Use the synthetic traffic generator instead of live upstreams
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub airport: AirportConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub opensky: OpenSkyConfig,
    #[serde(default)]
    pub rapidapi: RapidApiConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: Config =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Save config to a TOML file (atomic: write to .tmp then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }

    /// Load from `path` when the file exists, otherwise start from defaults
    /// and materialize them so operators have a file to edit. Environment
    /// overrides apply either way.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            let config = Self::default();
            // First run. A read-only location just skips the write.
            if let Err(e) = config.save(path) {
                debug!("could not write default config to {:?}: {:#}", path, e);
            }
            config
        };
        config.apply_env_overrides();
        config.airport.validate()?;
        Ok(config)
    }

    /// Overlay credentials and ports from the environment. Secrets belong in
    /// the environment, not the config file, so env always wins.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OPENSKY_CLIENT_ID") {
            self.opensky.client_id = Some(v);
        }
        if let Ok(v) = std::env::var("OPENSKY_CLIENT_SECRET") {
            self.opensky.client_secret = Some(v);
        }
        if let Ok(v) = std::env::var("OPENSKY_USERNAME") {
            self.opensky.username = Some(v);
        }
        if let Ok(v) = std::env::var("OPENSKY_PASSWORD") {
            self.opensky.password = Some(v);
        }
        if let Ok(v) = std::env::var("RAPIDAPI_KEY") {
            self.rapidapi.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("RAPIDAPI_HOST") {
            self.rapidapi.host = v;
        }
        if let Ok(v) = std::env::var("METRICS_PORT")
            && let Ok(port) = v.parse()
        {
            self.server.metrics_port = port;
        }
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `GLIDEPATH_CONFIG` env var
/// 2. `/etc/glidepath/config.toml` (production/staging)
/// 3. `./glidepath.toml` (development)
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("GLIDEPATH_CONFIG") {
        return PathBuf::from(path);
    }

    match std::env::var("GLIDEPATH_ENV").as_deref() {
        Ok("production") | Ok("staging") => PathBuf::from("/etc/glidepath/config.toml"),
        _ => PathBuf::from("./glidepath.toml"),
    }
}
