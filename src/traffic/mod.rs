//! Upstream traffic source abstraction
//!
//! This module provides a trait-based abstraction for fetching aircraft
//! state batches from different upstreams. This enables:
//! - Production: OpenSky (primary) with a RapidAPI-hosted fallback
//! - Testing/demo: a synthetic traffic generator
//!
//! The wrappers in this module add the reliability layer every upstream
//! needs: bounded retry with doubling backoff and jitter, and
//! primary/fallback orchestration when the primary goes quiet.

pub mod opensky;
pub mod rapidapi;
pub mod sim;

use async_trait::async_trait;
use rand::RngExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::snapshot::AircraftSnapshot;

/// Failures surfaced by a traffic source fetch
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("credential exchange failed: {0}")]
    Auth(String),
    #[error("response body not parseable: {0}")]
    Decode(String),
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
    #[error("source not configured")]
    Unconfigured,
}

impl FetchError {
    /// Server errors and rate limits are worth retrying, as are transport
    /// failures. Auth and decode failures will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status } => *status >= 500 || *status == 429,
            FetchError::Network(_) => true,
            FetchError::Auth(_)
            | FetchError::Decode(_)
            | FetchError::Exhausted { .. }
            | FetchError::Unconfigured => false,
        }
    }
}

/// Trait for sources of aircraft state batches
///
/// One call fetches one normalized batch, possibly empty. Implementations
/// drop single malformed records from an otherwise valid response rather
/// than failing the batch.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<AircraftSnapshot>, FetchError>;

    /// Short name for logs and metrics labels
    fn name(&self) -> &str;
}

/// Retry schedule: doubling backoff from an initial delay up to a cap,
/// plus uniform random jitter on every attempt so multiple deployments do
/// not resynchronize against a recovering upstream.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(800),
            max_backoff: Duration::from_secs(6),
            jitter: Duration::from_millis(400),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the schedule: delay before the retry that
    /// follows failed attempt `attempt` (1-based)
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = std::cmp::min(delay * 2, self.max_backoff);
        }
        delay
    }

    /// Full delay including jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = rand::rng().random_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Wraps any source with the retry budget. Retryable failures are retried
/// until the budget runs out, then surfaced as `Exhausted`; everything
/// else surfaces immediately.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: TrafficSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: TrafficSource> TrafficSource for RetryingSource<S> {
    async fn fetch(&self) -> Result<Vec<AircraftSnapshot>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch().await {
                Ok(batch) => {
                    if attempt > 1 {
                        debug!(
                            "{} fetch recovered on attempt {}",
                            self.inner.name(),
                            attempt
                        );
                    }
                    return Ok(batch);
                }
                Err(err) if !err.is_retryable() => {
                    metrics::counter!("traffic.fetch_failures_total", "source" => self.inner.name().to_string())
                        .increment(1);
                    return Err(err);
                }
                Err(err) if attempt >= self.policy.max_attempts => {
                    metrics::counter!("traffic.fetch_failures_total", "source" => self.inner.name().to_string())
                        .increment(1);
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "{} fetch attempt {}/{} failed: {}, retrying in {:?}",
                        self.inner.name(),
                        attempt,
                        self.policy.max_attempts,
                        err,
                        delay
                    );
                    metrics::counter!("traffic.fetch_retries_total", "source" => self.inner.name().to_string())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

struct FailoverState {
    consecutive_empty: u32,
    cooldown_until: Option<Instant>,
}

/// Primary/fallback orchestration.
///
/// Sustained emptiness from the primary is read as an upstream outage or
/// regional gap rather than genuinely empty airspace: after
/// `empty_cycle_threshold` consecutive successful-but-empty primary
/// fetches the fallback serves for `cooldown`, then the primary gets
/// another chance. A missing fallback degrades to empty batches during
/// the cooldown, never to an error. Failed fetches say nothing about
/// emptiness and leave the counter unchanged.
pub struct FailoverSource {
    primary: Box<dyn TrafficSource>,
    secondary: Option<Box<dyn TrafficSource>>,
    empty_cycle_threshold: u32,
    cooldown: Duration,
    state: Mutex<FailoverState>,
}

impl FailoverSource {
    pub fn new(
        primary: Box<dyn TrafficSource>,
        secondary: Option<Box<dyn TrafficSource>>,
        empty_cycle_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            empty_cycle_threshold: empty_cycle_threshold.max(1),
            cooldown,
            state: Mutex::new(FailoverState {
                consecutive_empty: 0,
                cooldown_until: None,
            }),
        }
    }

    async fn fetch_secondary(&self) -> Result<Vec<AircraftSnapshot>, FetchError> {
        match &self.secondary {
            Some(secondary) => secondary.fetch().await,
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl TrafficSource for FailoverSource {
    async fn fetch(&self) -> Result<Vec<AircraftSnapshot>, FetchError> {
        let mut state = self.state.lock().await;

        if let Some(until) = state.cooldown_until {
            if Instant::now() < until {
                return self.fetch_secondary().await;
            }
            debug!("failover cooldown expired, retrying primary");
            state.cooldown_until = None;
            state.consecutive_empty = 0;
        }

        match self.primary.fetch().await {
            Ok(batch) if batch.is_empty() => {
                state.consecutive_empty += 1;
                if state.consecutive_empty >= self.empty_cycle_threshold {
                    warn!(
                        "{} returned {} consecutive empty batches, serving from fallback for {:?}",
                        self.primary.name(),
                        state.consecutive_empty,
                        self.cooldown
                    );
                    metrics::counter!("traffic.failovers_total").increment(1);
                    state.cooldown_until = Some(Instant::now() + self.cooldown);
                    return self.fetch_secondary().await;
                }
                Ok(batch)
            }
            Ok(batch) => {
                state.consecutive_empty = 0;
                Ok(batch)
            }
            Err(err) => Err(err),
        }
    }

    fn name(&self) -> &str {
        "failover"
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub fn test_snapshot(hex: &str) -> AircraftSnapshot {
        AircraftSnapshot {
            hex: Some(hex.to_string()),
            callsign: None,
            latitude: 47.3,
            longitude: -122.3,
            altitude_ft: Some(5000.0),
            ground_speed_kt: Some(150.0),
            track_deg: Some(340.0),
            vertical_rate_fpm: Some(-600.0),
            seen_at: Utc::now(),
        }
    }

    /// Source that replays a scripted sequence of results. Once the script
    /// is exhausted it returns empty batches.
    pub struct ScriptedSource {
        name: &'static str,
        script: std::sync::Mutex<VecDeque<Result<Vec<AircraftSnapshot>, FetchError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        pub fn new(
            name: &'static str,
            script: Vec<Result<Vec<AircraftSnapshot>, FetchError>>,
        ) -> Self {
            Self {
                name,
                script: std::sync::Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrafficSource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<AircraftSnapshot>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        fn name(&self) -> &str {
            self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{ScriptedSource, test_snapshot};
    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(800),
            max_backoff: Duration::from_secs(6),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = fast_policy();
        assert_eq!(policy.base_backoff(1), Duration::from_millis(800));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(1600));
        assert_eq!(policy.base_backoff(3), Duration::from_millis(3200));
        // 6400 ms would exceed the cap
        assert_eq!(policy.base_backoff(4), Duration::from_secs(6));
        assert_eq!(policy.base_backoff(5), Duration::from_secs(6));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(400),
            ..fast_policy()
        };
        for _ in 0..200 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Status { status: 500 }.is_retryable());
        assert!(FetchError::Status { status: 503 }.is_retryable());
        assert!(FetchError::Status { status: 429 }.is_retryable());
        assert!(FetchError::Network("reset".to_string()).is_retryable());
        assert!(!FetchError::Status { status: 404 }.is_retryable());
        assert!(!FetchError::Auth("bad creds".to_string()).is_retryable());
        assert!(!FetchError::Decode("truncated".to_string()).is_retryable());
        assert!(!FetchError::Unconfigured.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failure() {
        let inner = ScriptedSource::new(
            "flaky",
            vec![
                Err(FetchError::Network("connection reset".to_string())),
                Err(FetchError::Status { status: 503 }),
                Ok(vec![test_snapshot("abc123")]),
            ],
        );
        let source = RetryingSource::new(inner, fast_policy());

        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget() {
        let inner = ScriptedSource::new(
            "down",
            vec![
                Err(FetchError::Status { status: 502 }),
                Err(FetchError::Status { status: 502 }),
                Err(FetchError::Status { status: 502 }),
                Err(FetchError::Status { status: 502 }),
            ],
        );
        let source = RetryingSource::new(inner, fast_policy());

        match source.fetch().await {
            Err(FetchError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, FetchError::Status { status: 502 }));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_surfaces_immediately() {
        let inner = ScriptedSource::new(
            "denied",
            vec![Err(FetchError::Auth("invalid client".to_string()))],
        );
        let source = RetryingSource::new(inner, fast_policy());

        assert!(matches!(source.fetch().await, Err(FetchError::Auth(_))));
        assert_eq!(source.inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_after_consecutive_empties() {
        let primary = ScriptedSource::new(
            "primary",
            vec![Ok(Vec::new()), Ok(Vec::new()), Ok(Vec::new())],
        );
        let secondary =
            ScriptedSource::new("secondary", vec![Ok(vec![test_snapshot("fa11ba")])]);
        let source = FailoverSource::new(
            Box::new(primary),
            Some(Box::new(secondary)),
            3,
            Duration::from_secs(120),
        );

        assert!(source.fetch().await.unwrap().is_empty());
        assert!(source.fetch().await.unwrap().is_empty());
        // Third consecutive empty trips the failover; this fetch is served
        // by the fallback
        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].hex.as_deref(), Some("fa11ba"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_cooldown_then_primary_again() {
        let primary = ScriptedSource::new(
            "primary",
            vec![
                Ok(Vec::new()),
                Ok(Vec::new()),
                Ok(Vec::new()),
                // After the cooldown the primary is healthy again
                Ok(vec![test_snapshot("abc123")]),
            ],
        );
        let secondary = ScriptedSource::new("secondary", vec![Ok(Vec::new()), Ok(Vec::new())]);
        let source = FailoverSource::new(
            Box::new(primary),
            Some(Box::new(secondary)),
            3,
            Duration::from_secs(120),
        );

        for _ in 0..3 {
            source.fetch().await.unwrap();
        }
        // Inside the cooldown window every fetch goes to the fallback
        assert!(source.fetch().await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(121)).await;

        // Cooldown over: the primary is consulted again and serves the batch
        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].hex.as_deref(), Some("abc123"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_without_secondary_degrades_to_empty() {
        let primary = ScriptedSource::new(
            "primary",
            vec![Ok(Vec::new()), Ok(Vec::new()), Ok(Vec::new())],
        );
        let source = FailoverSource::new(Box::new(primary), None, 3, Duration::from_secs(120));

        for _ in 0..2 {
            assert!(source.fetch().await.unwrap().is_empty());
        }
        // Tripped, no fallback configured: still an empty batch, not an error
        assert!(source.fetch().await.unwrap().is_empty());
        assert!(source.fetch().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_errors_leave_empty_run_counter_alone() {
        let primary = ScriptedSource::new(
            "primary",
            vec![
                Ok(Vec::new()),
                Err(FetchError::Status { status: 502 }),
                Ok(Vec::new()),
                Ok(Vec::new()),
            ],
        );
        let secondary =
            ScriptedSource::new("secondary", vec![Ok(vec![test_snapshot("fa11ba")])]);
        let source = FailoverSource::new(
            Box::new(primary),
            Some(Box::new(secondary)),
            3,
            Duration::from_secs(120),
        );

        assert!(source.fetch().await.unwrap().is_empty());
        assert!(source.fetch().await.is_err());
        assert!(source.fetch().await.unwrap().is_empty());
        // Third successful empty, despite the error in between
        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
