//! Poll orchestration. One task drives the whole ingest side: fetch a
//! batch, classify every snapshot, feed the store, relay whatever events
//! fall out. A failed cycle is logged and contained; the next cycle is
//! always scheduled, and cycles never overlap because one loop runs them
//! sequentially.

use rand::RngExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::alert_store::AlertStore;
use crate::classifier;
use crate::config::{AirportConfig, PollConfig};
use crate::notify::NotificationSink;
use crate::traffic::TrafficSource;

/// Hard floor on the poll interval. A misconfigured interval must not turn
/// into a tight loop against the upstream.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Landed records older than this are swept out each cycle
const LANDED_RETENTION_HOURS: i64 = 6;

pub struct Poller {
    source: Arc<dyn TrafficSource>,
    store: Arc<AlertStore>,
    sink: Arc<dyn NotificationSink>,
    airport: AirportConfig,
    interval: Duration,
    jitter: Duration,
}

impl Poller {
    pub fn new(
        source: Arc<dyn TrafficSource>,
        store: Arc<AlertStore>,
        sink: Arc<dyn NotificationSink>,
        airport: AirportConfig,
        poll: &PollConfig,
    ) -> Self {
        Self {
            source,
            store,
            sink,
            airport,
            interval: Duration::from_secs(poll.interval_seconds),
            jitter: Duration::from_secs(poll.jitter_seconds),
        }
    }

    /// Drive cycles forever. Callers spawn this and abort the task on
    /// shutdown.
    pub async fn run(self) {
        info!(
            "poll loop started: interval {:?}, jitter ±{:?}, floor {:?}",
            self.interval.max(MIN_POLL_INTERVAL),
            self.jitter,
            MIN_POLL_INTERVAL
        );
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.next_delay()).await;
        }
    }

    /// One fetch-classify-observe-notify pass
    pub async fn run_cycle(&self) {
        let started = Instant::now();
        metrics::counter!("poller.cycles_total").increment(1);

        match self.source.fetch().await {
            Ok(batch) => {
                debug!("cycle fetched {} aircraft", batch.len());
                metrics::counter!("poller.aircraft_observed_total")
                    .increment(batch.len() as u64);
                for snapshot in &batch {
                    let key = snapshot.flight_key();
                    let landed = classifier::is_landed(snapshot, &self.airport);
                    // Landing takes precedence; a landed aircraft never
                    // reaches the approach classifier in the same cycle.
                    let approaching =
                        !landed && classifier::is_approaching(snapshot, &self.airport);
                    let event = self.store.observe(key, snapshot, approaching, landed).await;
                    if let Some(event) = event {
                        self.sink.notify(event).await;
                    }
                }
            }
            Err(err) => {
                warn!("poll cycle fetch failed: {}", err);
                metrics::counter!("poller.cycle_failures_total").increment(1);
            }
        }

        self.store
            .prune_landed(chrono::Duration::hours(LANDED_RETENTION_HOURS))
            .await;
        metrics::histogram!("poller.cycle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
    }

    /// Interval with the floor applied, plus bounded uniform jitter. The
    /// result never dips below the floor.
    fn next_delay(&self) -> Duration {
        let base = self.interval.max(MIN_POLL_INTERVAL);
        let jitter_ms = self.jitter.as_millis() as i64;
        if jitter_ms == 0 {
            return base;
        }
        let offset = rand::rng().random_range(-jitter_ms..=jitter_ms);
        let floor_ms = MIN_POLL_INTERVAL.as_millis() as i64;
        Duration::from_millis((base.as_millis() as i64 + offset).max(floor_ms) as u64)
    }
}
