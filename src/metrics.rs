use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize Prometheus metrics exporter
/// Returns a handle that can be used to render metrics for scraping
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        // Poll cycles are dominated by one upstream round trip, so the
        // buckets run from fast-LAN to retried-and-backed-off territory
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "poller.cycle_duration_seconds".to_string(),
            ),
            &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .expect("failed to set buckets for poller.cycle_duration_seconds")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Background task to update process metrics
/// Updates uptime and memory usage metrics every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        if let Some(bytes) = resident_memory_bytes() {
            metrics::gauge!("process.memory.bytes").set(bytes);
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// RSS from /proc on Linux, absent elsewhere
fn resident_memory_bytes() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if line.starts_with("VmRSS:")
                && let Some(kb_str) = line.split_whitespace().nth(1)
                && let Ok(kb) = kb_str.parse::<f64>()
            {
                return Some(kb * 1024.0);
            }
        }
    }
    None
}

/// Initialize alert engine metrics to zero/default values
/// This ensures metrics always appear in Prometheus queries even if no
/// events have occurred. `sources` are the upstream names wired at startup.
pub fn initialize_alert_metrics(sources: &[String]) {
    // Poll cycle metrics
    metrics::counter!("poller.cycles_total").absolute(0);
    metrics::counter!("poller.cycle_failures_total").absolute(0);
    metrics::counter!("poller.aircraft_observed_total").absolute(0);

    // Upstream traffic metrics, labelled per source
    for source in sources {
        metrics::counter!("traffic.fetch_failures_total", "source" => source.to_string())
            .absolute(0);
        metrics::counter!("traffic.fetch_retries_total", "source" => source.to_string())
            .absolute(0);
        metrics::counter!("traffic.rows_dropped_total", "source" => source.to_string())
            .absolute(0);
    }
    metrics::counter!("traffic.failovers_total").absolute(0);

    // Alert lifecycle metrics
    metrics::counter!("alerts.approach_total").absolute(0);
    metrics::counter!("alerts.landed_total").absolute(0);
    metrics::counter!("alerts.acknowledged_total").absolute(0);
    metrics::counter!("alerts.ack_unknown_total").absolute(0);
    metrics::gauge!("alerts.alerting").set(0.0);
    metrics::gauge!("alerts.acknowledged").set(0.0);
    metrics::gauge!("alerts.landed").set(0.0);

    // Notification fan-out metrics
    metrics::counter!("notify.events_total").absolute(0);
    metrics::counter!("notify.dropped_total").absolute(0);
    metrics::counter!("notify.lagged_total").absolute(0);
}

/// Start a standalone metrics server on the specified port
/// The recorder is installed and zeroed here, before the listener comes up,
/// so a scrape never races the first increment.
pub async fn start_metrics_server(port: u16, sources: Vec<String>) {
    let handle = init_metrics();
    METRICS_HANDLE
        .set(handle)
        .expect("Metrics handle already initialized");

    initialize_alert_metrics(&sources);

    // Start process metrics background task
    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(|| async {
            let handle = METRICS_HANDLE.get().expect("Metrics handle not initialized");
            handle.render()
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind metrics server");

    axum::serve(listener, app)
        .await
        .expect("Metrics server failed");
}
