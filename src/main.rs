use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use glidepath::alert_store::AlertStore;
use glidepath::config::{self, Config};
use glidepath::metrics;
use glidepath::notify::{BroadcastHub, DEFAULT_HUB_CAPACITY, NotificationSink};
use glidepath::poller::Poller;
use glidepath::traffic::opensky::OpenSkySource;
use glidepath::traffic::rapidapi::RapidApiSource;
use glidepath::traffic::sim::SimSource;
use glidepath::traffic::{FailoverSource, RetryPolicy, RetryingSource, TrafficSource};
use glidepath::web;

#[derive(Parser, Debug)]
#[command(
    name = "glidepath",
    about = "Approach alerting for a configured airport from live traffic feeds",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generate synthetic traffic instead of querying upstream feeds
    #[arg(long)]
    simulate: bool,

    /// Seed for synthetic traffic generation
    #[arg(long, requires = "simulate")]
    seed: Option<u64>,

    /// Listen port override
    #[arg(short, long)]
    port: Option<u16>,
}

/// Build the traffic source stack: simulation, or retried OpenSky with
/// retried ADS-B Exchange behind it when a RapidAPI key is configured.
/// Returns the source names for metrics pre-registration alongside.
fn build_source(config: &Config, seed: Option<u64>) -> (Arc<dyn TrafficSource>, Vec<String>) {
    if config.simulate {
        let seed = seed.unwrap_or_else(rand::random);
        info!("simulated traffic enabled (seed {})", seed);
        let source = SimSource::new(&config.airport, seed);
        return (Arc::new(source), vec!["sim".to_string()]);
    }

    let policy = RetryPolicy::from(&config.retry);
    let primary: Box<dyn TrafficSource> = Box::new(RetryingSource::new(
        OpenSkySource::new(config.opensky.clone(), &config.airport),
        policy,
    ));

    let mut names = vec!["opensky".to_string()];
    let secondary: Option<Box<dyn TrafficSource>> = if config.rapidapi.api_key.is_some() {
        names.push("rapidapi".to_string());
        Some(Box::new(RetryingSource::new(
            RapidApiSource::new(config.rapidapi.clone(), &config.airport),
            policy,
        )))
    } else {
        info!("no RapidAPI key configured, running without a fallback feed");
        None
    };

    let source = FailoverSource::new(
        primary,
        secondary,
        config.failover.empty_cycle_threshold,
        Duration::from_secs(config.failover.cooldown_seconds),
    );
    (Arc::new(source), names)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT (Ctrl+C), shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), shutting down");
            }
            Err(err) => {
                error!("Failed to listen for SIGINT signal: {}", err);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(config::config_path);
    let mut config = Config::resolve(&config_path)?;
    if cli.simulate {
        config.simulate = true;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!(
        "glidepath starting for {} at ({:.4}, {:.4}), radius {} km, ceiling {} ft",
        config.airport.ident,
        config.airport.latitude,
        config.airport.longitude,
        config.airport.radius_km,
        config.airport.altitude_ceiling_ft,
    );

    let (source, source_names) = build_source(&config, cli.seed);

    // Metrics exporter lives on its own port so scrapes never mix with the
    // public surface
    let metrics_port = config.server.metrics_port;
    tokio::spawn(async move {
        metrics::start_metrics_server(metrics_port, source_names).await;
    });

    let store = Arc::new(AlertStore::new());
    let hub = Arc::new(BroadcastHub::new(DEFAULT_HUB_CAPACITY));
    let sink: Arc<dyn NotificationSink> = hub.clone();

    let poller = Poller::new(
        source,
        store.clone(),
        sink,
        config.airport.clone(),
        &config.poll,
    );
    let poller_task = tokio::spawn(poller.run());

    let web_task = tokio::spawn(web::start_web_server(
        config.server.interface.clone(),
        config.server.port,
        store,
        hub,
    ));

    tokio::select! {
        _ = shutdown_signal() => {}
        result = web_task => {
            match result {
                Ok(Ok(())) => info!("web server exited"),
                Ok(Err(e)) => error!("web server failed: {:#}", e),
                Err(e) => error!("web server task failed: {}", e),
            }
        }
        _ = poller_task => {
            error!("poll loop exited unexpectedly");
        }
    }

    info!("glidepath stopped");
    Ok(())
}
