mod classifier;
mod config;
mod error;
mod identity;
mod logging;
mod metrics;
mod scheduler;

use std::sync::Arc;

use gnm_probe::ProbeSet;
use gnm_storage::MeasurementStore;
use tokio::sync::watch;

use crate::config::ConfigSnapshot;
use crate::error::FatalError;
use crate::scheduler::{Lifecycle, Scheduler};

const DEFAULT_CONFIG_PATH: &str = "config/collector.toml";

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  gnm-collector [config.toml]         Run collection cycles continuously");
    eprintln!("  gnm-collector once [config.toml]    Run exactly one cycle and exit");
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let (once, config_path) = match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_usage();
            return;
        }
        Some("once") => (
            true,
            args.get(2).cloned().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
        ),
        Some(path) => (false, path.to_string()),
        None => (false, DEFAULT_CONFIG_PATH.to_string()),
    };

    std::process::exit(run(once, &config_path).await);
}

async fn run(once: bool, config_path: &str) -> i32 {
    // Fails only when a provider is already installed, which is harmless.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Config must load before logging so the file sink location is known;
    // a config failure falls back to console-only logging for its report.
    let snapshot = match ConfigSnapshot::load(config_path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let _ = logging::init(None);
            tracing::error!(error = %e, config = config_path, "Fatal configuration error");
            return FatalError::Config(e).exit_code();
        }
    };

    let _log_guard = match logging::init(snapshot.config.log.dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return FatalError::Internal(e).exit_code();
        }
    };

    tracing::info!(
        state = %Lifecycle::Starting,
        config = config_path,
        db = %snapshot.config.db.redacted_url(),
        hosts = snapshot.hosts.len(),
        services = snapshot.services.len(),
        enabled = snapshot.enabled_services().count(),
        "gnm-collector starting"
    );
    for warning in &snapshot.warnings {
        tracing::warn!("{warning}");
    }

    match run_collector(once, snapshot).await {
        Ok(()) => {
            tracing::info!(state = %Lifecycle::Stopped, "Collector stopped");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal collector error");
            e.exit_code()
        }
    }
}

async fn run_collector(once: bool, snapshot: ConfigSnapshot) -> Result<(), FatalError> {
    let snapshot = Arc::new(snapshot);

    // Identity first: it is stamped into every measurement of this run.
    let identity = identity::resolve(&snapshot.config.region).await;
    tracing::info!(
        region = %identity.region,
        country = identity.country.as_deref().unwrap_or("-"),
        city = identity.city.as_deref().unwrap_or("-"),
        public_ip = identity.public_ip.as_deref().unwrap_or("-"),
        source = %identity.source,
        "Probe identity resolved"
    );

    let probes = Arc::new(
        ProbeSet::new(
            snapshot.config.collector.timeouts,
            snapshot.config.collector.thresholds,
        )
        .map_err(FatalError::Internal)?,
    );

    let url = snapshot
        .config
        .db
        .connection_url()
        .map_err(FatalError::Config)?;
    let store = MeasurementStore::connect(&url, &snapshot.config.db.pool_options())
        .await
        .map_err(|e| FatalError::Datastore(e.to_string()))?;
    store
        .ping()
        .await
        .map_err(|e| FatalError::Datastore(format!("datastore not reachable: {e}")))?;
    let store = Arc::new(store);

    let collector_metrics = if metrics::enabled_from_env() {
        let m = Arc::new(metrics::CollectorMetrics::new().map_err(FatalError::Internal)?);
        let port = snapshot.config.metrics.port;
        let served = m.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(served, port).await {
                tracing::error!(error = %e, "Metrics exporter failed");
            }
        });
        Some(m)
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!(state = %Lifecycle::Draining, "Termination signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut scheduler = Scheduler::new(
        snapshot,
        probes,
        store.clone(),
        identity,
        collector_metrics,
        shutdown_rx,
    );
    scheduler.run(once).await?;
    drop(scheduler);

    // Last cycle is flushed; release the pool before reporting Stopped.
    if let Ok(store) = Arc::try_unwrap(store) {
        if let Err(e) = store.close().await {
            tracing::warn!(error = %e, "Failed to close datastore pool cleanly");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
