mod api;
mod config;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use gnm_common::types::{HostSpec, ServiceSpec};
use gnm_storage::MeasurementStore;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gnm=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/api.toml".to_string());
    let config = config::ApiConfig::load(&config_path)?;

    let url = config.db.connection_url()?;
    let store = MeasurementStore::connect(&url, &config.db.pool_options()).await?;

    let hosts = load_hosts(&config.hosts_file)?;
    let services = load_services(&config.services_file)?;
    tracing::info!(
        http_port = config.http_port,
        hosts = hosts.len(),
        services = services.len(),
        "gnm-api starting"
    );

    let state = AppState {
        store: Arc::new(store),
        hosts: Arc::new(hosts),
        services: Arc::new(services),
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Read API listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await?;

    Ok(())
}

fn load_hosts(path: &str) -> Result<HashMap<String, HostSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("hosts file not found: {path}"))?;
    let hosts: Vec<HostSpec> =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {path}"))?;
    Ok(hosts.into_iter().map(|h| (h.host_id.clone(), h)).collect())
}

fn load_services(path: &str) -> Result<Vec<ServiceSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("services file not found: {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {path}"))
}
