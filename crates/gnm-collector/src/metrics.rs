use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use gnm_common::types::{CheckKind, CheckStatus};
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub const ENV_PROMETHEUS: &str = "GNM_PROMETHEUS";

/// Whether the exporter should be initialized at all. When this returns
/// false nothing is registered and no port is bound.
pub fn enabled_from_env() -> bool {
    std::env::var(ENV_PROMETHEUS).map(|v| v == "1").unwrap_or(false)
}

/// Self-metrics of the collector process.
pub struct CollectorMetrics {
    registry: Registry,
    checks_total: IntCounterVec,
    check_duration: HistogramVec,
    cycle_duration: Histogram,
    uptime: IntGauge,
    started_at: Instant,
}

impl CollectorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let checks_total = IntCounterVec::new(
            Opts::new("gnm_checks_total", "Completed checks by type and status"),
            &["type", "status"],
        )?;
        let check_duration = HistogramVec::new(
            HistogramOpts::new("gnm_check_duration_seconds", "Probe latency by check type")
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ]),
            &["type"],
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new("gnm_cycle_duration_seconds", "Full collection cycle duration")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        let uptime = IntGauge::new("gnm_uptime_seconds", "Collector process uptime")?;

        registry.register(Box::new(checks_total.clone()))?;
        registry.register(Box::new(check_duration.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            registry,
            checks_total,
            check_duration,
            cycle_duration,
            uptime,
            started_at: Instant::now(),
        })
    }

    pub fn observe_check(&self, kind: CheckKind, status: CheckStatus, latency_ms: u64) {
        self.checks_total
            .with_label_values(&[kind.as_str(), status.as_str()])
            .inc();
        self.check_duration
            .with_label_values(&[kind.as_str()])
            .observe(latency_ms as f64 / 1000.0);
    }

    pub fn observe_cycle(&self, duration: Duration) {
        self.cycle_duration.observe(duration.as_secs_f64());
    }

    pub fn render(&self) -> String {
        self.uptime.set(self.started_at.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

async fn metrics_handler(State(metrics): State<Arc<CollectorMetrics>>) -> String {
    metrics.render()
}

/// Serve `/metrics` until the process exits.
pub async fn serve(metrics: Arc<CollectorMetrics>, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Metrics exporter listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_checks_show_up_in_the_rendered_text() {
        let metrics = CollectorMetrics::new().unwrap();
        metrics.observe_check(CheckKind::Http, CheckStatus::Ok, 50);
        metrics.observe_check(CheckKind::Http, CheckStatus::Warn, 4000);
        metrics.observe_cycle(Duration::from_millis(1500));

        let text = metrics.render();
        assert!(text.contains("gnm_checks_total{status=\"ok\",type=\"http\"} 1"));
        assert!(text.contains("gnm_checks_total{status=\"warn\",type=\"http\"} 1"));
        assert!(text.contains("gnm_check_duration_seconds"));
        assert!(text.contains("gnm_cycle_duration_seconds"));
        assert!(text.contains("gnm_uptime_seconds"));
    }

    #[test]
    fn env_flag_gates_the_exporter() {
        std::env::remove_var(ENV_PROMETHEUS);
        assert!(!enabled_from_env());
        std::env::set_var(ENV_PROMETHEUS, "0");
        assert!(!enabled_from_env());
        std::env::set_var(ENV_PROMETHEUS, "1");
        assert!(enabled_from_env());
        std::env::remove_var(ENV_PROMETHEUS);
    }
}
