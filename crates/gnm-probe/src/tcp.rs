use std::time::{Duration, Instant};

use async_trait::async_trait;
use gnm_common::types::{CheckKind, Meta};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{
    classify_latency, elapsed_ms, CheckResult, CheckTarget, Probe, ProbeTimeouts, Thresholds,
};

/// TCP connect check. Latency is the connect time only; the socket is
/// dropped as soon as the connection is established.
pub struct TcpProbe {
    connect_timeout: Duration,
    warn_ms: u64,
    very_slow_ms: u64,
}

impl TcpProbe {
    pub fn new(timeouts: &ProbeTimeouts, thresholds: &Thresholds) -> Self {
        Self {
            connect_timeout: Duration::from_secs(timeouts.tcp_timeout_sec),
            warn_ms: thresholds.tcp_warn_ms,
            very_slow_ms: thresholds.tcp_very_slow_ms,
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::Tcp
    }

    async fn run(&self, target: &CheckTarget) -> CheckResult {
        let (host, port) = match target {
            CheckTarget::Tcp { host, port } => (host, *port),
            other => {
                return CheckResult::internal_error(format!("tcp probe got {other:?}"));
            }
        };

        let mut meta = Meta::new();
        meta.insert("port".into(), port.into());

        let addr = format!("{host}:{port}");
        let start = Instant::now();

        match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => classify_latency(
                elapsed_ms(start),
                self.warn_ms,
                self.very_slow_ms,
                "slow_tcp",
                meta,
            ),
            Ok(Err(e)) => CheckResult::hard_fail(elapsed_ms(start), meta, e),
            Err(_) => {
                meta.insert("reason".into(), "timeout".into());
                CheckResult::hard_fail(elapsed_ms(start), meta, "connect timeout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProbeOutcome;

    fn probe() -> TcpProbe {
        TcpProbe::new(&ProbeTimeouts::default(), &Thresholds::default())
    }

    #[tokio::test]
    async fn open_port_reports_ok() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe()
            .run(&CheckTarget::Tcp {
                host: "127.0.0.1".into(),
                port,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::Ok);
        assert_eq!(result.meta["port"], port);
    }

    #[tokio::test]
    async fn closed_port_is_a_hard_failure() {
        // Bind then drop to find a port that is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = probe()
            .run(&CheckTarget::Tcp {
                host: "127.0.0.1".into(),
                port,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::HardFail);
        assert!(result.meta.contains_key("error"));
    }
}
