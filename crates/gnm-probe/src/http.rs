use std::time::{Duration, Instant};

use async_trait::async_trait;
use gnm_common::types::{CheckKind, Meta};

use crate::{
    classify_latency, elapsed_ms, CheckResult, CheckTarget, Probe, ProbeTimeouts, Thresholds,
};

pub(crate) const USER_AGENT: &str = concat!("GNM-Collector/", env!("CARGO_PKG_VERSION"));

/// HTTP(S) GET check. Follows redirects; latency covers the full request
/// including the body read. 5xx and transport errors are hard failures,
/// 4xx is degraded.
pub struct HttpProbe {
    client: reqwest::Client,
    warn_ms: u64,
    very_slow_ms: u64,
}

impl HttpProbe {
    pub fn new(timeouts: &ProbeTimeouts, thresholds: &Thresholds) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeouts.http_timeout_sec))
            .build()?;
        Ok(Self {
            client,
            warn_ms: thresholds.http_warn_ms,
            very_slow_ms: thresholds.http_very_slow_ms,
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::Http
    }

    async fn run(&self, target: &CheckTarget) -> CheckResult {
        let url = match target {
            CheckTarget::Http { url } => url,
            other => {
                return CheckResult::internal_error(format!("http probe got {other:?}"));
            }
        };

        let mut meta = Meta::new();
        let start = Instant::now();

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_timeout() {
                    meta.insert("reason".into(), "timeout".into());
                }
                return CheckResult::hard_fail(elapsed_ms(start), meta, e);
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        // Drain the body so latency covers the complete exchange.
        let body = response.bytes().await;
        let latency_ms = elapsed_ms(start);

        meta.insert("http_status".into(), status.as_u16().into());
        meta.insert("final_url".into(), final_url.into());

        if let Err(e) = body {
            if e.is_timeout() {
                meta.insert("reason".into(), "timeout".into());
            }
            return CheckResult::hard_fail(latency_ms, meta, e);
        }

        if status.is_server_error() {
            meta.insert("reason".into(), "http_5xx".into());
            return CheckResult::hard_fail(latency_ms, meta, format!("http status {status}"));
        }

        if status.is_client_error() {
            meta.insert("reason".into(), "http_4xx".into());
            return CheckResult::degraded(latency_ms, meta);
        }

        classify_latency(latency_ms, self.warn_ms, self.very_slow_ms, "slow_http", meta)
    }
}
