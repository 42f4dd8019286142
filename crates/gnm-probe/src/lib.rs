//! The six network check probes behind a single dispatch table.
//!
//! Each probe measures latency strictly at its own I/O boundary and encodes
//! every failure into a [`CheckResult`] instead of returning an error, so
//! one misbehaving target can never abort a collection cycle.

pub mod dns;
pub mod http;
pub mod json_api;
pub mod ping;
pub mod ssl_cert;
pub mod tcp;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gnm_common::types::{CheckKind, Meta};
use serde::Deserialize;

/// Raw probe verdict, before the two-strike confirmation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    /// Alive but degraded (high latency, 4xx, near-expiry certificate).
    Degraded,
    /// Unambiguous down signal, subject to two-strike confirmation.
    HardFail,
    /// Non-transient down signal (expired certificate); escalates
    /// immediately without waiting for a second strike.
    ConfirmedFail,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
    pub meta: Meta,
}

impl CheckResult {
    pub fn ok(latency_ms: u64, meta: Meta) -> Self {
        Self {
            outcome: ProbeOutcome::Ok,
            latency_ms,
            meta,
        }
    }

    pub fn degraded(latency_ms: u64, meta: Meta) -> Self {
        Self {
            outcome: ProbeOutcome::Degraded,
            latency_ms,
            meta,
        }
    }

    pub fn hard_fail(latency_ms: u64, mut meta: Meta, error: impl ToString) -> Self {
        meta.insert("error".into(), error.to_string().into());
        Self {
            outcome: ProbeOutcome::HardFail,
            latency_ms,
            meta,
        }
    }

    pub fn internal_error(error: impl ToString) -> Self {
        let mut meta = Meta::new();
        meta.insert("internal_error".into(), error.to_string().into());
        Self {
            outcome: ProbeOutcome::HardFail,
            latency_ms: 0,
            meta,
        }
    }
}

/// Fully-resolved input for one probe execution, built by the scheduler
/// from the service and host catalogs.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckTarget {
    Ping {
        host: String,
    },
    Http {
        url: String,
    },
    Dns {
        name: String,
        record: RecordKind,
    },
    Tcp {
        host: String,
        port: u16,
    },
    SslCert {
        host: String,
        port: u16,
    },
    JsonApi {
        url: String,
        expect_field: Option<String>,
        expect_equals: Option<serde_json::Value>,
    },
}

/// DNS record types the dns probe can query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    A,
    Aaaa,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::A => "A",
            RecordKind::Aaaa => "AAAA",
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordKind::A),
            "AAAA" => Ok(RecordKind::Aaaa),
            _ => Err(format!("unsupported DNS record type: {s}")),
        }
    }
}

/// Per-check-type probe timeouts, in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProbeTimeouts {
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_sec: u64,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_sec: u64,
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_sec: u64,
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout_sec: u64,
}

fn default_ping_timeout() -> u64 {
    2
}

fn default_http_timeout() -> u64 {
    10
}

fn default_dns_timeout() -> u64 {
    3
}

fn default_tcp_timeout() -> u64 {
    5
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            ping_timeout_sec: default_ping_timeout(),
            http_timeout_sec: default_http_timeout(),
            dns_timeout_sec: default_dns_timeout(),
            tcp_timeout_sec: default_tcp_timeout(),
        }
    }
}

impl ProbeTimeouts {
    /// Timeout budget for one probe of the given kind. The TLS check shares
    /// the tcp budget, the JSON API check shares the http budget.
    pub fn for_kind(&self, kind: CheckKind) -> Duration {
        let secs = match kind {
            CheckKind::Ping => self.ping_timeout_sec,
            CheckKind::Http | CheckKind::JsonApi => self.http_timeout_sec,
            CheckKind::Dns => self.dns_timeout_sec,
            CheckKind::Tcp | CheckKind::SslCert => self.tcp_timeout_sec,
        };
        Duration::from_secs(secs)
    }
}

/// Latency thresholds that turn a successful probe into a degraded one.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_ping_warn_ms")]
    pub ping_warn_ms: u64,
    #[serde(default = "default_ping_very_slow_ms")]
    pub ping_very_slow_ms: u64,
    #[serde(default = "default_http_warn_ms")]
    pub http_warn_ms: u64,
    #[serde(default = "default_http_very_slow_ms")]
    pub http_very_slow_ms: u64,
    #[serde(default = "default_dns_warn_ms")]
    pub dns_warn_ms: u64,
    #[serde(default = "default_tcp_warn_ms")]
    pub tcp_warn_ms: u64,
    #[serde(default = "default_tcp_very_slow_ms")]
    pub tcp_very_slow_ms: u64,
    #[serde(default = "default_json_warn_ms")]
    pub json_warn_ms: u64,
    #[serde(default = "default_json_very_slow_ms")]
    pub json_very_slow_ms: u64,
    #[serde(default = "default_ssl_warn_days")]
    pub ssl_warn_days: i64,
}

fn default_ping_warn_ms() -> u64 {
    500
}

fn default_ping_very_slow_ms() -> u64 {
    1500
}

fn default_http_warn_ms() -> u64 {
    8000
}

fn default_http_very_slow_ms() -> u64 {
    20000
}

fn default_dns_warn_ms() -> u64 {
    1200
}

fn default_tcp_warn_ms() -> u64 {
    1500
}

fn default_tcp_very_slow_ms() -> u64 {
    4000
}

fn default_json_warn_ms() -> u64 {
    8000
}

fn default_json_very_slow_ms() -> u64 {
    20000
}

fn default_ssl_warn_days() -> i64 {
    14
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ping_warn_ms: default_ping_warn_ms(),
            ping_very_slow_ms: default_ping_very_slow_ms(),
            http_warn_ms: default_http_warn_ms(),
            http_very_slow_ms: default_http_very_slow_ms(),
            dns_warn_ms: default_dns_warn_ms(),
            tcp_warn_ms: default_tcp_warn_ms(),
            tcp_very_slow_ms: default_tcp_very_slow_ms(),
            json_warn_ms: default_json_warn_ms(),
            json_very_slow_ms: default_json_very_slow_ms(),
            ssl_warn_days: default_ssl_warn_days(),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> CheckKind;
    async fn run(&self, target: &CheckTarget) -> CheckResult;
}

/// Dispatch table over the six probe implementations, keyed by check kind.
pub struct ProbeSet {
    probes: HashMap<CheckKind, Box<dyn Probe>>,
    timeouts: ProbeTimeouts,
}

impl ProbeSet {
    pub fn new(timeouts: ProbeTimeouts, thresholds: Thresholds) -> anyhow::Result<Self> {
        let mut probes: HashMap<CheckKind, Box<dyn Probe>> = HashMap::new();
        probes.insert(
            CheckKind::Ping,
            Box::new(ping::PingProbe::new(&timeouts, &thresholds)),
        );
        probes.insert(
            CheckKind::Http,
            Box::new(http::HttpProbe::new(&timeouts, &thresholds)?),
        );
        probes.insert(
            CheckKind::Dns,
            Box::new(dns::DnsProbe::new(&timeouts, &thresholds)?),
        );
        probes.insert(
            CheckKind::Tcp,
            Box::new(tcp::TcpProbe::new(&timeouts, &thresholds)),
        );
        probes.insert(
            CheckKind::SslCert,
            Box::new(ssl_cert::SslCertProbe::new(&timeouts, &thresholds)),
        );
        probes.insert(
            CheckKind::JsonApi,
            Box::new(json_api::JsonApiProbe::new(&timeouts, &thresholds)?),
        );
        Ok(Self { probes, timeouts })
    }

    pub async fn run(&self, kind: CheckKind, target: &CheckTarget) -> CheckResult {
        match self.probes.get(&kind) {
            Some(probe) => probe.run(target).await,
            None => CheckResult::internal_error(format!("no probe registered for {kind}")),
        }
    }

    pub fn timeout_for(&self, kind: CheckKind) -> Duration {
        self.timeouts.for_kind(kind)
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Shared success-path classification: latency above the warn threshold
/// degrades the result, above the very-slow threshold it is tagged harder.
pub(crate) fn classify_latency(
    latency_ms: u64,
    warn_ms: u64,
    very_slow_ms: u64,
    reason: &str,
    mut meta: Meta,
) -> CheckResult {
    if latency_ms < warn_ms {
        return CheckResult::ok(latency_ms, meta);
    }
    meta.insert("reason".into(), reason.into());
    let slow = if latency_ms >= very_slow_ms { "very" } else { "yes" };
    meta.insert("slow".into(), slow.into());
    CheckResult::degraded(latency_ms, meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_classification_bands() {
        let ok = classify_latency(100, 500, 1500, "slow_ping", Meta::new());
        assert_eq!(ok.outcome, ProbeOutcome::Ok);
        assert!(!ok.meta.contains_key("slow"));

        let warn = classify_latency(700, 500, 1500, "slow_ping", Meta::new());
        assert_eq!(warn.outcome, ProbeOutcome::Degraded);
        assert_eq!(warn.meta["slow"], "yes");
        assert_eq!(warn.meta["reason"], "slow_ping");

        let very = classify_latency(2000, 500, 1500, "slow_ping", Meta::new());
        assert_eq!(very.outcome, ProbeOutcome::Degraded);
        assert_eq!(very.meta["slow"], "very");
    }

    #[test]
    fn warn_threshold_boundary_is_inclusive() {
        let at = classify_latency(500, 500, 1500, "slow_tcp", Meta::new());
        assert_eq!(at.outcome, ProbeOutcome::Degraded);
        assert_eq!(at.meta["slow"], "yes");
    }

    #[test]
    fn record_kind_parsing() {
        assert_eq!("a".parse::<RecordKind>().unwrap(), RecordKind::A);
        assert_eq!("AAAA".parse::<RecordKind>().unwrap(), RecordKind::Aaaa);
        assert!("MX".parse::<RecordKind>().is_err());
    }

    #[test]
    fn timeouts_map_shared_budgets() {
        let t = ProbeTimeouts::default();
        assert_eq!(
            t.for_kind(CheckKind::SslCert),
            Duration::from_secs(t.tcp_timeout_sec)
        );
        assert_eq!(
            t.for_kind(CheckKind::JsonApi),
            Duration::from_secs(t.http_timeout_sec)
        );
    }

    #[tokio::test]
    async fn unmatched_target_yields_internal_error() {
        let set = ProbeSet::new(ProbeTimeouts::default(), Thresholds::default()).unwrap();
        let result = set
            .run(
                CheckKind::Tcp,
                &CheckTarget::Ping {
                    host: "localhost".into(),
                },
            )
            .await;
        assert_eq!(result.outcome, ProbeOutcome::HardFail);
        assert!(result.meta.contains_key("internal_error"));
    }
}
