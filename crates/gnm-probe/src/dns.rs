use std::time::{Duration, Instant};

use async_trait::async_trait;
use gnm_common::types::{CheckKind, Meta};
use hickory_resolver::TokioResolver;
use tokio::time::timeout;

use crate::{
    classify_latency, elapsed_ms, CheckResult, CheckTarget, Probe, ProbeTimeouts, RecordKind,
    Thresholds,
};

/// Answers recorded in meta are capped; the full set can be large for
/// round-robin records and adds nothing to the health signal.
const MAX_META_ANSWERS: usize = 8;

/// DNS resolution check against the system default resolver.
/// NXDOMAIN, SERVFAIL, timeouts and empty answers are hard failures.
pub struct DnsProbe {
    resolver: TokioResolver,
    lookup_timeout: Duration,
    warn_ms: u64,
}

impl DnsProbe {
    pub fn new(timeouts: &ProbeTimeouts, thresholds: &Thresholds) -> anyhow::Result<Self> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| anyhow::anyhow!("failed to build DNS resolver: {e}"))?
            .build();
        Ok(Self {
            resolver,
            lookup_timeout: Duration::from_secs(timeouts.dns_timeout_sec),
            warn_ms: thresholds.dns_warn_ms,
        })
    }

    async fn lookup(&self, name: &str, record: RecordKind) -> Result<Vec<String>, String> {
        match record {
            RecordKind::A => self
                .resolver
                .ipv4_lookup(name)
                .await
                .map(|response| response.iter().map(|a| a.0.to_string()).collect())
                .map_err(|e| e.to_string()),
            RecordKind::Aaaa => self
                .resolver
                .ipv6_lookup(name)
                .await
                .map(|response| response.iter().map(|a| a.0.to_string()).collect())
                .map_err(|e| e.to_string()),
        }
    }
}

#[async_trait]
impl Probe for DnsProbe {
    fn kind(&self) -> CheckKind {
        CheckKind::Dns
    }

    async fn run(&self, target: &CheckTarget) -> CheckResult {
        let (name, record) = match target {
            CheckTarget::Dns { name, record } => (name, *record),
            other => {
                return CheckResult::internal_error(format!("dns probe got {other:?}"));
            }
        };

        let mut meta = Meta::new();
        meta.insert("resolver".into(), "system".into());
        meta.insert("record".into(), record.as_str().into());

        let start = Instant::now();
        let answers = match timeout(self.lookup_timeout, self.lookup(name, record)).await {
            Ok(Ok(answers)) => answers,
            Ok(Err(e)) => {
                return CheckResult::hard_fail(elapsed_ms(start), meta, e);
            }
            Err(_) => {
                meta.insert("reason".into(), "timeout".into());
                return CheckResult::hard_fail(elapsed_ms(start), meta, "lookup timeout");
            }
        };
        let latency_ms = elapsed_ms(start);

        if answers.is_empty() {
            return CheckResult::hard_fail(latency_ms, meta, "empty answer set");
        }

        if answers.len() > MAX_META_ANSWERS {
            meta.insert("answers_truncated".into(), true.into());
        }
        meta.insert(
            "answers".into(),
            answers
                .iter()
                .take(MAX_META_ANSWERS)
                .cloned()
                .collect::<Vec<_>>()
                .into(),
        );

        classify_latency(latency_ms, self.warn_ms, u64::MAX, "slow_dns", meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProbeOutcome;

    #[tokio::test]
    async fn nonexistent_name_is_a_hard_failure() {
        let probe = DnsProbe::new(&ProbeTimeouts::default(), &Thresholds::default()).unwrap();
        let result = probe
            .run(&CheckTarget::Dns {
                name: "this-name-does-not-exist.invalid".into(),
                record: RecordKind::A,
            })
            .await;

        assert_eq!(result.outcome, ProbeOutcome::HardFail);
        assert_eq!(result.meta["record"], "A");
        assert!(result.meta.contains_key("error"));
    }

    #[tokio::test]
    async fn mismatched_target_is_internal_error() {
        let probe = DnsProbe::new(&ProbeTimeouts::default(), &Thresholds::default()).unwrap();
        let result = probe
            .run(&CheckTarget::Tcp {
                host: "localhost".into(),
                port: 80,
            })
            .await;
        assert!(result.meta.contains_key("internal_error"));
    }
}
