use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use gnm_common::types::{
    CheckParams, CheckStatus, HostSpec, Measurement, Meta, ProbeIdentity,
};
use gnm_probe::{CheckResult, CheckTarget, ProbeSet, RecordKind};
use gnm_storage::MeasurementStore;
use tokio::sync::{watch, Semaphore};

use crate::classifier::StreakTracker;
use crate::config::{ConfigSnapshot, ValidatedService};
use crate::error::FatalError;
use crate::metrics::CollectorMetrics;

/// Extra headroom on top of the per-type timeout before a worker is
/// declared hung and converted into a hard failure.
const WATCHDOG_GRACE: Duration = Duration::from_secs(2);

/// Process lifecycle, for log lines only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Starting => write!(f, "starting"),
            Lifecycle::Running => write!(f, "running"),
            Lifecycle::Draining => write!(f, "draining"),
            Lifecycle::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleStats {
    checks: usize,
    ok: usize,
    warn: usize,
    crit: usize,
    dropped: usize,
    /// Inserts that failed on connectivity even after retries.
    conn_failures: usize,
}

pub struct Scheduler {
    snapshot: Arc<ConfigSnapshot>,
    probes: Arc<ProbeSet>,
    store: Arc<MeasurementStore>,
    identity: ProbeIdentity,
    metrics: Option<Arc<CollectorMetrics>>,
    streaks: StreakTracker,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        snapshot: Arc<ConfigSnapshot>,
        probes: Arc<ProbeSet>,
        store: Arc<MeasurementStore>,
        identity: ProbeIdentity,
        metrics: Option<Arc<CollectorMetrics>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            snapshot,
            probes,
            store,
            identity,
            metrics,
            streaks: StreakTracker::new(),
            shutdown,
        }
    }

    /// The central loop. Cycles never overlap: the next cycle starts only
    /// after every task of the previous one has completed or timed out.
    pub async fn run(&mut self, once: bool) -> Result<(), FatalError> {
        let interval = Duration::from_secs(self.snapshot.config.collector.interval_sec);
        let max_failed_cycles = self.snapshot.config.db.max_failed_cycles;
        let mut failed_cycles = 0u32;

        tracing::info!(state = %Lifecycle::Running, interval_sec = interval.as_secs(), "Collector running");

        loop {
            let cycle_start = Instant::now();
            let stats = self.run_cycle().await;
            let elapsed = cycle_start.elapsed();

            if let Some(metrics) = &self.metrics {
                metrics.observe_cycle(elapsed);
            }
            tracing::info!(
                services = stats.checks,
                ok = stats.ok,
                warn = stats.warn,
                crit = stats.crit,
                dropped = stats.dropped,
                cycle_duration_ms = elapsed.as_millis() as u64,
                "cycle_summary"
            );

            if stats.checks > 0 && stats.conn_failures == stats.checks {
                failed_cycles += 1;
                tracing::error!(
                    consecutive = failed_cycles,
                    limit = max_failed_cycles,
                    "Entire cycle lost to datastore connectivity failures"
                );
                if failed_cycles >= max_failed_cycles {
                    return Err(FatalError::Datastore(format!(
                        "datastore unreachable for {failed_cycles} consecutive cycles"
                    )));
                }
            } else {
                failed_cycles = 0;
            }

            if once {
                return Ok(());
            }
            if *self.shutdown.borrow() {
                tracing::info!(state = %Lifecycle::Draining, "Shutdown requested; last cycle flushed");
                return Ok(());
            }

            let sleep = interval.saturating_sub(elapsed);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.shutdown.changed() => {
                    tracing::info!(state = %Lifecycle::Draining, "Shutdown requested between cycles");
                    return Ok(());
                }
            }
        }
    }

    async fn run_cycle(&mut self) -> CycleStats {
        let services: Vec<ValidatedService> =
            self.snapshot.enabled_services().cloned().collect();
        let mut stats = CycleStats::default();
        if services.is_empty() {
            return stats;
        }

        let workers = self
            .snapshot
            .config
            .collector
            .max_workers
            .min(services.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = Vec::with_capacity(services.len());

        for service in services {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break, // semaphore closed; cannot happen in practice
            };
            let probes = self.probes.clone();
            let kind = service.spec.kind;
            let target = build_target(&service, &self.snapshot.hosts);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let ts = Utc::now();
                let result = match target {
                    Ok(target) => {
                        let budget = probes.timeout_for(kind) + WATCHDOG_GRACE;
                        match tokio::time::timeout(budget, probes.run(kind, &target)).await {
                            Ok(result) => result,
                            Err(_) => {
                                let mut meta = Meta::new();
                                meta.insert("reason".into(), "timeout".into());
                                CheckResult::hard_fail(
                                    budget.as_millis() as u64,
                                    meta,
                                    "probe exceeded its timeout budget",
                                )
                            }
                        }
                    }
                    Err(e) => CheckResult::internal_error(e),
                };
                (ts, result)
            });
            tasks.push((service, handle));
        }

        // Results are classified and persisted on this task only; the
        // streak map needs no locking under that discipline.
        for (service, handle) in tasks {
            let (ts, result) = match handle.await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(
                        service_id = %service.spec.service_id,
                        error = %e,
                        "Probe task panicked"
                    );
                    (
                        Utc::now(),
                        CheckResult::internal_error(format!("probe task panicked: {e}")),
                    )
                }
            };

            let measurement = self.finish_check(&service, ts, result);
            stats.checks += 1;
            match measurement.status {
                CheckStatus::Ok => stats.ok += 1,
                CheckStatus::Warn => stats.warn += 1,
                CheckStatus::Crit => stats.crit += 1,
            }
            if let Some(metrics) = &self.metrics {
                metrics.observe_check(measurement.kind, measurement.status, measurement.latency_ms);
            }

            match self.store.insert(&measurement).await {
                Ok(()) => {
                    tracing::info!(
                        service_id = %measurement.target_id,
                        host_id = measurement.host_id.as_deref().unwrap_or("-"),
                        r#type = %measurement.kind,
                        status = measurement.status.code(),
                        latency_ms = measurement.latency_ms,
                        region = %measurement.region,
                        "Check completed"
                    );
                }
                Err(e) => {
                    stats.dropped += 1;
                    if e.is_retryable() {
                        stats.conn_failures += 1;
                    }
                    tracing::error!(
                        service_id = %measurement.target_id,
                        error = %e,
                        "Dropping measurement after exhausted retries"
                    );
                }
            }
        }

        stats
    }

    /// Classify one probe result and assemble the measurement row.
    fn finish_check(
        &mut self,
        service: &ValidatedService,
        ts: DateTime<Utc>,
        result: CheckResult,
    ) -> Measurement {
        let classification = self
            .streaks
            .apply(&service.spec.service_id, result.outcome);

        let mut meta = result.meta;
        meta.insert(
            "service_id".into(),
            service.spec.service_id.clone().into(),
        );
        meta.insert(
            "host_id".into(),
            service
                .spec
                .host_id
                .clone()
                .map_or(serde_json::Value::Null, Into::into),
        );
        if let Some(address) = host_address(service, &self.snapshot.hosts) {
            meta.insert("host_address".into(), address.into());
        }
        if classification.softened {
            meta.insert("softened".into(), "first_hard_down".into());
        }
        self.identity.apply_to_meta(&mut meta);

        Measurement {
            ts,
            region: self.identity.region.clone(),
            project_id: service.spec.project_id,
            target_id: service.spec.service_id.clone(),
            host_id: service.spec.host_id.clone(),
            kind: service.spec.kind,
            status: classification.status,
            latency_ms: result.latency_ms,
            meta: Some(meta),
        }
    }
}

/// Build the probe input from a validated service and the host catalog.
/// Validation has already guaranteed the required pieces exist; a miss
/// here still produces a hard-failure row rather than a skipped check.
pub fn build_target(
    service: &ValidatedService,
    hosts: &HashMap<String, HostSpec>,
) -> Result<CheckTarget, String> {
    let service_id = &service.spec.service_id;
    let address = service
        .spec
        .host_id
        .as_ref()
        .and_then(|id| hosts.get(id))
        .map(|h| h.address.clone());

    match &service.params {
        CheckParams::Ping => address
            .map(|host| CheckTarget::Ping { host })
            .ok_or_else(|| format!("missing host address for {service_id}")),
        CheckParams::Dns(_) => Ok(CheckTarget::Dns {
            name: address.ok_or_else(|| format!("missing host address for {service_id}"))?,
            record: service.dns_record.unwrap_or(RecordKind::A),
        }),
        CheckParams::Tcp(params) => Ok(CheckTarget::Tcp {
            host: address.ok_or_else(|| format!("missing host address for {service_id}"))?,
            port: params.port,
        }),
        CheckParams::SslCert(params) => Ok(CheckTarget::SslCert {
            host: address.ok_or_else(|| format!("missing host address for {service_id}"))?,
            port: params.port,
        }),
        CheckParams::Http(params) => {
            let url = match (&params.url, address) {
                (Some(url), _) => url.clone(),
                (None, Some(address)) => {
                    format!("{}://{}{}", params.scheme, address, params.path)
                }
                (None, None) => return Err(format!("missing url for {service_id}")),
            };
            Ok(CheckTarget::Http { url })
        }
        CheckParams::JsonApi(params) => Ok(CheckTarget::JsonApi {
            url: params.url.clone(),
            expect_field: params.expect_field.clone(),
            expect_equals: params.expect_equals.clone(),
        }),
    }
}

/// Best address tag for meta: the host catalog entry, or the hostname of
/// the configured URL for purely URL-based checks.
fn host_address(service: &ValidatedService, hosts: &HashMap<String, HostSpec>) -> Option<String> {
    if let Some(host) = service.spec.host_id.as_ref().and_then(|id| hosts.get(id)) {
        return Some(host.address.clone());
    }
    let url = match &service.params {
        CheckParams::Http(params) => params.url.as_deref(),
        CheckParams::JsonApi(params) => Some(params.url.as_str()),
        _ => None,
    }?;
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}
