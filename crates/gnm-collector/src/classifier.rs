use std::collections::HashMap;

use gnm_common::types::CheckStatus;
use gnm_probe::ProbeOutcome;

/// Result of classifying one probe outcome against the failure streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: CheckStatus,
    pub streak_after: u32,
    /// True when a hard failure was held back to WARN pending a second
    /// strike.
    pub softened: bool,
}

/// Pure two-strike classification.
///
/// A hard failure increments the streak and only escalates to CRIT once
/// confirmed by a second consecutive strike. A degraded observation keeps
/// an in-progress streak alive without feeding it. Only a clean OK resets.
pub fn classify(outcome: ProbeOutcome, streak_before: u32) -> Classification {
    match outcome {
        ProbeOutcome::Ok => Classification {
            status: CheckStatus::Ok,
            streak_after: 0,
            softened: false,
        },
        ProbeOutcome::Degraded => Classification {
            status: CheckStatus::Warn,
            streak_after: streak_before,
            softened: false,
        },
        ProbeOutcome::HardFail => {
            let streak_after = streak_before + 1;
            if streak_after < 2 {
                Classification {
                    status: CheckStatus::Warn,
                    streak_after,
                    softened: true,
                }
            } else {
                Classification {
                    status: CheckStatus::Crit,
                    streak_after,
                    softened: false,
                }
            }
        }
        // Expired certificate: not a transient, no second strike needed.
        ProbeOutcome::ConfirmedFail => Classification {
            status: CheckStatus::Crit,
            streak_after: streak_before + 1,
            softened: false,
        },
    }
}

/// Per-service streak state. Owned exclusively by the scheduler task after
/// worker results are joined, so it needs no locking. Lives only in memory
/// and starts fresh on every process start.
#[derive(Debug, Default)]
pub struct StreakTracker {
    streaks: HashMap<String, u32>,
    last_status: HashMap<String, CheckStatus>,
}

impl StreakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, service_id: &str, outcome: ProbeOutcome) -> Classification {
        let before = self.streaks.get(service_id).copied().unwrap_or(0);
        let classification = classify(outcome, before);
        self.streaks
            .insert(service_id.to_string(), classification.streak_after);

        let previous = self
            .last_status
            .insert(service_id.to_string(), classification.status);
        if let Some(previous) = previous {
            if previous != classification.status {
                tracing::info!(
                    service_id,
                    from = %previous,
                    to = %classification.status,
                    "Status transition"
                );
            }
        }

        classification
    }

    pub fn streak(&self, service_id: &str) -> u32 {
        self.streaks.get(service_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_hard_failure_is_softened_to_warn() {
        let c = classify(ProbeOutcome::HardFail, 0);
        assert_eq!(c.status, CheckStatus::Warn);
        assert_eq!(c.streak_after, 1);
        assert!(c.softened);
    }

    #[test]
    fn second_consecutive_hard_failure_is_crit() {
        let c = classify(ProbeOutcome::HardFail, 1);
        assert_eq!(c.status, CheckStatus::Crit);
        assert_eq!(c.streak_after, 2);
        assert!(!c.softened);
    }

    #[test]
    fn ok_resets_the_streak() {
        let c = classify(ProbeOutcome::Ok, 5);
        assert_eq!(c.status, CheckStatus::Ok);
        assert_eq!(c.streak_after, 0);
    }

    #[test]
    fn degraded_neither_feeds_nor_resets_the_streak() {
        let c = classify(ProbeOutcome::Degraded, 1);
        assert_eq!(c.status, CheckStatus::Warn);
        assert_eq!(c.streak_after, 1);

        // The held-back failure still confirms on the next hard strike.
        let c = classify(ProbeOutcome::HardFail, c.streak_after);
        assert_eq!(c.status, CheckStatus::Crit);
    }

    #[test]
    fn confirmed_failure_bypasses_the_two_strike_rule() {
        let c = classify(ProbeOutcome::ConfirmedFail, 0);
        assert_eq!(c.status, CheckStatus::Crit);
        assert_eq!(c.streak_after, 1);
        assert!(!c.softened);
    }

    #[test]
    fn classification_is_deterministic() {
        for outcome in [
            ProbeOutcome::Ok,
            ProbeOutcome::Degraded,
            ProbeOutcome::HardFail,
            ProbeOutcome::ConfirmedFail,
        ] {
            for streak in 0..4 {
                assert_eq!(classify(outcome, streak), classify(outcome, streak));
            }
        }
    }

    #[test]
    fn tracker_keeps_streaks_per_service() {
        let mut tracker = StreakTracker::new();

        let a1 = tracker.apply("svc_a", ProbeOutcome::HardFail);
        assert_eq!(a1.status, CheckStatus::Warn);
        // An unrelated service failing must not advance svc_a's streak.
        let b1 = tracker.apply("svc_b", ProbeOutcome::HardFail);
        assert_eq!(b1.status, CheckStatus::Warn);

        let a2 = tracker.apply("svc_a", ProbeOutcome::HardFail);
        assert_eq!(a2.status, CheckStatus::Crit);
        assert_eq!(tracker.streak("svc_a"), 2);
        assert_eq!(tracker.streak("svc_b"), 1);

        let a3 = tracker.apply("svc_a", ProbeOutcome::Ok);
        assert_eq!(a3.status, CheckStatus::Ok);
        assert_eq!(tracker.streak("svc_a"), 0);
    }

    #[test]
    fn flapping_sequence_from_the_scenario_table() {
        let mut tracker = StreakTracker::new();
        // down, recover, down, down: WARN, OK, WARN, CRIT
        assert_eq!(
            tracker.apply("dns01", ProbeOutcome::HardFail).status,
            CheckStatus::Warn
        );
        assert_eq!(
            tracker.apply("dns01", ProbeOutcome::Ok).status,
            CheckStatus::Ok
        );
        assert_eq!(
            tracker.apply("dns01", ProbeOutcome::HardFail).status,
            CheckStatus::Warn
        );
        assert_eq!(
            tracker.apply("dns01", ProbeOutcome::HardFail).status,
            CheckStatus::Crit
        );
    }
}
