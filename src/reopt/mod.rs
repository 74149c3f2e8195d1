//! Reoptimization guard
//!
//! Decides, tick by tick, whether the athlete has drifted far enough from
//! the plan to ask the optimisation service for a new one, and makes sure
//! at most one such request is outstanding.
//!
//! ```text
//!            all trigger conditions hold
//!   Idle ─────────────────────────────────▶ InFlight
//!    ▲                                         │
//!    └──── success / failure / timeout ────────┘
//! ```

pub mod client;

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ReoptSettings;
use crate::error::ReoptError;

pub use client::{
    HttpReoptClient, LiveState, ReoptClient, ReoptimizationRequest, ReoptimizationResponse,
};

/// Extra time the guard waits beyond the transport timeout before it
/// releases itself
pub const GUARD_GRACE: Duration = Duration::from_secs(5);

/// Guard state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Idle,
    InFlight {
        attempt: u32,
        sequence: u64,
        issued_at: Instant,
        deadline: Instant,
    },
}

/// Live values the trigger conditions are evaluated on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardInputs {
    pub distance: f64,
    pub speed: f64,
    pub w_bal: f64,
    pub target_w_bal: f64,
    /// Last distance covered by the active plan
    pub plan_end: f64,
}

/// Why no request was issued this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InFlight,
    BelowMinDistance,
    WithinThreshold,
    TooSoon,
    PastEndOfPlan,
    Stalled,
}

/// Result of evaluating the trigger conditions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Transitioned to `InFlight`; the caller must issue the request and
    /// report its outcome under `sequence`
    Fire {
        attempt: u32,
        sequence: u64,
        distance: f64,
    },
    Skip(SkipReason),
}

/// Terminal outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReoptOutcome {
    Success,
    /// Service answered but did not report success
    Rejected { result: String },
    Failed { reason: String },
    TimedOut,
}

impl ReoptOutcome {
    /// Classify what the transport produced
    pub fn from_response(response: Result<ReoptimizationResponse, ReoptError>) -> Self {
        match response {
            Ok(r) if r.is_success() => ReoptOutcome::Success,
            Ok(r) => ReoptOutcome::Rejected { result: r.result },
            Err(e) => ReoptOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReoptOutcome::Success)
    }
}

/// Idle/InFlight state machine plus the bookkeeping the triggers need
#[derive(Debug, Clone)]
pub struct ReoptimizationGuard {
    state: GuardState,
    last_reopt_distance: f64,
    reopt_count: u32,
    last_attempt_failed: bool,
    /// Never reset, unlike `reopt_count`; identifies requests
    sequence: u64,
}

impl Default for ReoptimizationGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReoptimizationGuard {
    pub fn new() -> Self {
        Self {
            state: GuardState::Idle,
            last_reopt_distance: 0.0,
            reopt_count: 0,
            last_attempt_failed: false,
            sequence: 0,
        }
    }

    /// Evaluate the trigger conditions and, if they all hold, move to
    /// `InFlight`
    pub fn evaluate(
        &mut self,
        inputs: &GuardInputs,
        settings: &ReoptSettings,
        now: Instant,
    ) -> Decision {
        if let Some(reason) = self.skip_reason(inputs, settings) {
            return Decision::Skip(reason);
        }

        self.reopt_count += 1;
        self.sequence += 1;
        self.last_reopt_distance = inputs.distance;
        self.state = GuardState::InFlight {
            attempt: self.reopt_count,
            sequence: self.sequence,
            issued_at: now,
            deadline: now + settings.timeout() + GUARD_GRACE,
        };

        info!(
            attempt = self.reopt_count,
            distance = inputs.distance,
            w_bal = inputs.w_bal,
            target_w_bal = inputs.target_w_bal,
            "W′ balance off plan, requesting reoptimization"
        );

        Decision::Fire {
            attempt: self.reopt_count,
            sequence: self.sequence,
            distance: inputs.distance,
        }
    }

    fn skip_reason(&self, inputs: &GuardInputs, settings: &ReoptSettings) -> Option<SkipReason> {
        if !settings.enabled {
            return Some(SkipReason::Disabled);
        }
        if self.is_in_flight() {
            return Some(SkipReason::InFlight);
        }
        if inputs.distance <= settings.min_distance {
            return Some(SkipReason::BelowMinDistance);
        }
        if (inputs.w_bal - inputs.target_w_bal).abs() <= settings.w_bal_threshold {
            return Some(SkipReason::WithinThreshold);
        }
        let spacing = if self.last_attempt_failed {
            settings.retry_spacing
        } else {
            settings.min_spacing
        };
        if inputs.distance - self.last_reopt_distance < spacing {
            return Some(SkipReason::TooSoon);
        }
        if inputs.distance >= inputs.plan_end {
            return Some(SkipReason::PastEndOfPlan);
        }
        if inputs.speed <= settings.min_speed {
            return Some(SkipReason::Stalled);
        }
        None
    }

    /// Return to `Idle` on the terminal outcome of request `sequence`
    ///
    /// Every outcome releases the guard; a failed one only shortens the
    /// distance before the next attempt. Outcomes for a request that is
    /// no longer in flight (already expired) are ignored so they cannot
    /// release a newer request. Returns whether the guard was released.
    pub fn complete(&mut self, sequence: u64, outcome: &ReoptOutcome) -> bool {
        match self.state {
            GuardState::InFlight {
                attempt,
                sequence: current,
                issued_at,
                ..
            } if current == sequence => {
                self.state = GuardState::Idle;
                self.last_attempt_failed = !outcome.is_success();

                if outcome.is_success() {
                    info!(
                        attempt,
                        elapsed_ms = issued_at.elapsed().as_millis() as u64,
                        "Reoptimization succeeded"
                    );
                } else {
                    warn!(attempt, ?outcome, "Reoptimization did not succeed");
                }
                true
            }
            _ => {
                debug!(sequence, ?outcome, "Ignoring outcome of a stale reoptimization");
                false
            }
        }
    }

    /// Release the guard if the in-flight request outlived its deadline
    pub fn expire_stale(&mut self, now: Instant) -> bool {
        if let GuardState::InFlight {
            attempt, deadline, ..
        } = self.state
        {
            if now >= deadline {
                warn!(attempt, "Reoptimization response overdue, releasing guard");
                self.state = GuardState::Idle;
                self.last_attempt_failed = true;
                return true;
            }
        }
        false
    }

    /// Forget per-athlete bookkeeping
    ///
    /// An outstanding request is not cancelled; its response still
    /// releases the guard.
    pub fn reset_for_new_athlete(&mut self, reset_count: bool) {
        self.last_reopt_distance = 0.0;
        self.last_attempt_failed = false;
        if reset_count {
            self.reopt_count = 0;
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, GuardState::InFlight { .. })
    }

    pub fn reopt_count(&self) -> u32 {
        self.reopt_count
    }

    pub fn last_reopt_distance(&self) -> f64 {
        self.last_reopt_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ReoptSettings {
        ReoptSettings {
            enabled: true,
            ..ReoptSettings::default()
        }
    }

    fn off_plan(distance: f64) -> GuardInputs {
        GuardInputs {
            distance,
            speed: 35.0,
            w_bal: 10000.0,
            target_w_bal: 15000.0,
            plan_end: 20000.0,
        }
    }

    #[test]
    fn test_fires_when_all_conditions_hold() {
        let mut guard = ReoptimizationGuard::new();
        let decision = guard.evaluate(&off_plan(1500.0), &settings(), Instant::now());

        assert_eq!(
            decision,
            Decision::Fire {
                attempt: 1,
                sequence: 1,
                distance: 1500.0
            }
        );
        assert!(guard.is_in_flight());
        assert_eq!(guard.reopt_count(), 1);
        assert_eq!(guard.last_reopt_distance(), 1500.0);
    }

    #[test]
    fn test_each_condition_blocks() {
        let now = Instant::now();
        let cases = [
            (
                ReoptSettings {
                    enabled: false,
                    ..settings()
                },
                off_plan(1500.0),
                SkipReason::Disabled,
            ),
            (settings(), off_plan(500.0), SkipReason::BelowMinDistance),
            (
                settings(),
                GuardInputs {
                    w_bal: 14000.0,
                    ..off_plan(1500.0)
                },
                SkipReason::WithinThreshold,
            ),
            (settings(), off_plan(21000.0), SkipReason::PastEndOfPlan),
            (
                settings(),
                GuardInputs {
                    speed: 4.0,
                    ..off_plan(1500.0)
                },
                SkipReason::Stalled,
            ),
        ];

        for (settings, inputs, reason) in cases {
            let mut guard = ReoptimizationGuard::new();
            assert_eq!(guard.evaluate(&inputs, &settings, now), Decision::Skip(reason));
            assert!(!guard.is_in_flight());
            assert_eq!(guard.reopt_count(), 0);
        }
    }

    #[test]
    fn test_deviation_below_min_distance_does_not_trigger() {
        let mut guard = ReoptimizationGuard::new();
        let inputs = GuardInputs {
            distance: 500.0,
            speed: 30.0,
            w_bal: 11000.0,
            target_w_bal: 15000.0,
            plan_end: 20000.0,
        };
        assert_eq!(
            guard.evaluate(&inputs, &settings(), Instant::now()),
            Decision::Skip(SkipReason::BelowMinDistance)
        );
    }

    #[test]
    fn test_single_request_in_flight() {
        let mut guard = ReoptimizationGuard::new();
        let now = Instant::now();
        let mut fired = 0;
        for step in 0..50 {
            let inputs = off_plan(1500.0 + step as f64 * 100.0);
            if let Decision::Fire { .. } = guard.evaluate(&inputs, &settings(), now) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(
            guard.evaluate(&off_plan(9000.0), &settings(), now),
            Decision::Skip(SkipReason::InFlight)
        );
    }

    #[test]
    fn test_spacing_after_success() {
        let mut guard = ReoptimizationGuard::new();
        let now = Instant::now();
        guard.evaluate(&off_plan(1500.0), &settings(), now);
        assert!(guard.complete(1, &ReoptOutcome::Success));
        assert!(!guard.is_in_flight());

        assert_eq!(
            guard.evaluate(&off_plan(2400.0), &settings(), now),
            Decision::Skip(SkipReason::TooSoon)
        );
        assert_eq!(
            guard.evaluate(&off_plan(2500.0), &settings(), now),
            Decision::Fire {
                attempt: 2,
                sequence: 2,
                distance: 2500.0
            }
        );
    }

    #[test]
    fn test_failure_releases_guard_and_retries_sooner() {
        let mut guard = ReoptimizationGuard::new();
        let now = Instant::now();
        guard.evaluate(&off_plan(1500.0), &settings(), now);

        let outcome = ReoptOutcome::from_response(Err(ReoptError::Transport("reset".into())));
        assert!(guard.complete(1, &outcome));
        assert!(!guard.is_in_flight());

        assert_eq!(
            guard.evaluate(&off_plan(1700.0), &settings(), now),
            Decision::Skip(SkipReason::TooSoon)
        );
        assert!(matches!(
            guard.evaluate(&off_plan(1750.0), &settings(), now),
            Decision::Fire { attempt: 2, .. }
        ));
    }

    #[test]
    fn test_rejected_response_releases_guard() {
        let mut guard = ReoptimizationGuard::new();
        guard.evaluate(&off_plan(1500.0), &settings(), Instant::now());

        let outcome = ReoptOutcome::from_response(Ok(ReoptimizationResponse {
            result: "Infeasible".to_string(),
        }));
        assert_eq!(
            outcome,
            ReoptOutcome::Rejected {
                result: "Infeasible".to_string()
            }
        );
        assert!(guard.complete(1, &outcome));
        assert!(!guard.is_in_flight());
    }

    #[test]
    fn test_deadline_releases_guard() {
        let mut guard = ReoptimizationGuard::new();
        let now = Instant::now();
        let settings = settings();
        guard.evaluate(&off_plan(1500.0), &settings, now);

        assert!(!guard.expire_stale(now + settings.timeout()));
        assert!(guard.is_in_flight());
        assert!(guard.expire_stale(now + settings.timeout() + GUARD_GRACE));
        assert!(!guard.is_in_flight());

        // The late outcome of the expired attempt is ignored.
        assert!(!guard.complete(1, &ReoptOutcome::Success));
    }

    #[test]
    fn test_stale_outcome_does_not_release_newer_attempt() {
        let mut guard = ReoptimizationGuard::new();
        let now = Instant::now();
        let settings = settings();
        guard.evaluate(&off_plan(1500.0), &settings, now);
        guard.expire_stale(now + settings.timeout() + GUARD_GRACE);

        guard.evaluate(&off_plan(1800.0), &settings, now);
        assert!(!guard.complete(1, &ReoptOutcome::Success));
        assert!(guard.is_in_flight());
        assert!(guard.complete(2, &ReoptOutcome::Success));
    }

    #[test]
    fn test_athlete_reset() {
        let mut guard = ReoptimizationGuard::new();
        let now = Instant::now();
        guard.evaluate(&off_plan(5000.0), &settings(), now);
        guard.reset_for_new_athlete(true);

        assert_eq!(guard.reopt_count(), 0);
        assert_eq!(guard.last_reopt_distance(), 0.0);
        // still waiting on the request issued for the previous athlete
        assert!(guard.is_in_flight());
        assert!(guard.complete(1, &ReoptOutcome::TimedOut));

        let mut guard = ReoptimizationGuard::new();
        guard.evaluate(&off_plan(5000.0), &settings(), now);
        guard.reset_for_new_athlete(false);
        assert_eq!(guard.reopt_count(), 1);
    }

    #[test]
    fn test_restarted_count_keeps_requests_distinct() {
        let mut guard = ReoptimizationGuard::new();
        let now = Instant::now();
        let settings = settings();
        guard.evaluate(&off_plan(5000.0), &settings, now);
        guard.reset_for_new_athlete(true);
        guard.expire_stale(now + settings.timeout() + GUARD_GRACE);

        let decision = guard.evaluate(&off_plan(1500.0), &settings, now);
        assert_eq!(
            decision,
            Decision::Fire {
                attempt: 1,
                sequence: 2,
                distance: 1500.0
            }
        );
        assert!(!guard.complete(1, &ReoptOutcome::Success));
        assert!(guard.is_in_flight());
    }
}
