//! Per-session pacing state and the tick path
//!
//! [`PacingSession`] is the single owner of the plan store, telemetry
//! window and reoptimization guard. Every incoming sample goes through
//! [`PacingSession::on_tick`], which produces a [`TickReport`] for the
//! display and, when the guard fires, the request the caller must send.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::PlanError;
use crate::models::{AthleteId, PacingPlan, RawPlan, TelemetrySample};
use crate::plan::{target_power, target_w_bal, window_around, DisplayWindow, PlanLoad, PlanStore};
use crate::reopt::{
    Decision, GuardInputs, LiveState, ReoptOutcome, ReoptimizationGuard, ReoptimizationRequest,
};
use crate::telemetry::{PushOutcome, TelemetryWindow, Trail};
use crate::zones::{PowerZone, ZoneClassifier, ZoneColor};

/// Plan window around the athlete plus the zone of every point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayFrame {
    pub window: DisplayWindow,
    pub zones: Vec<PowerZone>,
    pub colors: Vec<ZoneColor>,
    #[serde(skip)]
    plan_version: u64,
    #[serde(skip)]
    ftp: f64,
}

impl DisplayFrame {
    fn matches(&self, window: &DisplayWindow, plan_version: u64, ftp: f64) -> bool {
        self.plan_version == plan_version
            && self.ftp == ftp
            && self.window.start == window.start
            && self.window.len() == window.len()
    }
}

/// Request the guard issued this tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingReopt {
    /// Identifies the request when its outcome comes back
    pub sequence: u64,
    pub request: ReoptimizationRequest,
}

/// Everything the display needs after one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub athlete_id: AthleteId,
    pub distance: f64,
    pub power: f64,
    pub w_bal: f64,
    pub target_power: Option<f64>,
    pub target_w_bal: Option<f64>,
    /// Live W′ balance minus the planned one
    pub w_bal_deviation: Option<f64>,
    pub plan_version: u64,
    /// `None` without a plan or past its end
    pub display: Option<DisplayFrame>,
    pub trail: Trail,
    pub athlete_changed: bool,
    pub reopt: Option<PendingReopt>,
}

/// State of one pacing session
#[derive(Debug)]
pub struct PacingSession {
    id: Uuid,
    plans: PlanStore,
    telemetry: TelemetryWindow,
    guard: ReoptimizationGuard,
    display: Option<DisplayFrame>,
}

impl PacingSession {
    pub fn new(config: &AppConfig) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, "Starting pacing session");
        Self {
            id,
            plans: PlanStore::new(),
            telemetry: TelemetryWindow::new(config.display.trail_capacity),
            guard: ReoptimizationGuard::new(),
            display: None,
        }
    }

    /// Process one telemetry sample
    pub fn on_tick(
        &mut self,
        sample: &TelemetrySample,
        config: &AppConfig,
        now: Instant,
    ) -> TickReport {
        if self.telemetry.capacity() != config.display.trail_capacity {
            self.telemetry.set_capacity(config.display.trail_capacity);
        }
        self.guard.expire_stale(now);

        let athlete_changed = match self.telemetry.push(sample) {
            PushOutcome::Appended => false,
            PushOutcome::AthleteChanged { .. } => {
                self.display = None;
                self.guard
                    .reset_for_new_athlete(config.reoptimization.reset_count_on_athlete_change);
                true
            }
        };

        let plan = self.plans.snapshot();
        let (target_power, target_w_bal) = match plan.as_deref() {
            Some(plan) => (
                lookup_or_log("power", target_power(plan, sample.distance)),
                lookup_or_log("wBal", target_w_bal(plan, sample.distance)),
            ),
            None => (None, None),
        };

        let display = plan
            .as_deref()
            .and_then(|plan| self.display_frame(plan, sample, config.display.window_half));

        let reopt = match (plan.as_deref(), target_w_bal) {
            (Some(plan), Some(target_w_bal)) => {
                self.consider_reopt(plan, sample, target_w_bal, config, now)
            }
            _ => None,
        };

        TickReport {
            timestamp: Utc::now(),
            athlete_id: sample.athlete_id,
            distance: sample.distance,
            power: sample.power,
            w_bal: sample.w_bal,
            target_power,
            target_w_bal,
            w_bal_deviation: target_w_bal.map(|target| sample.w_bal - target),
            plan_version: self.plans.version(),
            display,
            trail: self.telemetry.trail(),
            athlete_changed,
            reopt,
        }
    }

    fn display_frame(
        &mut self,
        plan: &PacingPlan,
        sample: &TelemetrySample,
        half: usize,
    ) -> Option<DisplayFrame> {
        let window = match window_around(plan, sample.distance, half) {
            Ok(Some(window)) => window,
            Ok(None) => {
                trace!(distance = sample.distance, "Past end of plan, no display window");
                self.display = None;
                return None;
            }
            Err(e) => {
                debug!(error = %e, "No display window");
                self.display = None;
                return None;
            }
        };

        let version = self.plans.version();
        if let Some(frame) = &self.display {
            if frame.matches(&window, version, sample.ftp) {
                return Some(frame.clone());
            }
        }

        let zones = match ZoneClassifier::classify_zones(&window.power, sample.ftp) {
            Ok(zones) => zones,
            Err(e) => {
                warn!(error = %e, "Could not classify plan window");
                self.display = None;
                return None;
            }
        };
        let colors = zones.iter().map(PowerZone::color).collect();

        let frame = DisplayFrame {
            window,
            zones,
            colors,
            plan_version: version,
            ftp: sample.ftp,
        };
        self.display = Some(frame.clone());
        Some(frame)
    }

    fn consider_reopt(
        &mut self,
        plan: &PacingPlan,
        sample: &TelemetrySample,
        target_w_bal: f64,
        config: &AppConfig,
        now: Instant,
    ) -> Option<PendingReopt> {
        let inputs = GuardInputs {
            distance: sample.distance,
            speed: sample.speed,
            w_bal: sample.w_bal,
            target_w_bal,
            plan_end: plan.max_distance()?,
        };

        match self.guard.evaluate(&inputs, &config.reoptimization, now) {
            Decision::Fire {
                attempt, sequence, ..
            } => Some(PendingReopt {
                sequence,
                request: ReoptimizationRequest {
                    config: config.athlete.clone(),
                    state: LiveState {
                        distance: sample.distance - self.plans.lead_in(),
                        speed: sample.speed,
                        w_bal: sample.w_bal,
                        attempt,
                    },
                },
            }),
            Decision::Skip(reason) => {
                trace!(?reason, "No reoptimization this tick");
                None
            }
        }
    }

    /// Offer a refreshed plan document
    pub fn apply_plan(&mut self, raw: RawPlan) -> Result<PlanLoad, PlanError> {
        let load = self.plans.load(raw)?;
        if let PlanLoad::Loaded { .. } = load {
            self.display = None;
        }
        Ok(load)
    }

    /// Record where the athlete crossed the start line
    pub fn set_lead_in(&mut self, distance: f64) -> bool {
        let applied = self.plans.set_lead_in(distance);
        if applied {
            info!(session = %self.id, lead_in = distance, "Start line crossed");
            self.display = None;
        }
        applied
    }

    /// Feed back the terminal outcome of request `sequence`
    pub fn on_reopt_outcome(&mut self, sequence: u64, outcome: &ReoptOutcome) -> bool {
        self.guard.complete(sequence, outcome)
    }

    /// Release the guard if its request is overdue
    pub fn expire_stale(&mut self, now: Instant) -> bool {
        self.guard.expire_stale(now)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn plans(&self) -> &PlanStore {
        &self.plans
    }

    pub fn guard(&self) -> &ReoptimizationGuard {
        &self.guard
    }

    pub fn telemetry(&self) -> &TelemetryWindow {
        &self.telemetry
    }
}

fn lookup_or_log(series: &'static str, result: Result<f64, PlanError>) -> Option<f64> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(series, error = %e, "Target lookup unavailable");
            None
        }
    }
}
