//! Active pacing plan ownership and hot reload
//!
//! The store keeps the last accepted raw document next to the validated
//! plan built from it. A refresh is deep-compared against that document
//! and only a changed document produces a new plan, which replaces the
//! previous one wholesale behind an `Arc`.

pub mod lookup;
pub mod source;
pub mod window;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::PlanError;
use crate::models::{PacingPlan, RawPlan};

pub use lookup::{nearest_index, target_power, target_w_bal};
pub use source::{FilePlanSource, HttpPlanSource, PlanPoller, PlanSource};
pub use window::{window_around, DisplayWindow, DEFAULT_HALF_WINDOW};

/// Outcome of offering a document to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanLoad {
    /// A new plan replaced the active one
    Loaded { version: u64, points: usize },
    /// Document identical to the last accepted one
    Unchanged,
}

/// Owner of the active plan and the lead-in offset
#[derive(Debug, Default)]
pub struct PlanStore {
    active: Option<Arc<PacingPlan>>,
    last_raw: Option<RawPlan>,
    lead_in: f64,
    version: u64,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a freshly fetched document
    ///
    /// A malformed document is rejected and the previous plan stays
    /// active. It is not remembered, so a corrected document published
    /// later is still picked up.
    pub fn load(&mut self, raw: RawPlan) -> Result<PlanLoad, PlanError> {
        if self.last_raw.as_ref() == Some(&raw) {
            debug!(version = self.version, "Plan document unchanged");
            return Ok(PlanLoad::Unchanged);
        }

        let plan = PacingPlan::from_raw(&raw, self.lead_in)?;
        let points = plan.len();

        self.active = Some(Arc::new(plan));
        self.last_raw = Some(raw);
        self.version += 1;

        info!(
            version = self.version,
            points,
            lead_in = self.lead_in,
            "Loaded pacing plan"
        );

        Ok(PlanLoad::Loaded {
            version: self.version,
            points,
        })
    }

    /// Set the lead-in offset once the athlete crosses the start line
    ///
    /// Only the first non-zero offset is accepted. The active plan is
    /// rebuilt from its raw document, so the shift is applied exactly
    /// once per plan. Returns whether the offset was applied.
    pub fn set_lead_in(&mut self, offset: f64) -> bool {
        if !offset.is_finite() || offset == 0.0 {
            debug!(offset, "Ignoring empty lead-in offset");
            return false;
        }
        if self.lead_in != 0.0 {
            warn!(
                current = self.lead_in,
                requested = offset,
                "Lead-in offset already set for this session"
            );
            return false;
        }

        self.lead_in = offset;

        if let Some(raw) = &self.last_raw {
            // The raw document already passed validation and a finite
            // shift keeps it sorted, so this cannot fail in practice.
            match PacingPlan::from_raw(raw, offset) {
                Ok(plan) => {
                    self.active = Some(Arc::new(plan));
                    self.version += 1;
                }
                Err(e) => warn!(error = %e, "Could not shift active plan by lead-in"),
            }
        }

        info!(lead_in = offset, version = self.version, "Lead-in offset applied");
        true
    }

    /// Current plan snapshot, if any
    pub fn snapshot(&self) -> Option<Arc<PacingPlan>> {
        self.active.clone()
    }

    /// Current plan snapshot, failing when nothing is loaded
    pub fn current(&self) -> Result<Arc<PacingPlan>, PlanError> {
        self.active.clone().ok_or(PlanError::NoActivePlan)
    }

    pub fn lead_in(&self) -> f64 {
        self.lead_in
    }

    /// Incremented every time the active plan is replaced
    pub fn version(&self) -> u64 {
        self.version
    }
}
