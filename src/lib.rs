//! Live pacing guide for virtual cycling races
//!
//! A [`PacingSession`] follows one athlete's telemetry against the active
//! optimal power plan: [`plan`] answers nearest-distance lookups and cuts
//! the display window, [`zones`] colours it, and [`reopt`] decides when to
//! ask the optimisation service for a new plan. [`Runner`] drives a
//! session from a telemetry stream while plans refresh in the background.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod plan;
pub mod reopt;
pub mod replay;
pub mod runner;
pub mod session;
pub mod telemetry;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::AppConfig;
pub use error::PacingError;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use plan::{nearest_index, target_power, target_w_bal, window_around, PlanLoad, PlanStore};
pub use reopt::{Decision, ReoptOutcome, ReoptimizationGuard};
pub use runner::{Runner, SessionEvent};
pub use session::{PacingSession, TickReport};
pub use telemetry::TelemetryWindow;
pub use zones::{PowerZone, ZoneClassifier, ZoneColor};
