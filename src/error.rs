//! Unified error hierarchy for pacers
//!
//! Component errors are typed with `thiserror` and returned directly by
//! the modules that raise them. Callers that only report an error (the
//! runner, the plan poller, the CLI) fold it into [`PacingError`] to pick
//! a log level and a message for the rider.

use std::time::Duration;
use thiserror::Error;

pub use crate::zones::ZoneError;

/// Top-level error type for all pacers operations
#[derive(Debug, Error)]
pub enum PacingError {
    /// Pacing plan errors (lookup, window extraction, plan validation)
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Telemetry boundary validation errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// Plan source fetch errors
    #[error("Plan source error: {0}")]
    Source(#[from] SourceError),

    /// Reoptimization request errors
    #[error("Reoptimization error: {0}")]
    Reoptimization(#[from] ReoptError),

    /// Zone classification errors
    #[error("Zone error: {0}")]
    Zone(#[from] ZoneError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while validating or querying a pacing plan
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    /// No plan has been loaded yet
    #[error("No active plan")]
    NoActivePlan,

    /// The active plan has no points
    #[error("Empty plan")]
    EmptyPlan,

    /// Parallel sequences have different lengths
    #[error("Length mismatch: distance has {distance} points, {series} has {actual}")]
    LengthMismatch {
        series: &'static str,
        distance: usize,
        actual: usize,
    },

    /// Distance sequence decreases somewhere
    #[error("Distance not sorted at index {index}: {previous} > {current}")]
    Unsorted {
        index: usize,
        previous: f64,
        current: f64,
    },

    /// NaN or infinite value in a series
    #[error("Non-finite value in {series} at index {index}")]
    NonFinite { series: &'static str, index: usize },

    /// Optional series requested but not present in the plan
    #[error("Plan has no {series} series")]
    MissingSeries { series: &'static str },

    /// Display window asked for zero points on each side
    #[error("Display window needs at least one point on each side")]
    EmptyWindow,
}

/// Errors raised while validating an incoming telemetry event
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TelemetryError {
    /// Payload could not be decoded
    #[error("Malformed telemetry event: {reason}")]
    Malformed { reason: String },

    /// Field holds NaN or infinity
    #[error("Non-finite telemetry field: {field}")]
    NonFinite { field: &'static str },

    /// Field is outside its valid range
    #[error("Invalid telemetry field {field}={value}")]
    OutOfRange { field: &'static str, value: f64 },

    /// FTP must be strictly positive to normalise power
    #[error("Invalid FTP: {ftp}")]
    InvalidFtp { ftp: f64 },
}

/// Errors raised while fetching a plan document
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure (file missing, connection refused, HTTP status)
    #[error("Fetch failed from {location}: {reason}")]
    FetchFailed { location: String, reason: String },

    /// Document fetched but not a valid plan document
    #[error("Parse failed for {location}: {reason}")]
    ParseFailed { location: String, reason: String },

    /// Fetch did not complete within the configured bound
    #[error("Fetch from {location} timed out after {timeout:?}")]
    Timeout { location: String, timeout: Duration },
}

/// Errors raised by the reoptimization transport
#[derive(Debug, Error)]
pub enum ReoptError {
    /// Request could not be delivered or the reply was lost
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Service answered with a non-success HTTP status
    #[error("Service returned status {status}")]
    Status { status: u16 },

    /// Service replied with a body that is not a valid response
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Configuration validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A value is outside its accepted range
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    /// A required value is not set
    #[error("Missing value: {key}")]
    Missing { key: &'static str },
}

impl PacingError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PacingError::Plan(PlanError::NoActivePlan) => ErrorSeverity::Info,
            PacingError::Plan(PlanError::EmptyPlan) => ErrorSeverity::Warning,
            PacingError::Plan(PlanError::MissingSeries { .. }) => ErrorSeverity::Warning,
            PacingError::Plan(_) => ErrorSeverity::Error,
            PacingError::Telemetry(_) => ErrorSeverity::Warning,
            PacingError::Source(SourceError::ParseFailed { .. }) => ErrorSeverity::Error,
            PacingError::Source(_) => ErrorSeverity::Warning,
            PacingError::Reoptimization(_) => ErrorSeverity::Warning,
            PacingError::Zone(_) => ErrorSeverity::Warning,
            PacingError::Configuration(_) => ErrorSeverity::Error,
            PacingError::Io(_) => ErrorSeverity::Critical,
        }
    }

    /// Log the error at the level its severity maps to
    pub fn log(&self, message: &str) {
        let level = self.severity().to_tracing_level();
        if level == tracing::Level::ERROR {
            tracing::error!(error = %self, "{}", message);
        } else if level == tracing::Level::WARN {
            tracing::warn!(error = %self, "{}", message);
        } else {
            tracing::info!(error = %self, "{}", message);
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PacingError::Plan(PlanError::NoActivePlan) | PacingError::Plan(PlanError::EmptyPlan) => {
                "No pacing plan is loaded yet. Target power will appear once a plan is available."
                    .to_string()
            }
            PacingError::Source(SourceError::FetchFailed { location, .. }) => {
                format!("Could not fetch the pacing plan from {}", location)
            }
            PacingError::Plan(PlanError::EmptyWindow) => {
                "The plan window needs at least one point on each side (--half 1 or more)."
                    .to_string()
            }
            PacingError::Plan(PlanError::MissingSeries { series }) => {
                format!("This plan carries no {} values.", series)
            }
            PacingError::Plan(
                e @ (PlanError::Unsorted { .. }
                | PlanError::LengthMismatch { .. }
                | PlanError::NonFinite { .. }),
            ) => format!("The pacing plan is invalid: {}", e),
            PacingError::Reoptimization(ReoptError::Transport(_)) => {
                "The reoptimization service is unreachable. The current plan stays active."
                    .to_string()
            }
            PacingError::Reoptimization(ReoptError::Status { status }) => {
                format!("The reoptimization service refused the request (HTTP {}).", status)
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = PacingError::Plan(PlanError::NoActivePlan);
        assert_eq!(err.severity(), ErrorSeverity::Info);

        let err = PacingError::Plan(PlanError::LengthMismatch {
            series: "power",
            distance: 3,
            actual: 2,
        });
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);

        let err = PacingError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_source_severity() {
        let err = PacingError::from(SourceError::Timeout {
            location: "plan.json".to_string(),
            timeout: Duration::from_secs(5),
        });
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::WARN);

        let err = PacingError::from(SourceError::ParseFailed {
            location: "plan.json".to_string(),
            reason: "expected value".to_string(),
        });
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_user_messages() {
        let err = PacingError::Plan(PlanError::NoActivePlan);
        assert!(err.user_message().contains("No pacing plan"));

        let err = PacingError::Source(SourceError::FetchFailed {
            location: "http://localhost:5000/plan".to_string(),
            reason: "refused".to_string(),
        });
        assert!(err.user_message().contains("localhost:5000"));

        let err = PacingError::from(PlanError::EmptyWindow);
        assert!(err.user_message().contains("--half"));

        let err = PacingError::from(PlanError::Unsorted {
            index: 2,
            previous: 20.0,
            current: 10.0,
        });
        assert!(err.user_message().starts_with("The pacing plan is invalid"));
        assert!(err.user_message().contains("index 2"));

        let err = PacingError::from(ReoptError::Status { status: 503 });
        assert!(err.user_message().contains("HTTP 503"));
    }

    #[test]
    fn test_log_does_not_panic_without_subscriber() {
        PacingError::from(PlanError::EmptyPlan).log("Rejected plan document");
        PacingError::from(PlanError::NoActivePlan).log("No plan yet");
    }
}
