use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::models::{IntegrationMethod, Route};
use crate::plan::DEFAULT_HALF_WINDOW;
use crate::telemetry::DEFAULT_TRAIL_CAPACITY;

/// Main application configuration
///
/// Read-only from the point of view of the tick path: the session is
/// handed a snapshot on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Athlete and optimisation parameters sent with every reoptimization
    pub athlete: OptimizationConfig,

    /// When and where to ask for a new plan
    pub reoptimization: ReoptSettings,

    /// Plan hot-reload settings
    pub refresh: RefreshSettings,

    /// Display preferences
    pub display: DisplaySettings,

    /// Logging settings
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

/// Parameters of the optimisation problem
///
/// Field names match what the optimisation service reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Route being ridden
    pub route: Route,

    /// Critical power in watts
    pub cp: f64,

    /// Anaerobic work capacity above CP in joules
    pub w_prime: f64,

    /// Number of laps of the route
    pub num_laps: u32,

    /// Rider weight in kilograms
    pub weight: f64,

    /// Maximum power in watts
    pub max_power: f64,

    /// Integration scheme for the rider dynamics
    pub integration_method: IntegrationMethod,

    /// Ask for a negative split (W′ bounded at start and end)
    pub negative_split: bool,

    /// W′ floor at the start, percent of W′ (negative split only)
    pub bound_start: f64,

    /// W′ floor at the end, percent of W′ (negative split only)
    pub bound_end: f64,
}

/// Reoptimization trigger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReoptSettings {
    /// Ask for new plans at all
    pub enabled: bool,

    /// Base URL of the optimisation service
    pub endpoint: String,

    /// No request before the athlete has covered this distance
    pub min_distance: f64,

    /// Absolute W′ deviation from the plan that triggers a request
    pub w_bal_threshold: f64,

    /// Distance between two requests
    pub min_spacing: f64,

    /// Distance before retrying after a failed request
    pub retry_spacing: f64,

    /// Below this speed the athlete is treated as stopped
    pub min_speed: f64,

    /// Bounded wait for a response, in seconds
    pub timeout_secs: u64,

    /// Restart the attempt counter when the watched athlete changes
    pub reset_count_on_athlete_change: bool,
}

/// Plan hot-reload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    /// File path or http(s) URL of the plan document
    pub source: String,

    /// Poll interval in seconds
    pub interval_secs: u64,

    /// Bounded wait for one fetch, in seconds
    pub timeout_secs: u64,
}

/// Display preferences
///
/// Only `window_half` and `trail_capacity` affect the core; the rest is
/// persisted for the rendering side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Plan points shown on each side of the athlete
    pub window_half: usize,

    /// Telemetry samples kept for the trail
    pub trail_capacity: usize,

    pub imperial_units: bool,
    pub autoscroll: bool,
    pub font_scale: f64,
    pub solid_background: bool,
    pub background_color: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            metadata: ConfigMetadata::default(),
            athlete: OptimizationConfig::default(),
            reoptimization: ReoptSettings::default(),
            refresh: RefreshSettings::default(),
            display: DisplaySettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        OptimizationConfig {
            route: Route::MechIsleLoop,
            cp: 265.0,
            w_prime: 26630.0,
            num_laps: 1,
            weight: 78.0,
            max_power: 1000.0,
            integration_method: IntegrationMethod::Euler,
            negative_split: false,
            bound_start: 0.0,
            bound_end: 0.0,
        }
    }
}

impl Default for ReoptSettings {
    fn default() -> Self {
        ReoptSettings {
            enabled: false,
            endpoint: "http://localhost:5000".to_string(),
            min_distance: 1000.0,
            w_bal_threshold: 3000.0,
            min_spacing: 1000.0,
            retry_spacing: 250.0,
            min_speed: 10.0,
            timeout_secs: 30,
            reset_count_on_athlete_change: true,
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        RefreshSettings {
            source: "optimal_power.json".to_string(),
            interval_secs: 2,
            timeout_secs: 5,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        DisplaySettings {
            window_half: DEFAULT_HALF_WINDOW,
            trail_capacity: DEFAULT_TRAIL_CAPACITY,
            imperial_units: false,
            autoscroll: true,
            font_scale: 1.0,
            solid_background: false,
            background_color: "#00ff00".to_string(),
        }
    }
}

impl ReoptSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn positive(key: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidValue {
            key,
            reason: format!("must be a positive number, got {}", value),
        });
    }
    Ok(())
}

fn non_zero(key: &'static str, value: u64) -> std::result::Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn percent(key: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            key,
            reason: format!("must be between 0 and 100, got {}", value),
        });
    }
    Ok(())
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pacers")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %config_path.display(),
                    error = %e,
                    "Config not loaded, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Reject values the tick path cannot work with
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let athlete = &self.athlete;
        positive("athlete.cp", athlete.cp)?;
        positive("athlete.w_prime", athlete.w_prime)?;
        positive("athlete.weight", athlete.weight)?;
        positive("athlete.max_power", athlete.max_power)?;
        non_zero("athlete.num_laps", athlete.num_laps as u64)?;
        percent("athlete.bound_start", athlete.bound_start)?;
        percent("athlete.bound_end", athlete.bound_end)?;
        if athlete.max_power <= athlete.cp {
            return Err(ConfigError::InvalidValue {
                key: "athlete.max_power",
                reason: format!("must exceed cp ({})", athlete.cp),
            });
        }

        let reopt = &self.reoptimization;
        positive("reoptimization.min_distance", reopt.min_distance)?;
        positive("reoptimization.w_bal_threshold", reopt.w_bal_threshold)?;
        positive("reoptimization.min_spacing", reopt.min_spacing)?;
        positive("reoptimization.retry_spacing", reopt.retry_spacing)?;
        positive("reoptimization.min_speed", reopt.min_speed)?;
        non_zero("reoptimization.timeout_secs", reopt.timeout_secs)?;
        if reopt.enabled && reopt.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "reoptimization.endpoint",
            });
        }

        non_zero("refresh.interval_secs", self.refresh.interval_secs)?;
        non_zero("refresh.timeout_secs", self.refresh.timeout_secs)?;
        if self.refresh.source.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "refresh.source",
            });
        }

        non_zero("display.window_half", self.display.window_half as u64)?;
        non_zero("display.trail_capacity", self.display.trail_capacity as u64)?;

        Ok(())
    }
}
