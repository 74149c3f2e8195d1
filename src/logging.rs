//! Structured logging for pacers
//!
//! Console output goes to stderr (stdout carries tick reports) in pretty,
//! json or compact form. An optional file sink always writes JSON and can
//! rotate daily.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for pacers targets; `RUST_LOG` overrides it
    pub level: LogLevel,

    /// Console format
    pub format: LogFormat,

    /// Optional JSON log file
    pub file_path: Option<PathBuf>,

    /// Start a new file every day
    pub rotate_daily: bool,

    /// Record span enter/close events
    pub include_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            file_path: None,
            rotate_daily: true,
            include_spans: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Filter directive scoping the level to this crate
    pub fn directive(&self) -> String {
        format!("pacers={}", self.as_str())
    }

    /// Map a `-v` count from the command line onto a level
    pub fn from_verbosity(verbose: u8) -> Self {
        match verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            other => return Err(format!("unknown log level '{}'", other)),
        };
        Ok(level)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// One JSON object per event
    Json,
    /// Single line per event
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            other => return Err(format!("unknown log format '{}'", other)),
        };
        Ok(format)
    }
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed or the log file cannot be
/// opened.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.directive()));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(config))
        .with(file_layer(config)?)
        .try_init()?;

    tracing::debug!(
        level = config.level.as_str(),
        format = ?config.format,
        file = ?config.file_path,
        "Logging initialized"
    );
    Ok(())
}

fn span_events(config: &LogConfig) -> FmtSpan {
    if config.include_spans {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn console_layer<S>(config: &LogConfig) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events(config));

    match config.format {
        LogFormat::Pretty => layer.pretty().with_line_number(true).boxed(),
        LogFormat::Json => layer.json().with_current_span(config.include_spans).boxed(),
        LogFormat::Compact => layer.compact().with_target(false).boxed(),
    }
}

fn file_layer<S>(config: &LogConfig) -> anyhow::Result<Option<BoxedLayer<S>>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(path) = &config.file_path else {
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let layer = fmt::layer()
        .json()
        .with_span_events(span_events(config))
        .with_current_span(config.include_spans);

    let layer = if config.rotate_daily {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("pacers.log");
        layer
            .with_writer(tracing_appender::rolling::daily(dir, name))
            .boxed()
    } else {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layer.with_writer(Mutex::new(file)).boxed()
    };

    Ok(Some(layer))
}
