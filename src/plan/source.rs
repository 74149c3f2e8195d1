//! Pollable plan sources
//!
//! The optimisation service publishes the plan as a JSON document. A
//! [`PlanSource`] fetches it, and a [`PlanPoller`] polls a source on a
//! fixed interval with a bounded wait, handing changed documents to the
//! event loop over a channel.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::{PacingError, SourceError};
use crate::models::RawPlan;

/// Something that can produce the latest plan document
#[async_trait]
pub trait PlanSource: Send {
    async fn fetch(&mut self) -> Result<RawPlan, SourceError>;

    /// Human readable location used in logs and errors
    fn location(&self) -> String;
}

/// Plan document on the local filesystem
#[derive(Debug, Clone)]
pub struct FilePlanSource {
    path: PathBuf,
}

impl FilePlanSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PlanSource for FilePlanSource {
    async fn fetch(&mut self) -> Result<RawPlan, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::FetchFailed {
                location: self.location(),
                reason: e.to_string(),
            })?;

        serde_json::from_str(&content).map_err(|e| SourceError::ParseFailed {
            location: self.location(),
            reason: e.to_string(),
        })
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Plan document served over HTTP
#[derive(Debug, Clone)]
pub struct HttpPlanSource {
    http: reqwest::Client,
    url: String,
}

impl HttpPlanSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PlanSource for HttpPlanSource {
    async fn fetch(&mut self) -> Result<RawPlan, SourceError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::FetchFailed {
                location: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::FetchFailed {
                location: self.url.clone(),
                reason: format!("HTTP {}", status),
            });
        }

        response
            .json::<RawPlan>()
            .await
            .map_err(|e| SourceError::ParseFailed {
                location: self.url.clone(),
                reason: e.to_string(),
            })
    }

    fn location(&self) -> String {
        self.url.clone()
    }
}

/// Builds the source matching a configured location
pub fn source_for(location: &str) -> Box<dyn PlanSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpPlanSource::new(location))
    } else {
        Box::new(FilePlanSource::new(location))
    }
}

#[async_trait]
impl PlanSource for Box<dyn PlanSource> {
    async fn fetch(&mut self) -> Result<RawPlan, SourceError> {
        (**self).fetch().await
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

/// Polls a source and reports documents that differ from the last one seen
pub struct PlanPoller<S> {
    source: S,
    timeout: Duration,
    last_seen: Option<RawPlan>,
    consecutive_failures: u32,
}

impl<S: PlanSource> PlanPoller<S> {
    pub fn new(source: S, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            last_seen: None,
            consecutive_failures: 0,
        }
    }

    /// Fetch once; `Some` only when the document changed since last poll
    ///
    /// Failures are logged and swallowed so that they never reach the
    /// telemetry path.
    pub async fn check_for_update(&mut self) -> Option<RawPlan> {
        match self.fetch_bounded().await {
            Ok(raw) => {
                if self.consecutive_failures > 0 {
                    info!(
                        location = %self.source.location(),
                        failures = self.consecutive_failures,
                        "Plan source recovered"
                    );
                }
                self.consecutive_failures = 0;

                if self.last_seen.as_ref() == Some(&raw) {
                    return None;
                }
                self.last_seen = Some(raw.clone());
                Some(raw)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                PacingError::from(e).log(&format!(
                    "Plan refresh failed ({} in a row), keeping previous plan",
                    self.consecutive_failures
                ));
                None
            }
        }
    }

    async fn fetch_bounded(&mut self) -> Result<RawPlan, SourceError> {
        let location = self.source.location();
        match tokio::time::timeout(self.timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                location,
                timeout: self.timeout,
            }),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Poll every `interval` (or when `refresh_now` fires) until the
    /// receiving side goes away
    pub async fn run(
        mut self,
        interval: Duration,
        updates: mpsc::Sender<RawPlan>,
        refresh_now: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = refresh_now.notified() => {
                    debug!("Immediate plan refresh requested");
                }
            }

            if let Some(raw) = self.check_for_update().await {
                if updates.send(raw).await.is_err() {
                    debug!("Plan update receiver dropped, stopping poller");
                    return;
                }
            }
            if updates.is_closed() {
                return;
            }
        }
    }
}
