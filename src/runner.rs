//! Event loop driving a pacing session
//!
//! The runner owns the [`PacingSession`] and is the only task that touches
//! it. Telemetry, refreshed plans and reoptimization outcomes all arrive
//! as messages and are handled one at a time, so the tick path never
//! waits on the network.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::PacingError;
use crate::models::{RawPlan, TelemetrySample};
use crate::plan::{PlanLoad, PlanPoller, PlanSource};
use crate::reopt::{ReoptClient, ReoptOutcome, GUARD_GRACE};
use crate::session::{PacingSession, PendingReopt, TickReport};

/// Interval of the guard deadline check between ticks
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Input of the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Tick(TelemetrySample),
    /// Athlete crossed the start line at this distance
    LeadIn(f64),
}

/// Counters collected over one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: u64,
    pub plan_loads: u64,
    pub rejected_plans: u64,
    pub reopt_requests: u64,
    pub reopt_successes: u64,
    pub reopt_failures: u64,
}

/// Single-task driver of a [`PacingSession`]
pub struct Runner {
    config: AppConfig,
    session: PacingSession,
    client: Arc<dyn ReoptClient>,
    summary: RunSummary,
}

impl Runner {
    pub fn new(config: AppConfig, client: Arc<dyn ReoptClient>) -> Self {
        let session = PacingSession::new(&config);
        Self {
            config,
            session,
            client,
            summary: RunSummary::default(),
        }
    }

    /// Run until `events` closes, calling `on_report` after every tick
    ///
    /// The plan is fetched once before the first event is handled, then
    /// polled in the background every `refresh.interval_secs`. An
    /// outstanding reoptimization is awaited before returning.
    pub async fn run<S, F>(
        mut self,
        source: S,
        mut events: mpsc::Receiver<SessionEvent>,
        mut on_report: F,
    ) -> RunSummary
    where
        S: PlanSource + 'static,
        F: FnMut(&TickReport),
    {
        let mut poller = PlanPoller::new(source, self.config.refresh.timeout());
        if let Some(raw) = poller.check_for_update().await {
            self.apply_plan(raw);
        }

        let refresh_now = Arc::new(Notify::new());
        let (plan_tx, mut plan_rx) = mpsc::channel::<RawPlan>(4);
        let poll_task = tokio::spawn(poller.run(
            self.config.refresh.interval(),
            plan_tx,
            Arc::clone(&refresh_now),
        ));

        let (outcome_tx, mut outcome_rx) = mpsc::channel::<(u64, ReoptOutcome)>(4);
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Tick(sample)) => {
                        let now = Instant::now().into_std();
                        let report = self.session.on_tick(&sample, &self.config, now);
                        self.summary.ticks += 1;
                        if let Some(pending) = &report.reopt {
                            self.dispatch(pending, outcome_tx.clone());
                        }
                        on_report(&report);
                    }
                    Some(SessionEvent::LeadIn(distance)) => {
                        self.session.set_lead_in(distance);
                    }
                    None => break,
                },
                Some(raw) = plan_rx.recv() => self.apply_plan(raw),
                Some((sequence, outcome)) = outcome_rx.recv() => {
                    self.on_outcome(sequence, outcome, &refresh_now);
                }
                _ = housekeeping.tick() => {
                    self.session.expire_stale(Instant::now().into_std());
                }
            }
        }

        if self.session.guard().is_in_flight() {
            let wait = self.config.reoptimization.timeout() + GUARD_GRACE;
            debug!(?wait, "Telemetry ended, waiting for outstanding reoptimization");
            match tokio::time::timeout(wait, outcome_rx.recv()).await {
                Ok(Some((sequence, outcome))) => self.on_outcome(sequence, outcome, &refresh_now),
                _ => warn!("Outstanding reoptimization did not finish"),
            }
        }

        poll_task.abort();
        info!(
            session = %self.session.id(),
            ticks = self.summary.ticks,
            plan_loads = self.summary.plan_loads,
            reopt_requests = self.summary.reopt_requests,
            "Pacing session finished"
        );
        self.summary
    }

    fn apply_plan(&mut self, raw: RawPlan) {
        match self.session.apply_plan(raw) {
            Ok(PlanLoad::Loaded { .. }) => self.summary.plan_loads += 1,
            Ok(PlanLoad::Unchanged) => {}
            Err(e) => {
                self.summary.rejected_plans += 1;
                PacingError::from(e).log("Rejected plan document, keeping previous plan");
            }
        }
    }

    /// Send the request in the background; its outcome comes back on
    /// `outcomes`
    fn dispatch(&mut self, pending: &PendingReopt, outcomes: mpsc::Sender<(u64, ReoptOutcome)>) {
        self.summary.reopt_requests += 1;

        let client = Arc::clone(&self.client);
        let request = pending.request.clone();
        let sequence = pending.sequence;
        let timeout = self.config.reoptimization.timeout();

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, client.reoptimize(&request)).await {
                Ok(response) => ReoptOutcome::from_response(response),
                Err(_) => ReoptOutcome::TimedOut,
            };
            if outcomes.send((sequence, outcome)).await.is_err() {
                debug!(sequence, "Session gone before reoptimization finished");
            }
        });
    }

    /// Outcomes of requests the guard no longer tracks are dropped
    /// without touching the counters
    fn on_outcome(&mut self, sequence: u64, outcome: ReoptOutcome, refresh_now: &Notify) {
        if !self.session.on_reopt_outcome(sequence, &outcome) {
            return;
        }
        if outcome.is_success() {
            self.summary.reopt_successes += 1;
            refresh_now.notify_one();
        } else {
            self.summary.reopt_failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizationConfig;
    use crate::error::{ReoptError, SourceError};
    use crate::reopt::{ReoptimizationRequest, ReoptimizationResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone)]
    struct SharedSource {
        doc: Arc<Mutex<RawPlan>>,
        fetches: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl PlanSource for SharedSource {
        async fn fetch(&mut self) -> Result<RawPlan, SourceError> {
            *self.fetches.lock().unwrap() += 1;
            Ok(self.doc.lock().unwrap().clone())
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }

    struct MockClient {
        delay: Duration,
        response: Result<&'static str, ()>,
        requests: Mutex<Vec<ReoptimizationRequest>>,
    }

    impl MockClient {
        fn new(delay: Duration, response: Result<&'static str, ()>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                response,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReoptClient for MockClient {
        async fn reoptimize(
            &self,
            request: &ReoptimizationRequest,
        ) -> Result<ReoptimizationResponse, ReoptError> {
            self.requests.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            match self.response {
                Ok(result) => Ok(ReoptimizationResponse {
                    result: result.to_string(),
                }),
                Err(()) => Err(ReoptError::Transport("connection refused".to_string())),
            }
        }

        async fn run_optimization(
            &self,
            _config: &OptimizationConfig,
        ) -> Result<ReoptimizationResponse, ReoptError> {
            Ok(ReoptimizationResponse::success())
        }
    }

    fn plan_doc() -> RawPlan {
        let n = 500;
        RawPlan {
            distance: (0..n).map(|i| i as f64 * 10.0).collect(),
            power: vec![250.0; n],
            w_bal: Some(vec![20000.0; n]),
            time: None,
        }
    }

    fn source() -> SharedSource {
        SharedSource {
            doc: Arc::new(Mutex::new(plan_doc())),
            fetches: Arc::new(Mutex::new(0)),
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.reoptimization.enabled = true;
        config
    }

    fn tick(distance: f64, w_bal: f64) -> SessionEvent {
        SessionEvent::Tick(TelemetrySample::new(7, 250.0, distance, 240.0, 35.0, w_bal).unwrap())
    }

    fn feed(events: Vec<(Duration, SessionEvent)>) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for (pause, event) in events {
                tokio::time::sleep(pause).await;
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_every_tick_with_targets() {
        let client = MockClient::new(Duration::ZERO, Ok("Success"));
        let events = feed(vec![
            (Duration::ZERO, tick(100.0, 20000.0)),
            (Duration::from_millis(500), tick(110.0, 20000.0)),
        ]);

        let mut reports = Vec::new();
        let summary = Runner::new(config(), client)
            .run(source(), events, |r| reports.push(r.clone()))
            .await;

        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.plan_loads, 1);
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.target_power == Some(250.0)));
        assert_eq!(reports[1].trail.distance, vec![100.0, 110.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_in_flight() {
        let client = MockClient::new(Duration::from_secs(3), Ok("Success"));
        let events = feed(vec![
            (Duration::ZERO, tick(1500.0, 10000.0)),
            (Duration::from_millis(500), tick(2600.0, 10000.0)),
            (Duration::from_millis(500), tick(3700.0, 10000.0)),
        ]);

        let summary = Runner::new(config(), client.clone())
            .run(source(), events, |_| {})
            .await;

        assert_eq!(summary.reopt_requests, 1);
        assert_eq!(summary.reopt_successes, 1);
        assert_eq!(client.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_released_after_success() {
        let client = MockClient::new(Duration::from_millis(100), Ok("Success"));
        let events = feed(vec![
            (Duration::ZERO, tick(1500.0, 10000.0)),
            (Duration::from_secs(1), tick(2600.0, 10000.0)),
        ]);

        let summary = Runner::new(config(), client.clone())
            .run(source(), events, |_| {})
            .await;

        assert_eq!(summary.reopt_requests, 2);
        let attempts: Vec<u32> = client
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.state.attempt)
            .collect();
        assert_eq!(attempts, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_guard() {
        let mut config = config();
        config.reoptimization.timeout_secs = 2;
        let client = MockClient::new(Duration::from_secs(60), Ok("Success"));
        let events = feed(vec![
            (Duration::ZERO, tick(1500.0, 10000.0)),
            (Duration::from_secs(3), tick(1800.0, 10000.0)),
        ]);

        let summary = Runner::new(config, client).run(source(), events, |_| {}).await;

        // Second attempt only needs the retry spacing after a timeout.
        assert_eq!(summary.reopt_requests, 2);
        assert!(summary.reopt_failures >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_releases_guard() {
        let client = MockClient::new(Duration::ZERO, Err(()));
        let events = feed(vec![
            (Duration::ZERO, tick(1500.0, 10000.0)),
            (Duration::from_secs(1), tick(1800.0, 10000.0)),
        ]);

        let summary = Runner::new(config(), client).run(source(), events, |_| {}).await;
        assert_eq!(summary.reopt_requests, 2);
        assert_eq!(summary.reopt_failures, 2);
    }

    #[test]
    fn test_outcome_for_untracked_request_is_not_counted() {
        let config = config();
        let mut runner = Runner::new(config.clone(), MockClient::new(Duration::ZERO, Ok("Success")));
        let refresh_now = Notify::new();

        // Nothing in flight yet
        runner.on_outcome(42, ReoptOutcome::Success, &refresh_now);
        assert_eq!(runner.summary.reopt_successes, 0);
        assert_eq!(runner.summary.reopt_failures, 0);

        runner.session.apply_plan(plan_doc()).unwrap();
        let SessionEvent::Tick(sample) = tick(1500.0, 10000.0) else {
            unreachable!()
        };
        let pending = runner
            .session
            .on_tick(&sample, &config, std::time::Instant::now())
            .reopt
            .unwrap();

        runner.on_outcome(pending.sequence + 1, ReoptOutcome::TimedOut, &refresh_now);
        assert_eq!(runner.summary.reopt_failures, 0);
        assert!(runner.session.guard().is_in_flight());

        runner.on_outcome(pending.sequence, ReoptOutcome::Success, &refresh_now);
        assert_eq!(runner.summary.reopt_successes, 1);
        assert!(!runner.session.guard().is_in_flight());

        // Late duplicate of the same outcome
        runner.on_outcome(pending.sequence, ReoptOutcome::Success, &refresh_now);
        assert_eq!(runner.summary.reopt_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_triggers_immediate_refresh() {
        let mut config = config();
        config.refresh.interval_secs = 3600;
        let client = MockClient::new(Duration::ZERO, Ok("Success"));
        let source = source();
        let fetches = Arc::clone(&source.fetches);
        let events = feed(vec![
            (Duration::from_millis(10), tick(1500.0, 10000.0)),
            (Duration::from_secs(1), tick(1510.0, 10000.0)),
        ]);

        Runner::new(config, client).run(source, events, |_| {}).await;

        // Initial fetch, first poller tick, then the refresh after success.
        assert_eq!(*fetches.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lead_in_event_shifts_plan() {
        let client = MockClient::new(Duration::ZERO, Ok("Success"));
        let events = feed(vec![
            (Duration::ZERO, SessionEvent::LeadIn(400.0)),
            (Duration::ZERO, tick(1900.0, 10000.0)),
        ]);

        Runner::new(config(), client.clone())
            .run(source(), events, |_| {})
            .await;

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].state.distance, 1500.0);
    }
}
