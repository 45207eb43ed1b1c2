use super::artifacts::{ArtifactCollector, CAPTURE_TIMEOUT};
use super::cancel::CancelSignal;
use super::launcher::{ServiceHandle, ServiceLauncher};
use super::pool::{SessionPool, CLOSE_TIMEOUT};
use super::retry::{AttemptRecord, AttemptRunner};
use super::scenario::ScenarioRunner;
use super::state::{AttemptResult, StepFailure};
use crate::error::PoolError;
use crate::parser::Scenario;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Longest an attempt can spend after its budget: screenshot and console
/// capture, then closing the context
pub const TEARDOWN_LIMIT: Duration =
    Duration::from_secs(2 * CAPTURE_TIMEOUT.as_secs() + CLOSE_TIMEOUT.as_secs());

/// One scenario attempt against a live service and a pooled browser session
///
/// The health check, the session wait and the steps share one attempt
/// budget. Artifacts are captured while the session is still held, then the
/// session is released whatever happened; that teardown is bounded by
/// [`TEARDOWN_LIMIT`].
pub struct BrowserAttempt<'a> {
    pub scenario: &'a Scenario,
    pub pool: &'a SessionPool,
    pub runner: &'a ScenarioRunner,
    pub collector: &'a ArtifactCollector,
    pub launcher: &'a ServiceLauncher,
    pub service: &'a ServiceHandle,
    pub cancel: &'a CancelSignal,
}

impl<'a> BrowserAttempt<'a> {
    async fn without_session(&self, attempt: u32, failure: StepFailure) -> AttemptRecord {
        let result = AttemptResult::failed_before_start(failure);
        let artifacts = Some(
            self.collector
                .capture(None, self.scenario, attempt, &result)
                .await,
        );
        AttemptRecord { result, artifacts }
    }
}

#[async_trait]
impl<'a> AttemptRunner for BrowserAttempt<'a> {
    async fn run_attempt(&self, attempt: u32) -> AttemptRecord {
        let budget = self.runner.attempt_budget(self.scenario);
        let started = Instant::now();

        let healthy = tokio::time::timeout(budget, self.launcher.health_check(self.service))
            .await
            .unwrap_or(false);
        if !healthy {
            let failure = StepFailure::infrastructure(format!(
                "service at {} is not responding",
                self.service.base_url()
            ));
            return self.without_session(attempt, failure).await;
        }

        let remaining = budget.saturating_sub(started.elapsed());
        let session = match self.pool.acquire(self.cancel, remaining).await {
            Ok(session) => session,
            Err(e) => {
                let message = match &e {
                    PoolError::Cancelled => "run cancelled while waiting for a browser".to_string(),
                    other => other.to_string(),
                };
                return self
                    .without_session(attempt, StepFailure::infrastructure(message))
                    .await;
            }
        };

        let result = self
            .runner
            .run(
                self.scenario,
                session.context(),
                self.service.base_url(),
                attempt,
                self.cancel,
                budget.saturating_sub(started.elapsed()),
            )
            .await;

        let artifacts = if self.collector.should_capture(result.passed()) {
            Some(
                self.collector
                    .capture(Some(session.context()), self.scenario, attempt, &result)
                    .await,
            )
        } else {
            None
        };

        self.pool.release(session).await;
        AttemptRecord { result, artifacts }
    }
}
