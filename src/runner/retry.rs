//! Bounded retry for transient failures.
//!
//! Only `ActionError` and `Timeout` are retried. An assertion failure means
//! the application is wrong and ends the scenario immediately; an
//! infrastructure failure ends it as `Errored`.

use super::artifacts::ArtifactSet;
use super::backoff::ExponentialBackoff;
use super::cancel::CancelSignal;
use super::events::{EventEmitter, TestEvent};
use super::state::{AttemptResult, FailureKind, Outcome, ScenarioResult, ScenarioState};
use crate::parser::Scenario;
use crate::utils::config::BackoffConfig;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Everything one attempt produced
#[derive(Debug, Clone, Default)]
pub struct AttemptRecord {
    pub result: AttemptResult,
    pub artifacts: Option<ArtifactSet>,
}

/// Runs a single attempt end to end: acquire a session, run the scenario,
/// capture artifacts when needed, release the session.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    async fn run_attempt(&self, attempt: u32) -> AttemptRecord;
}

pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffConfig,
    seed: u64,
}

impl RetryPolicy {
    /// `seed` drives the jitter; each scenario derives its own stream from it
    /// so delays don't depend on scheduling order.
    pub fn new(max_attempts: u32, backoff: BackoffConfig, seed: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            seed,
        }
    }

    fn backoff_for(&self, scenario_id: &str) -> ExponentialBackoff {
        let digest = Sha256::digest(scenario_id.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let seed = self.seed ^ u64::from_le_bytes(bytes);
        ExponentialBackoff::new(
            Duration::from_millis(self.backoff.initial_ms),
            Duration::from_millis(self.backoff.cap_ms),
            self.backoff.jitter,
            seed,
        )
    }

    pub async fn execute(
        &self,
        scenario: &Scenario,
        runner: &dyn AttemptRunner,
        cancel: &CancelSignal,
        events: &EventEmitter,
    ) -> ScenarioResult {
        let mut state = ScenarioState::new(scenario);
        let mut backoff = self.backoff_for(&scenario.id);
        let mut slept_ms = 0;

        loop {
            let attempt = state.next_attempt_number();
            if cancel.is_cancelled() {
                return state.finish(Outcome::Errored {
                    reason: format!("run cancelled before attempt {}", attempt),
                });
            }

            events.emit(TestEvent::AttemptStarted {
                scenario_id: scenario.id.clone(),
                attempt,
                max_attempts: self.max_attempts,
            });
            let started_at = chrono::Utc::now().to_rfc3339();
            let record = runner.run_attempt(attempt).await;
            let failure = record.result.failure.clone();
            state.record(started_at, slept_ms, record.result, record.artifacts);

            let failure = match failure {
                None if attempt == 1 => return state.finish(Outcome::Passed),
                None => return state.finish(Outcome::FlakedThenPassed),
                Some(failure) => failure,
            };

            events.emit(TestEvent::AttemptFailed {
                scenario_id: scenario.id.clone(),
                attempt,
                kind: failure.kind,
                error: failure.message.clone(),
            });

            match failure.kind {
                FailureKind::Infrastructure => {
                    return state.finish(Outcome::Errored {
                        reason: failure.to_string(),
                    })
                }
                kind if !kind.is_retryable() || attempt >= self.max_attempts => {
                    return state.finish(Outcome::Failed {
                        kind,
                        reason: failure.to_string(),
                    })
                }
                _ => {}
            }

            let delay = backoff.delay();
            backoff.next();
            log::debug!(
                "{} attempt {} failed ({}), retrying in {}ms",
                scenario.id,
                attempt,
                failure.kind.as_str(),
                delay.as_millis()
            );
            events.emit(TestEvent::Retrying {
                scenario_id: scenario.id.clone(),
                next_attempt: attempt + 1,
                max_attempts: self.max_attempts,
                delay_ms: delay.as_millis() as u64,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return state.finish(Outcome::Errored {
                        reason: format!("run cancelled while waiting to retry ({})", failure),
                    });
                }
            }
            slept_ms = delay.as_millis() as u64;
        }
    }
}
