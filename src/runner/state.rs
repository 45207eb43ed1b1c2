use super::artifacts::ArtifactSet;
use crate::parser::Scenario;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The application did not reach the expected state. Never retried.
    AssertionFailed,
    /// The browser could not perform an interaction
    ActionError,
    /// A step, wait or the whole attempt ran out of time
    Timeout,
    /// Lost browser, unavailable service, exhausted pool or cancellation
    Infrastructure,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::ActionError | FailureKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AssertionFailed => "AssertionFailed",
            FailureKind::ActionError => "ActionError",
            FailureKind::Timeout => "Timeout",
            FailureKind::Infrastructure => "Infrastructure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailure {
    pub kind: FailureKind,
    /// Index of the failing step (`expect` checks continue after the last
    /// step); `None` for failures outside any step such as pool or service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, step_index: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind,
            step_index,
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Infrastructure, None, message)
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step_index {
            Some(i) => write!(f, "{} at step {}: {}", self.kind.as_str(), i, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// One line of the step trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTrace {
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Raw result of running one scenario against one session
#[derive(Debug, Clone, Default)]
pub struct AttemptResult {
    pub failure: Option<StepFailure>,
    pub trace: Vec<StepTrace>,
    pub duration_ms: u64,
}

impl AttemptResult {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    /// Result for an attempt that failed before any step ran
    pub fn failed_before_start(failure: StepFailure) -> Self {
        Self {
            failure: Some(failure),
            trace: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// A completed attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// 1-based, contiguous
    pub number: u32,
    pub started_at: String,
    pub duration_ms: u64,
    /// Delay slept before this attempt started
    pub backoff_ms: u64,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    pub steps: Vec<StepTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactSet>,
}

/// Terminal outcome of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    Passed,
    FlakedThenPassed,
    Failed { kind: FailureKind, reason: String },
    Errored { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Passed | Outcome::FlakedThenPassed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::FlakedThenPassed => "flaked",
            Outcome::Failed { .. } => "failed",
            Outcome::Errored { .. } => "errored",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Failed { reason, .. } | Outcome::Errored { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Final record for one scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub source: String,
    pub tags: Vec<String>,
    pub outcome: Outcome,
    pub attempts: Vec<Attempt>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    /// Result for a scenario that never got to run (cancelled while queued,
    /// service never became ready)
    pub fn not_started(scenario: &Scenario, reason: impl Into<String>) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            source: scenario.source.display().to_string(),
            tags: scenario.tags.clone(),
            outcome: Outcome::Errored {
                reason: reason.into(),
            },
            attempts: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Mutable bookkeeping while a scenario's attempts are running
pub struct ScenarioState {
    scenario_id: String,
    source: String,
    tags: Vec<String>,
    attempts: Vec<Attempt>,
    started_at: Instant,
}

impl ScenarioState {
    pub fn new(scenario: &Scenario) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            source: scenario.source.display().to_string(),
            tags: scenario.tags.clone(),
            attempts: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn next_attempt_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn record(
        &mut self,
        started_at: String,
        backoff_ms: u64,
        result: AttemptResult,
        artifacts: Option<ArtifactSet>,
    ) -> &Attempt {
        let attempt = Attempt {
            number: self.next_attempt_number(),
            started_at,
            duration_ms: result.duration_ms,
            backoff_ms,
            passed: result.failure.is_none(),
            failure: result.failure,
            steps: result.trace,
            artifacts,
        };
        self.attempts.push(attempt);
        &self.attempts[self.attempts.len() - 1]
    }

    pub fn finish(self, outcome: Outcome) -> ScenarioResult {
        ScenarioResult {
            scenario_id: self.scenario_id,
            source: self.source,
            tags: self.tags,
            outcome,
            attempts: self.attempts,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}
