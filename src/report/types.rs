use crate::runner::pool::PoolStats;
use crate::runner::state::{Outcome, ScenarioResult};
use serde::{Deserialize, Serialize};

/// Counts per terminal outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub flaked: usize,
    pub failed: usize,
    pub errored: usize,
}

impl Summary {
    pub fn from_results(results: &[ScenarioResult]) -> Self {
        results.iter().fold(
            Summary {
                total: results.len(),
                ..Default::default()
            },
            |mut s, r| {
                match r.outcome {
                    Outcome::Passed => s.passed += 1,
                    Outcome::FlakedThenPassed => s.flaked += 1,
                    Outcome::Failed { .. } => s.failed += 1,
                    Outcome::Errored { .. } => s.errored += 1,
                }
                s
            },
        )
    }
}

/// Final report of a run. Scenarios keep their load order, so serializing the
/// same report twice yields identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub workers: usize,
    /// Jitter seed, for reproducing retry timing
    pub seed: u64,
    pub summary: Summary,
    pub pool: PoolStats,
    pub scenarios: Vec<ScenarioResult>,
    pub exit_code: i32,
}

impl RunReport {
    pub fn new(
        run_id: String,
        started_at: chrono::DateTime<chrono::Utc>,
        workers: usize,
        seed: u64,
        pool: PoolStats,
        scenarios: Vec<ScenarioResult>,
    ) -> Self {
        let finished_at = chrono::Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            run_id,
            started_at: started_at.to_rfc3339(),
            finished_at: finished_at.to_rfc3339(),
            duration_ms,
            workers,
            seed,
            summary: Summary::from_results(&scenarios),
            pool,
            exit_code: exit_code(&scenarios),
            scenarios,
        }
    }

    /// Every scenario that did not pass, in report order
    pub fn failures(&self) -> impl Iterator<Item = &ScenarioResult> {
        self.scenarios.iter().filter(|s| !s.outcome.is_success())
    }
}

/// 0 when every scenario passed (possibly after retries), 1 otherwise
pub fn exit_code(results: &[ScenarioResult]) -> i32 {
    if results.iter().all(|r| r.outcome.is_success()) {
        0
    } else {
        1
    }
}

/// Report with one scenario per outcome, shared by the report tests
#[cfg(test)]
pub(crate) fn sample_report() -> RunReport {
    use crate::runner::artifacts::ArtifactSet;
    use crate::runner::state::{Attempt, FailureKind, StepFailure, StepStatus, StepTrace};

    let step = |index: usize, label: &str, status: StepStatus, error: Option<&str>| StepTrace {
        index,
        label: label.to_string(),
        status,
        duration_ms: 12,
        error: error.map(str::to_string),
    };
    let attempt = |number: u32, failure: Option<StepFailure>, artifacts: Option<ArtifactSet>| {
        let steps = match &failure {
            None => vec![step(0, "navigate /catalog", StepStatus::Passed, None)],
            Some(f) => vec![
                step(0, "navigate /catalog", StepStatus::Passed, None),
                step(1, "click button.borrow", StepStatus::Failed, Some(f.message.as_str())),
                step(2, "assert visible(.flash-success)", StepStatus::Skipped, None),
            ],
        };
        Attempt {
            number,
            started_at: "2026-03-02T10:00:00+00:00".to_string(),
            duration_ms: 40,
            backoff_ms: if number == 1 { 0 } else { 500 },
            passed: failure.is_none(),
            failure,
            steps,
            artifacts,
        }
    };
    let artifacts = |id: &str, n: u32| {
        let dir = format!("output/run-1/{}/attempt-{}", id, n);
        ArtifactSet {
            screenshot: Some(format!("{}/screenshot.png", dir)),
            trace: Some(format!("{}/trace.json", dir)),
            console_log: Some(format!("{}/console.log", dir)),
            errors: Vec::new(),
            dir,
        }
    };
    let result = |id: &str, outcome: Outcome, attempts: Vec<Attempt>| ScenarioResult {
        scenario_id: id.to_string(),
        source: format!("scenarios/{}.yaml", id),
        tags: vec!["smoke".to_string()],
        outcome,
        attempts,
        duration_ms: 80,
    };
    let action = StepFailure::new(FailureKind::ActionError, Some(1), "element is detached");
    let assertion = StepFailure::new(
        FailureKind::AssertionFailed,
        Some(1),
        "expected visible(.flash-success) but it was hidden",
    );

    let scenarios = vec![
        result("add-book", Outcome::Passed, vec![attempt(1, None, None)]),
        result(
            "borrow-book",
            Outcome::FlakedThenPassed,
            vec![
                attempt(1, Some(action.clone()), Some(artifacts("borrow-book", 1))),
                attempt(2, None, None),
            ],
        ),
        result(
            "return-book",
            Outcome::Failed {
                kind: FailureKind::AssertionFailed,
                reason: assertion.to_string(),
            },
            vec![attempt(1, Some(assertion), Some(artifacts("return-book", 1)))],
        ),
        result(
            "search <books> & \"authors\"",
            Outcome::Errored {
                reason: "service failed to start: port 5000 is already in use".to_string(),
            },
            Vec::new(),
        ),
    ];

    RunReport {
        run_id: "run-1".to_string(),
        started_at: "2026-03-02T10:00:00+00:00".to_string(),
        finished_at: "2026-03-02T10:00:02+00:00".to_string(),
        duration_ms: 2_000,
        workers: 2,
        seed: 42,
        summary: Summary::from_results(&scenarios),
        pool: PoolStats {
            live: 0,
            peak: 2,
            created: 4,
            released: 4,
        },
        exit_code: exit_code(&scenarios),
        scenarios,
    }
}
