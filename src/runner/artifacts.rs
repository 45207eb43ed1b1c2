//! Per-attempt failure artifacts: screenshot, step trace and console log.
//!
//! Everything here is best effort. A capture that fails is logged and listed
//! in [`ArtifactSet::errors`]; it never changes the attempt's outcome.

use super::state::{AttemptResult, StepFailure, StepTrace};
use crate::driver::BrowserContext;
use crate::parser::Scenario;
use crate::utils::config::CaptureConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DIR_NAME: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSet {
    pub dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_log: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ArtifactSet {
    pub fn paths(&self) -> Vec<&str> {
        [&self.screenshot, &self.trace, &self.console_log]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .collect()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceFile<'a> {
    scenario_id: &'a str,
    attempt: u32,
    duration_ms: u64,
    failure: Option<&'a StepFailure>,
    steps: &'a [StepTrace],
}

/// Writes artifacts under `<output>/<runId>/<scenarioDir>/attempt-<n>/`
#[derive(Debug, Clone)]
pub struct ArtifactCollector {
    root: PathBuf,
    config: CaptureConfig,
}

impl ArtifactCollector {
    pub fn new(output_dir: &Path, run_id: &str, config: CaptureConfig) -> Self {
        Self {
            root: output_dir.join(run_id),
            config,
        }
    }

    /// Whether an attempt with this result gets artifacts at all
    pub fn should_capture(&self, passed: bool) -> bool {
        !passed || self.config.on_pass
    }

    pub fn attempt_dir(&self, scenario_id: &str, attempt: u32) -> PathBuf {
        self.root
            .join(scenario_dir_name(scenario_id))
            .join(format!("attempt-{}", attempt))
    }

    /// Capture whatever is available. `context` is `None` when the attempt
    /// never obtained a browser session; only the trace is written then.
    pub async fn capture(
        &self,
        context: Option<&dyn BrowserContext>,
        scenario: &Scenario,
        attempt: u32,
        result: &AttemptResult,
    ) -> ArtifactSet {
        let dir = self.attempt_dir(&scenario.id, attempt);
        let mut set = ArtifactSet {
            dir: dir.display().to_string(),
            ..Default::default()
        };

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            let message = format!("failed to create {}: {}", dir.display(), e);
            log::warn!("{}", message);
            set.errors.push(message);
            return set;
        }

        if self.config.screenshot {
            if let Some(ctx) = context {
                let path = dir.join("screenshot.png");
                match tokio::time::timeout(CAPTURE_TIMEOUT, ctx.screenshot()).await {
                    Ok(Ok(bytes)) => match tokio::fs::write(&path, bytes).await {
                        Ok(()) => set.screenshot = Some(path.display().to_string()),
                        Err(e) => set.record_error("screenshot", e),
                    },
                    Ok(Err(e)) => set.record_error("screenshot", e),
                    Err(_) => set.record_error("screenshot", "timed out"),
                }
            }
        }

        if self.config.trace {
            let path = dir.join("trace.json");
            let trace = TraceFile {
                scenario_id: &scenario.id,
                attempt,
                duration_ms: result.duration_ms,
                failure: result.failure.as_ref(),
                steps: &result.trace,
            };
            let written = match serde_json::to_vec_pretty(&trace) {
                Ok(json) => tokio::fs::write(&path, json).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match written {
                Ok(()) => set.trace = Some(path.display().to_string()),
                Err(e) => set.record_error("trace", e),
            }
        }

        if self.config.console {
            if let Some(ctx) = context {
                let path = dir.join("console.log");
                match tokio::time::timeout(CAPTURE_TIMEOUT, ctx.console_log()).await {
                    Ok(Ok(lines)) => {
                        let mut content = lines.join("\n");
                        content.push('\n');
                        match tokio::fs::write(&path, content).await {
                            Ok(()) => set.console_log = Some(path.display().to_string()),
                            Err(e) => set.record_error("console log", e),
                        }
                    }
                    Ok(Err(e)) => set.record_error("console log", e),
                    Err(_) => set.record_error("console log", "timed out"),
                }
            }
        }

        set
    }
}

impl ArtifactSet {
    fn record_error(&mut self, what: &str, err: impl std::fmt::Display) {
        let message = format!("{} capture failed: {}", what, err);
        log::warn!("{}", message);
        self.errors.push(message);
    }
}

/// Filesystem-safe, lowercase directory name for a scenario id. When
/// sanitizing changes the id (case included), a short hash of the original is
/// appended so two ids never share a directory, even on case-insensitive
/// filesystems.
pub fn scenario_dir_name(id: &str) -> String {
    let mut name: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(MAX_DIR_NAME)
        .collect();

    if name != id {
        let digest = Sha256::digest(id.as_bytes());
        let short: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
        if name.is_empty() {
            name.push_str("scenario");
        }
        name.push('-');
        name.push_str(&short);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::library_app;
    use crate::driver::BrowserEngine;
    use crate::runner::state::{FailureKind, StepStatus};

    fn scenario(id: &str) -> Scenario {
        crate::parser::yaml::parse_yaml_content(
            &format!("id: \"{}\"\nsteps:\n  - navigate: /catalog\n", id),
            Path::new("s.yaml"),
        )
        .unwrap()
    }

    fn failed_result() -> AttemptResult {
        AttemptResult {
            failure: Some(StepFailure::new(
                FailureKind::ActionError,
                Some(0),
                "element not found: #missing",
            )),
            trace: vec![StepTrace {
                index: 0,
                label: "click #missing".to_string(),
                status: StepStatus::Failed,
                duration_ms: 12,
                error: Some("element not found: #missing".to_string()),
            }],
            duration_ms: 15,
        }
    }

    #[test]
    fn test_scenario_dir_name() {
        assert_eq!(scenario_dir_name("add-book"), "add-book");

        let a = scenario_dir_name("checkout/guest");
        let b = scenario_dir_name("checkout guest");
        assert!(a.starts_with("checkout_guest-"));
        assert_ne!(a, b);
        assert_eq!(scenario_dir_name("../.."), scenario_dir_name("../.."));
        assert!(!scenario_dir_name("../..").contains('.'));
    }

    #[test]
    fn test_ids_differing_only_in_case_get_distinct_dirs() {
        let upper = scenario_dir_name("Login");
        let lower = scenario_dir_name("login");
        assert_eq!(lower, "login");
        assert!(upper.starts_with("login-"), "{}", upper);
        assert_ne!(upper.to_lowercase(), lower.to_lowercase());
    }

    #[tokio::test]
    async fn test_capture_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let collector = ArtifactCollector::new(dir.path(), "run-1", CaptureConfig::default());
        let engine = library_app();
        let ctx = engine.new_context().await.unwrap();
        ctx.navigate("http://localhost:5000/catalog").await.unwrap();

        let set = collector
            .capture(Some(&*ctx), &scenario("borrow"), 2, &failed_result())
            .await;

        assert!(set.errors.is_empty(), "{:?}", set.errors);
        let attempt_dir = dir.path().join("run-1").join("borrow").join("attempt-2");
        assert!(attempt_dir.join("screenshot.png").exists());
        assert!(attempt_dir.join("console.log").exists());

        let trace: serde_json::Value = serde_json::from_slice(
            &std::fs::read(attempt_dir.join("trace.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(trace["attempt"], 2);
        assert_eq!(trace["failure"]["kind"], "actionError");
        assert_eq!(trace["steps"][0]["status"], "failed");
    }

    #[tokio::test]
    async fn test_capture_failures_are_recorded_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let collector = ArtifactCollector::new(dir.path(), "run-1", CaptureConfig::default());
        let engine = library_app().with_failing_screenshots();
        let ctx = engine.new_context().await.unwrap();

        let set = collector
            .capture(Some(&*ctx), &scenario("borrow"), 1, &failed_result())
            .await;

        assert!(set.screenshot.is_none());
        assert!(set.trace.is_some());
        assert_eq!(set.errors.len(), 1);
        assert!(set.errors[0].contains("screenshot"));
    }

    #[test]
    fn test_should_capture_respects_on_pass() {
        let collector = ArtifactCollector::new(Path::new("out"), "r", CaptureConfig::default());
        assert!(collector.should_capture(false));
        assert!(!collector.should_capture(true));

        let config = CaptureConfig {
            on_pass: true,
            ..CaptureConfig::default()
        };
        let collector = ArtifactCollector::new(Path::new("out"), "r", config);
        assert!(collector.should_capture(true));
    }
}
