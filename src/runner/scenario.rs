//! Executes one scenario against one browser session.

use super::cancel::CancelSignal;
use super::context::VarScope;
use super::events::{EventEmitter, TestEvent};
use super::state::{AttemptResult, FailureKind, StepFailure, StepStatus, StepTrace};
use crate::driver::{BrowserContext, ElementAction, ElementRef, Probe};
use crate::error::DriverError;
use crate::parser::{Condition, Scenario, Step, TextContainsParams};
use crate::utils::config::HarnessConfig;
use regex::Regex;
use std::time::{Duration, Instant};

/// Timing knobs for a scenario attempt
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub step_timeout: Duration,
    pub scenario_timeout: Duration,
    pub assert_timeout: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            step_timeout: Duration::from_millis(config.step_timeout_ms),
            scenario_timeout: Duration::from_millis(config.scenario_timeout_ms),
            assert_timeout: Duration::from_millis(config.assert_timeout_ms),
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// What a condition check saw on the page
struct Observation {
    met: bool,
    actual: String,
}

/// Stateless scenario executor; safe to share between workers
pub struct ScenarioRunner {
    settings: RunnerSettings,
    events: EventEmitter,
}

impl ScenarioRunner {
    pub fn new(settings: RunnerSettings, events: EventEmitter) -> Self {
        Self { settings, events }
    }

    /// Wall-time allowed for one attempt of `scenario`
    pub fn attempt_budget(&self, scenario: &Scenario) -> Duration {
        scenario
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.scenario_timeout)
    }

    /// Run every step in order, then the `expect` conditions, within
    /// `budget`. The first failure stops the attempt; remaining steps are
    /// traced as skipped.
    pub async fn run(
        &self,
        scenario: &Scenario,
        context: &dyn BrowserContext,
        base_url: &str,
        attempt: u32,
        cancel: &CancelSignal,
        budget: Duration,
    ) -> AttemptResult {
        let started = Instant::now();
        let scope = VarScope::new(&scenario.vars, base_url, attempt);
        let mut trace = Vec::new();

        let failure = if cancel.is_cancelled() {
            Some(StepFailure::infrastructure("run cancelled before the attempt started"))
        } else {
            tokio::select! {
                result = tokio::time::timeout(budget, self.run_steps(scenario, context, &scope, attempt, &mut trace)) => {
                    match result {
                        Ok(outcome) => outcome.err(),
                        Err(_) => Some(StepFailure::new(
                            FailureKind::Timeout,
                            None,
                            format!("scenario exceeded its {}ms timeout", budget.as_millis()),
                        )),
                    }
                }
                _ = cancel.cancelled() => Some(StepFailure::infrastructure("run cancelled")),
            }
        };

        // Interrupted mid-step: blame the step that was running
        let failure = failure.map(|mut f| {
            let total = scenario.steps.len() + scenario.expect.len();
            if f.step_index.is_none() && trace.len() < total {
                let index = trace.len();
                f.step_index = Some(index);
                trace.push(StepTrace {
                    index,
                    label: self.label_at(scenario, index),
                    status: StepStatus::Failed,
                    duration_ms: 0,
                    error: Some(f.message.clone()),
                });
            }
            for index in trace.len()..total {
                trace.push(StepTrace {
                    index,
                    label: self.label_at(scenario, index),
                    status: StepStatus::Skipped,
                    duration_ms: 0,
                    error: None,
                });
            }
            f
        });

        AttemptResult {
            failure,
            trace,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn label_at(&self, scenario: &Scenario, index: usize) -> String {
        match scenario.steps.get(index) {
            Some(step) => step.label(),
            None => scenario
                .expect
                .get(index - scenario.steps.len())
                .map(|c| format!("expect {}", c.describe()))
                .unwrap_or_default(),
        }
    }

    async fn run_steps(
        &self,
        scenario: &Scenario,
        context: &dyn BrowserContext,
        scope: &VarScope<'_>,
        attempt: u32,
        trace: &mut Vec<StepTrace>,
    ) -> Result<(), StepFailure> {
        let expectations = scenario.expect.iter().map(|c| Step::Assert(c.clone()));
        let steps = scenario.steps.iter().cloned().chain(expectations);

        for (index, step) in steps.enumerate() {
            let label = self.label_at(scenario, index);
            self.events.emit(TestEvent::StepStarted {
                scenario_id: scenario.id.clone(),
                attempt,
                index,
                label: label.clone(),
            });
            log::debug!("{} #{} step {}: {}", scenario.id, attempt, index, label);

            let step_started = Instant::now();
            let result = match tokio::time::timeout(
                self.settings.step_timeout,
                self.execute_step(&step, context, scope),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(StepFailure::new(
                    FailureKind::Timeout,
                    None,
                    format!(
                        "step timed out after {}ms",
                        self.settings.step_timeout.as_millis()
                    ),
                )),
            };
            let duration_ms = step_started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    trace.push(StepTrace {
                        index,
                        label,
                        status: StepStatus::Passed,
                        duration_ms,
                        error: None,
                    });
                    self.events.emit(TestEvent::StepPassed {
                        scenario_id: scenario.id.clone(),
                        attempt,
                        index,
                        duration_ms,
                    });
                }
                Err(mut failure) => {
                    failure.step_index = Some(index);
                    trace.push(StepTrace {
                        index,
                        label,
                        status: StepStatus::Failed,
                        duration_ms,
                        error: Some(failure.message.clone()),
                    });
                    self.events.emit(TestEvent::StepFailed {
                        scenario_id: scenario.id.clone(),
                        attempt,
                        index,
                        error: failure.message.clone(),
                        duration_ms,
                    });
                    return Err(failure);
                }
            }
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        step: &Step,
        context: &dyn BrowserContext,
        scope: &VarScope<'_>,
    ) -> Result<(), StepFailure> {
        match step {
            Step::Navigate(url) => {
                let url = scope.resolve_url(url);
                context.navigate(&url).await.map_err(driver_failure)
            }
            Step::Click(selector) => {
                let element = self.resolve(context, &scope.substitute(selector)).await?;
                context
                    .act(&element, &ElementAction::Click)
                    .await
                    .map_err(driver_failure)
            }
            Step::Fill(params) => {
                let element = self
                    .resolve(context, &scope.substitute(&params.selector))
                    .await?;
                let value = scope.substitute(&params.value);
                context
                    .act(&element, &ElementAction::Fill(value))
                    .await
                    .map_err(driver_failure)
            }
            Step::WaitFor(params) => {
                let condition = substitute_condition(&params.condition, scope);
                let timeout = params
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.settings.wait_timeout);
                let seen = self.poll(context, &condition, timeout).await?;
                if seen.met {
                    Ok(())
                } else {
                    Err(StepFailure::new(
                        FailureKind::Timeout,
                        None,
                        format!(
                            "{} not met within {}ms (found {})",
                            condition.describe(),
                            timeout.as_millis(),
                            seen.actual
                        ),
                    ))
                }
            }
            Step::Assert(condition) => {
                let condition = substitute_condition(condition, scope);
                let seen = self
                    .poll(context, &condition, self.settings.assert_timeout)
                    .await?;
                if seen.met {
                    Ok(())
                } else {
                    Err(StepFailure::new(
                        FailureKind::AssertionFailed,
                        None,
                        format!("expected {}, found {}", condition.describe(), seen.actual),
                    ))
                }
            }
        }
    }

    /// Wait for an element to appear, up to the wait timeout
    async fn resolve(
        &self,
        context: &dyn BrowserContext,
        selector: &str,
    ) -> Result<ElementRef, StepFailure> {
        let deadline = Instant::now() + self.settings.wait_timeout;
        loop {
            if let Some(element) = context.find(selector).await.map_err(driver_failure)? {
                return Ok(element);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(driver_failure(DriverError::ElementNotFound(
                    selector.to_string(),
                )));
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Re-check a condition until it holds or `timeout` elapses. Returns the
    /// last observation either way.
    async fn poll(
        &self,
        context: &dyn BrowserContext,
        condition: &Condition,
        timeout: Duration,
    ) -> Result<Observation, StepFailure> {
        let pattern = match condition {
            Condition::UrlMatches(pattern) => Some(Regex::new(pattern).map_err(|e| {
                StepFailure::new(
                    FailureKind::AssertionFailed,
                    None,
                    format!("invalid urlMatches pattern {:?}: {}", pattern, e),
                )
            })?),
            _ => None,
        };

        let deadline = Instant::now() + timeout;
        loop {
            let seen = observe(context, condition, pattern.as_ref())
                .await
                .map_err(driver_failure)?;
            let now = Instant::now();
            if seen.met || now >= deadline {
                return Ok(seen);
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }
}

async fn observe(
    context: &dyn BrowserContext,
    condition: &Condition,
    pattern: Option<&Regex>,
) -> Result<Observation, DriverError> {
    let seen = match condition {
        Condition::Visible(selector) => {
            let visible = context.evaluate(&Probe::Visible(selector.clone())).await?.as_bool();
            Observation {
                met: visible,
                actual: if visible { "visible" } else { "not visible" }.to_string(),
            }
        }
        Condition::Hidden(selector) => {
            let visible = context.evaluate(&Probe::Visible(selector.clone())).await?.as_bool();
            Observation {
                met: !visible,
                actual: if visible { "visible" } else { "hidden" }.to_string(),
            }
        }
        Condition::UrlMatches(_) => {
            let value = context.evaluate(&Probe::Url).await?;
            let url = value.as_text().unwrap_or_default().to_string();
            Observation {
                met: pattern.map_or(false, |re| re.is_match(&url)),
                actual: format!("url {:?}", url),
            }
        }
        Condition::TextContains(TextContainsParams { selector, text }) => {
            let value = context.evaluate(&Probe::Text(selector.clone())).await?;
            match value.as_text() {
                Some(content) => Observation {
                    met: content.contains(text.as_str()),
                    actual: format!("text {:?}", truncate(content, 120)),
                },
                None => Observation {
                    met: false,
                    actual: format!("no element matching {}", selector),
                },
            }
        }
        Condition::TitleContains(text) => {
            let value = context.evaluate(&Probe::Title).await?;
            let title = value.as_text().unwrap_or_default().to_string();
            Observation {
                met: title.contains(text.as_str()),
                actual: format!("title {:?}", title),
            }
        }
    };
    Ok(seen)
}

fn substitute_condition(condition: &Condition, scope: &VarScope<'_>) -> Condition {
    match condition {
        Condition::Visible(s) => Condition::Visible(scope.substitute(s)),
        Condition::Hidden(s) => Condition::Hidden(scope.substitute(s)),
        Condition::UrlMatches(p) => Condition::UrlMatches(scope.substitute(p)),
        Condition::TextContains(p) => Condition::TextContains(TextContainsParams {
            selector: scope.substitute(&p.selector),
            text: scope.substitute(&p.text),
        }),
        Condition::TitleContains(t) => Condition::TitleContains(scope.substitute(t)),
    }
}

/// Lost connections are infrastructure; everything else the browser reports
/// is an action error.
fn driver_failure(err: DriverError) -> StepFailure {
    let kind = match err {
        DriverError::Disconnected(_) => FailureKind::Infrastructure,
        DriverError::ElementNotFound(_) | DriverError::Action(_) => FailureKind::ActionError,
    };
    StepFailure::new(kind, None, err.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{library_app, MockEngine};
    use crate::driver::BrowserEngine;
    use crate::parser::yaml::parse_yaml_content;
    use std::path::Path;

    const BASE: &str = "http://127.0.0.1:5000";

    fn settings() -> RunnerSettings {
        RunnerSettings {
            step_timeout: Duration::from_millis(500),
            scenario_timeout: Duration::from_secs(5),
            assert_timeout: Duration::from_millis(100),
            wait_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn scenario(yaml: &str) -> Scenario {
        parse_yaml_content(yaml, Path::new("scenario.yaml")).unwrap()
    }

    async fn run(engine: &MockEngine, yaml: &str) -> AttemptResult {
        let runner = ScenarioRunner::new(settings(), EventEmitter::default());
        let ctx = engine.new_context().await.unwrap();
        let scenario = scenario(yaml);
        let budget = runner.attempt_budget(&scenario);
        runner
            .run(&scenario, &*ctx, BASE, 1, &CancelSignal::new(), budget)
            .await
    }

    const ADD_BOOK: &str = r#"
id: add-book
vars:
  TITLE: Playwright Test Book
expect:
  - textContains:
      selector: body
      text: "${TITLE}"
---
- navigate: /add_book
- fill:
    selector: 'input[name="title"]'
    value: "${TITLE}"
- click: 'button[type="submit"]'
- waitFor:
    urlMatches: ".*/catalog$"
- assert:
    titleContains: Catalog
"#;

    #[tokio::test]
    async fn test_passing_scenario_traces_every_step() {
        let result = run(&library_app(), ADD_BOOK).await;
        assert!(result.passed(), "{:?}", result.failure);
        assert_eq!(result.trace.len(), 6);
        assert!(result.trace.iter().all(|s| s.status == StepStatus::Passed));
        assert_eq!(result.trace[5].label, "expect textContains(body, \"${TITLE}\")");
    }

    #[tokio::test]
    async fn test_assertion_failure_short_circuits() {
        let yaml = r#"
- navigate: /catalog
- assert:
    visible: ".flash-error"
- click: button.borrow
"#;
        let result = run(&library_app(), yaml).await;
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::AssertionFailed);
        assert_eq!(failure.step_index, Some(1));
        assert!(failure.message.contains("not visible"));
        assert_eq!(result.trace[2].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_missing_element_is_action_error() {
        let yaml = "- navigate: /catalog\n- click: '#does-not-exist'\n";
        let failure = run(&library_app(), yaml).await.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::ActionError);
        assert_eq!(failure.step_index, Some(1));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let yaml = r#"
- navigate: /catalog
- waitFor:
    visible: ".flash-success"
    timeoutMs: 50
"#;
        let failure = run(&library_app(), yaml).await.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.step_index, Some(1));
    }

    #[tokio::test]
    async fn test_step_timeout_and_disconnect() {
        let slow = library_app().with_delay(Duration::from_secs(2));
        let failure = run(&slow, "- navigate: /catalog\n").await.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.step_index, Some(0));

        let gone = library_app().fail("/catalog", 1, DriverError::disconnected("Target closed"));
        let failure = run(&gone, "- navigate: /catalog\n").await.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Infrastructure);
    }

    #[tokio::test]
    async fn test_cancel_marks_running_step() {
        let engine = library_app().with_delay(Duration::from_millis(300));
        let runner = ScenarioRunner::new(settings(), EventEmitter::default());
        let ctx = engine.new_context().await.unwrap();
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = runner
            .run(
                &scenario("- navigate: /catalog\n- click: button.borrow\n"),
                &*ctx,
                BASE,
                1,
                &cancel,
                Duration::from_secs(5),
            )
            .await;
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Infrastructure);
        assert_eq!(failure.step_index, Some(0));
        assert_eq!(result.trace[0].status, StepStatus::Failed);
        assert_eq!(result.trace[1].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_attempt_budget_cuts_slow_scenario() {
        let engine = library_app().with_delay(Duration::from_millis(200));
        let runner = ScenarioRunner::new(settings(), EventEmitter::default());
        let ctx = engine.new_context().await.unwrap();
        let scenario = scenario(
            "timeoutMs: 60000\nsteps:\n  - navigate: /catalog\n  - navigate: /catalog\n  - navigate: /catalog\n",
        );
        assert_eq!(runner.attempt_budget(&scenario), Duration::from_secs(60));

        let started = Instant::now();
        let result = runner
            .run(&scenario, &*ctx, BASE, 1, &CancelSignal::new(), Duration::from_millis(300))
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.message.contains("300ms"), "{}", failure.message);
    }
}
