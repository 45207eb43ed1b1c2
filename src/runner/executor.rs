//! Run orchestration: services, workers, retry and the final report.

use super::artifacts::ArtifactCollector;
use super::attempt::BrowserAttempt;
use super::cancel::CancelSignal;
use super::events::{ConsoleEventListener, EventEmitter, TestEvent};
use super::launcher::{ServiceHandle, ServiceLauncher};
use super::pool::SessionPool;
use super::retry::RetryPolicy;
use super::scenario::{RunnerSettings, ScenarioRunner};
use super::state::ScenarioResult;
use crate::driver::BrowserEngine;
use crate::error::{ConfigError, LaunchError};
use crate::parser::Scenario;
use crate::report::types::{RunReport, Summary};
use crate::utils::config::{HarnessConfig, ServiceConfig, ServiceMode};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Schedules scenarios over a bounded set of workers and aggregates results
pub struct Harness {
    config: HarnessConfig,
    engine: Arc<dyn BrowserEngine>,
    emitter: EventEmitter,
    cancel: CancelSignal,
    launcher: ServiceLauncher,
}

impl Harness {
    pub fn new(config: HarnessConfig, engine: Arc<dyn BrowserEngine>, cancel: CancelSignal) -> Self {
        let (emitter, _) = EventEmitter::new();
        Self {
            config,
            engine,
            emitter,
            cancel,
            launcher: ServiceLauncher::new(),
        }
    }

    /// Print live progress to the console until the emitter is dropped
    pub fn spawn_console(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(ConsoleEventListener::listen(self.emitter.subscribe()))
    }

    /// Run every scenario to a terminal outcome. Never fails: service or
    /// browser trouble shows up as `Errored` scenarios in the report.
    pub async fn run(&self, scenarios: Vec<Scenario>) -> RunReport {
        let started_at = chrono::Utc::now();
        let run_id = format!(
            "{}-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let workers = self.config.workers_for(scenarios.len());
        let seed = self.config.backoff.seed.unwrap_or_else(rand::random);

        self.emitter.emit(TestEvent::RunStarted {
            run_id: run_id.clone(),
            scenario_count: scenarios.len(),
            workers,
        });
        log::info!(
            "run {}: {} scenarios, {} workers, seed {}",
            run_id,
            scenarios.len(),
            workers,
            seed
        );

        let deadline = self
            .config
            .run_timeout_ms
            .map(|ms| self.cancel.cancel_after(Duration::from_millis(ms)));

        let pool = SessionPool::new(
            self.engine.clone(),
            self.config.browser.pool_size,
            self.config.acquire_timeout(),
        );

        let services = match self.validated_mode() {
            Ok(mode) => self
                .start_services(mode, workers)
                .await
                .map_err(|e| format!("service failed to start: {}", e)),
            Err(e) => Err(e.to_string()),
        };

        let results = match services {
            Ok(mut services) => {
                for service in &services {
                    self.emitter.emit(TestEvent::Log {
                        message: format!("service ready at {}", service.base_url()),
                    });
                }
                let results = self
                    .run_workers(&run_id, seed, workers, &pool, &services, scenarios)
                    .await;
                for service in services.iter_mut() {
                    self.launcher.stop(service).await;
                }
                results
            }
            Err(reason) => {
                log::error!("{}", reason);
                self.emitter.emit(TestEvent::Log {
                    message: reason.clone(),
                });
                scenarios
                    .iter()
                    .map(|s| ScenarioResult::not_started(s, reason.clone()))
                    .collect()
            }
        };

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let report = RunReport::new(run_id, started_at, workers, seed, pool.stats(), results);
        let Summary {
            passed,
            flaked,
            failed,
            errored,
            ..
        } = report.summary;
        self.emitter.emit(TestEvent::RunFinished {
            run_id: report.run_id.clone(),
            passed,
            flaked,
            failed,
            errored,
            duration_ms: report.duration_ms,
        });
        report
    }

    /// The service mode has no default; a config that skipped validation
    /// fails here instead of silently sharing one service.
    fn validated_mode(&self) -> Result<ServiceMode, ConfigError> {
        self.config.validate()?;
        self.config.service.mode.ok_or_else(|| {
            ConfigError::Invalid("service.mode must be set to `shared` or `perWorker`".into())
        })
    }

    async fn start_services(
        &self,
        mode: ServiceMode,
        workers: usize,
    ) -> Result<Vec<ServiceHandle>, LaunchError> {
        let configs = worker_service_configs(&self.config.service, mode, workers);

        let started = futures::future::join_all(
            configs
                .iter()
                .map(|config| self.launcher.start(config, &self.cancel)),
        )
        .await;

        let mut handles = Vec::with_capacity(started.len());
        let mut first_error = None;
        for result in started {
            match result {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(handles),
            Some(e) => {
                for handle in handles.iter_mut() {
                    self.launcher.stop(handle).await;
                }
                Err(e)
            }
        }
    }

    async fn run_workers(
        &self,
        run_id: &str,
        seed: u64,
        workers: usize,
        pool: &SessionPool,
        services: &[ServiceHandle],
        scenarios: Vec<Scenario>,
    ) -> Vec<ScenarioResult> {
        let total = scenarios.len();
        let queue: Mutex<VecDeque<(usize, Scenario)>> =
            Mutex::new(scenarios.into_iter().enumerate().collect());
        let slots: Mutex<Vec<Option<ScenarioResult>>> = Mutex::new(vec![None; total]);

        let policy = RetryPolicy::new(self.config.max_attempts, self.config.backoff.clone(), seed);
        let runner = ScenarioRunner::new(
            RunnerSettings::from_config(&self.config),
            self.emitter.clone(),
        );
        let collector =
            ArtifactCollector::new(&self.config.output_dir, run_id, self.config.capture.clone());

        let tasks = (0..workers).map(|worker| {
            let service = &services[worker.min(services.len() - 1)];
            let queue = &queue;
            let slots = &slots;
            let policy = &policy;
            let runner = &runner;
            let collector = &collector;
            async move {
                loop {
                    let next = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(poisoned) => poisoned.into_inner().pop_front(),
                    };
                    let Some((index, scenario)) = next else {
                        break;
                    };

                    let result = if self.cancel.is_cancelled() {
                        ScenarioResult::not_started(&scenario, "run cancelled before the scenario started")
                    } else {
                        self.emitter.emit(TestEvent::ScenarioStarted {
                            scenario_id: scenario.id.clone(),
                            worker,
                            step_count: scenario.steps.len(),
                        });
                        let attempt = BrowserAttempt {
                            scenario: &scenario,
                            pool,
                            runner,
                            collector,
                            launcher: &self.launcher,
                            service,
                            cancel: &self.cancel,
                        };
                        policy
                            .execute(&scenario, &attempt, &self.cancel, &self.emitter)
                            .await
                    };

                    self.emitter.emit(TestEvent::ScenarioFinished {
                        scenario_id: result.scenario_id.clone(),
                        outcome: result.outcome.clone(),
                        attempts: result.attempts.len() as u32,
                        duration_ms: result.duration_ms,
                    });
                    match slots.lock() {
                        Ok(mut s) => s[index] = Some(result),
                        Err(poisoned) => poisoned.into_inner()[index] = Some(result),
                    }
                }
            }
        });
        futures::future::join_all(tasks).await;

        let slots = match slots.into_inner() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.into_iter().flatten().collect()
    }
}

/// Service config per worker: one shared instance, or one per worker on
/// consecutive ports starting at the configured one
pub fn worker_service_configs(
    service: &ServiceConfig,
    mode: ServiceMode,
    workers: usize,
) -> Vec<ServiceConfig> {
    match mode {
        ServiceMode::Shared => vec![service.clone()],
        ServiceMode::PerWorker => (0..workers)
            .map(|i| service.with_port(service.port.saturating_add(i as u16)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{library_app, MockEngine};
    use crate::error::DriverError;
    use crate::parser::yaml::parse_yaml_content;
    use crate::runner::launcher::serve_ok;
    use crate::runner::state::{FailureKind, Outcome};
    use std::path::Path;
    async fn config(output: &Path) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.output_dir = output.to_path_buf();
        config.concurrency = 2;
        config.browser.pool_size = 2;
        config.assert_timeout_ms = 50;
        config.wait_timeout_ms = 50;
        config.step_timeout_ms = 1_000;
        config.backoff.initial_ms = 5;
        config.backoff.cap_ms = 50;
        config.backoff.seed = Some(1);
        config.service.mode = Some(ServiceMode::Shared);
        config.service.port = serve_ok().await;
        config
    }

    fn scenario(id: &str, steps: &str) -> Scenario {
        parse_yaml_content(&format!("id: {}\n---\n{}", id, steps), Path::new("s.yaml")).unwrap()
    }

    fn suite() -> Vec<Scenario> {
        vec![
            scenario(
                "add-book",
                "- navigate: /add_book\n- fill:\n    selector: 'input[name=\"title\"]'\n    value: Dune\n- click: 'button[type=\"submit\"]'\n- waitFor:\n    urlMatches: /catalog$\n",
            ),
            scenario(
                "borrow-book",
                "- navigate: /catalog\n- click: button.borrow\n- assert:\n    visible: .flash-success\n",
            ),
            scenario(
                "no-errors",
                "- navigate: /catalog\n- assert:\n    visible: .flash-error\n",
            ),
        ]
    }

    #[tokio::test]
    async fn test_run_aggregates_outcomes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = library_app().fail("button.borrow", 1, DriverError::action("element is detached"));
        let mock_stats = engine.stats.clone();
        let harness = Harness::new(config(dir.path()).await, Arc::new(engine), CancelSignal::new());

        let mut events = harness.emitter.subscribe();
        let report = harness.run(suite()).await;

        let mut log_lines = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TestEvent::Log { message } = event {
                log_lines.push(message);
            }
        }
        assert!(log_lines.iter().any(|m| m.starts_with("service ready at http://127.0.0.1:")));

        let ids: Vec<&str> = report.scenarios.iter().map(|s| s.scenario_id.as_str()).collect();
        assert_eq!(ids, vec!["add-book", "borrow-book", "no-errors"]);
        assert_eq!(report.scenarios[0].outcome, Outcome::Passed);
        assert_eq!(report.scenarios[1].outcome, Outcome::FlakedThenPassed);
        assert_eq!(report.scenarios[1].attempts.len(), 2);
        assert!(matches!(
            report.scenarios[2].outcome,
            Outcome::Failed {
                kind: FailureKind::AssertionFailed,
                ..
            }
        ));
        assert_eq!(report.scenarios[2].attempts.len(), 1);
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.flaked, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.exit_code, 1);

        // Artifacts only for non-passing attempts
        assert!(report.scenarios[0].attempts[0].artifacts.is_none());
        assert!(report.scenarios[1].attempts[0].artifacts.is_some());
        assert!(report.scenarios[1].attempts[1].artifacts.is_none());
        let failed = report.scenarios[2].attempts[0].artifacts.as_ref().unwrap();
        assert!(Path::new(failed.screenshot.as_ref().unwrap()).exists());

        assert_eq!(report.pool.live, 0);
        assert!(report.pool.peak <= 2);
        assert_eq!(mock_stats.open(), 0);
    }

    #[tokio::test]
    async fn test_cancel_errors_in_flight_and_queued_scenarios() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path()).await;
        cfg.concurrency = 1;
        cfg.browser.pool_size = 1;
        let engine: MockEngine = library_app().with_delay(Duration::from_millis(200));
        let mock_stats = engine.stats.clone();
        let cancel = CancelSignal::new();
        let harness = Harness::new(cfg, Arc::new(engine), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let report = harness.run(suite()).await;

        assert!(report
            .scenarios
            .iter()
            .all(|s| matches!(s.outcome, Outcome::Errored { .. })));
        let in_flight = &report.scenarios[0];
        assert_eq!(in_flight.attempts.len(), 1);
        assert!(in_flight.attempts[0].artifacts.is_some());
        assert!(report.scenarios[1].attempts.is_empty());
        assert!(report.scenarios[2].attempts.is_empty());

        assert_eq!(report.pool.live, 0);
        assert_eq!(report.pool.created, report.pool.released);
        assert_eq!(mock_stats.open(), 0);
        assert_eq!(report.exit_code, 1);
    }

    #[tokio::test]
    async fn test_service_startup_failure_errors_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path()).await;
        cfg.service.port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        cfg.service.startup_timeout_ms = 100;
        cfg.service.poll_interval_ms = 20;
        let harness = Harness::new(cfg, Arc::new(library_app()), CancelSignal::new());

        let report = harness.run(suite()).await;
        assert_eq!(report.summary.errored, 3);
        assert!(report.scenarios.iter().all(|s| s.attempts.is_empty()));
        assert!(report.scenarios[0]
            .outcome
            .reason()
            .unwrap()
            .contains("not ready"));
    }

    #[tokio::test]
    async fn test_unset_service_mode_errors_every_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path()).await;
        cfg.service.mode = None;
        let engine = library_app();
        let mock_stats = engine.stats.clone();
        let harness = Harness::new(cfg, Arc::new(engine), CancelSignal::new());

        let report = harness.run(suite()).await;
        assert_eq!(report.summary.errored, 3);
        assert!(report.scenarios.iter().all(|s| s.attempts.is_empty()));
        assert!(report.scenarios[0]
            .outcome
            .reason()
            .unwrap()
            .contains("service.mode must be set"));
        assert_eq!(mock_stats.created(), 0);
        assert_eq!(report.exit_code, 1);
    }

    #[test]
    fn test_per_worker_ports() {
        let service = ServiceConfig {
            port: 5100,
            command: vec!["app".to_string()],
            ..ServiceConfig::default()
        };
        let configs = worker_service_configs(&service, ServiceMode::PerWorker, 3);
        assert_eq!(
            configs.iter().map(|c| c.port).collect::<Vec<_>>(),
            vec![5100, 5101, 5102]
        );
        assert_eq!(configs[2].base_url(), "http://127.0.0.1:5102");
        assert_eq!(worker_service_configs(&service, ServiceMode::Shared, 3).len(), 1);
    }
}
