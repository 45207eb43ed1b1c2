use super::state::{FailureKind, Outcome};
use tokio::sync::broadcast;

/// Harness events for real-time progress output
#[derive(Debug, Clone)]
pub enum TestEvent {
    // Run events
    RunStarted {
        run_id: String,
        scenario_count: usize,
        workers: usize,
    },
    RunFinished {
        run_id: String,
        passed: usize,
        flaked: usize,
        failed: usize,
        errored: usize,
        duration_ms: u64,
    },

    // Scenario events
    ScenarioStarted {
        scenario_id: String,
        worker: usize,
        step_count: usize,
    },
    ScenarioFinished {
        scenario_id: String,
        outcome: Outcome,
        attempts: u32,
        duration_ms: u64,
    },

    // Attempt events
    AttemptStarted {
        scenario_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    AttemptFailed {
        scenario_id: String,
        attempt: u32,
        kind: FailureKind,
        error: String,
    },
    Retrying {
        scenario_id: String,
        next_attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },

    // Step events
    StepStarted {
        scenario_id: String,
        attempt: u32,
        index: usize,
        label: String,
    },
    StepPassed {
        scenario_id: String,
        attempt: u32,
        index: usize,
        duration_ms: u64,
    },
    StepFailed {
        scenario_id: String,
        attempt: u32,
        index: usize,
        error: String,
        duration_ms: u64,
    },

    // Log event for coordinated output
    Log {
        message: String,
    },
}

/// Event emitter for broadcasting harness events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<TestEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<TestEvent>) {
        let (sender, receiver) = broadcast::channel(1024);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: TestEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TestEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration as StdDuration;

/// Console event listener: one spinner per running scenario
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<TestEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        // When not a TTY (piped output), use hidden target to avoid terminal escape codes
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let style = ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("  {spinner} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let mut spinners: HashMap<String, ProgressBar> = HashMap::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("console listener skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                TestEvent::RunStarted {
                    run_id,
                    scenario_count,
                    workers,
                } => {
                    multi
                        .println(format!(
                            "\n{} Run {} started: {} scenario(s) on {} worker(s)",
                            "▶".green().bold(),
                            run_id.cyan(),
                            scenario_count,
                            workers
                        ))
                        .ok();
                }

                TestEvent::RunFinished {
                    run_id,
                    duration_ms,
                    ..
                } => {
                    for (_, pb) in spinners.drain() {
                        pb.finish_and_clear();
                    }
                    // Small delay to ensure all spinner finishes are rendered
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                    println!(
                        "\n{} Run {} finished in {}ms",
                        "■".blue().bold(),
                        run_id,
                        duration_ms
                    );
                }

                TestEvent::ScenarioStarted {
                    scenario_id,
                    worker,
                    step_count,
                } => {
                    let pb = multi.add(ProgressBar::new_spinner());
                    pb.set_style(style.clone());
                    pb.set_prefix(scenario_id.clone());
                    pb.set_message(format!("worker {} · {} steps", worker, step_count).dimmed().to_string());
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    spinners.insert(scenario_id, pb);
                }

                TestEvent::ScenarioFinished {
                    scenario_id,
                    outcome,
                    attempts,
                    duration_ms,
                } => {
                    let status = match &outcome {
                        Outcome::Passed => format!("{} PASSED", "✓".green()).green().bold(),
                        Outcome::FlakedThenPassed => {
                            format!("~ FLAKED ({} attempts)", attempts).yellow().bold()
                        }
                        Outcome::Failed { .. } => format!("{} FAILED", "✗".red()).red().bold(),
                        Outcome::Errored { .. } => "! ERRORED".magenta().bold(),
                    };
                    let line = format!("  {} {} ({}ms)", status, scenario_id, duration_ms);
                    match spinners.remove(&scenario_id) {
                        Some(pb) => {
                            pb.finish_and_clear();
                            multi.println(line).ok();
                        }
                        None => println!("{}", line),
                    }
                    if let Some(reason) = outcome.reason() {
                        multi.println(format!("      {}", reason.dimmed())).ok();
                    }
                }

                TestEvent::AttemptStarted {
                    scenario_id,
                    attempt,
                    max_attempts,
                } => {
                    if attempt > 1 {
                        if let Some(pb) = spinners.get(&scenario_id) {
                            pb.set_message(
                                format!("attempt {}/{}", attempt, max_attempts)
                                    .yellow()
                                    .to_string(),
                            );
                        }
                    }
                }

                TestEvent::AttemptFailed {
                    scenario_id,
                    attempt,
                    kind,
                    error,
                } => {
                    log::debug!(
                        "{} attempt {} failed ({}): {}",
                        scenario_id,
                        attempt,
                        kind.as_str(),
                        error
                    );
                }

                TestEvent::Retrying {
                    scenario_id,
                    next_attempt,
                    max_attempts,
                    delay_ms,
                } => {
                    if let Some(pb) = spinners.get(&scenario_id) {
                        pb.set_message(
                            format!("↻ retry {}/{} in {}ms", next_attempt, max_attempts, delay_ms)
                                .yellow()
                                .to_string(),
                        );
                    }
                }

                TestEvent::StepStarted {
                    scenario_id,
                    attempt,
                    index,
                    label,
                } => {
                    if let Some(pb) = spinners.get(&scenario_id) {
                        let retry = if attempt > 1 {
                            format!(" (attempt {})", attempt).yellow().to_string()
                        } else {
                            String::new()
                        };
                        pb.set_message(format!("[{}] {}...{}", index, label.dimmed(), retry));
                    }
                }

                TestEvent::StepPassed { .. } => {}

                TestEvent::StepFailed {
                    scenario_id,
                    index,
                    error,
                    duration_ms,
                    ..
                } => {
                    if let Some(pb) = spinners.get(&scenario_id) {
                        pb.set_message(format!(
                            "{} [{}] {} ({}ms)",
                            "✗".red(),
                            index,
                            error,
                            duration_ms
                        ));
                    }
                }

                TestEvent::Log { message } => {
                    multi.println(format!("      {}", message)).ok();
                }
            }
        }
    }
}
