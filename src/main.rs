use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use e2e_runner::error::ConfigError;
use e2e_runner::parser::{load_scenarios, Scenario};
use e2e_runner::utils::config::{BrowserType, HarnessConfig, ServiceMode};
use e2e_runner::{report, runner, CancelSignal};

/// Exit code for configuration and scenario loading errors
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "e2e-runner")]
#[command(version)]
#[command(about = "Browser-driven end-to-end test harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenario file(s) or a directory of scenarios
    Run {
        /// Path to a scenario file or directory
        path: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// List the scenarios a run would select
    List {
        /// Path to a scenario file or directory
        path: PathBuf,

        /// Harness config file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Filter scenarios by tags (comma-separated, any match)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },

    /// Generate report from saved run results
    Report {
        /// Path to report.json
        results: PathBuf,

        /// Output format (json, html, junit, summary)
        #[arg(short, long, default_value = "html")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Command-line overrides, applied on top of the config file and environment
#[derive(Args, Default)]
struct Overrides {
    /// Harness config file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenarios run concurrently (capped by the browser pool size)
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Maximum attempts per scenario, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Per-step timeout in milliseconds
    #[arg(long)]
    step_timeout: Option<u64>,

    /// Whole-attempt timeout in milliseconds
    #[arg(long)]
    scenario_timeout: Option<u64>,

    /// Run deadline in milliseconds; in-flight scenarios are aborted
    #[arg(long)]
    run_timeout: Option<u64>,

    /// Output directory for reports and artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Filter scenarios by tags (comma-separated, any match)
    #[arg(short, long, value_delimiter = ',')]
    tags: Option<Vec<String>>,

    /// Service provisioning (shared, per-worker)
    #[arg(long, value_enum)]
    service_mode: Option<ServiceMode>,

    /// Base URL of an externally started service
    #[arg(long)]
    base_url: Option<String>,

    /// Run the browser headless (true/false)
    #[arg(long)]
    headless: Option<bool>,

    /// Browser engine
    #[arg(long, value_enum)]
    browser: Option<BrowserType>,

    /// Capture artifacts for passing attempts too
    #[arg(long, default_value = "false")]
    capture_on_pass: bool,

    /// Seed for retry jitter
    #[arg(long)]
    seed: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut HarnessConfig) {
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
        if let Some(v) = self.max_attempts {
            config.max_attempts = v;
        }
        if let Some(v) = self.step_timeout {
            config.step_timeout_ms = v;
        }
        if let Some(v) = self.scenario_timeout {
            config.scenario_timeout_ms = v;
        }
        if self.run_timeout.is_some() {
            config.run_timeout_ms = self.run_timeout;
        }
        if let Some(v) = self.output {
            config.output_dir = v;
        }
        if let Some(v) = self.tags {
            config.tags = v;
        }
        if self.service_mode.is_some() {
            config.service.mode = self.service_mode;
        }
        if self.base_url.is_some() {
            config.service.base_url = self.base_url;
        }
        if let Some(v) = self.headless {
            config.browser.headless = v;
        }
        if let Some(v) = self.browser {
            config.browser.browser_type = v;
        }
        if self.capture_on_pass {
            config.capture.on_pass = true;
        }
        if self.seed.is_some() {
            config.backoff.seed = self.seed;
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig, ConfigError> {
    let default_path = Path::new("e2e.yaml");
    match path {
        Some(p) => HarnessConfig::load(Some(p)),
        None if default_path.is_file() => HarnessConfig::load(Some(default_path)),
        None => HarnessConfig::load(None),
    }
}

/// Load config and scenarios; any error here is a configuration error
fn prepare(path: &Path, overrides: Overrides) -> anyhow::Result<(HarnessConfig, Vec<Scenario>)> {
    let mut config = load_config(overrides.config.as_deref())?;
    overrides.apply(&mut config);
    config.validate()?;

    let scenarios = load_scenarios(path, &config.tags)?;
    if scenarios.is_empty() {
        anyhow::bail!("No scenarios selected under {}", path.display());
    }
    Ok((config, scenarios))
}

fn fail_config(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "✗".red().bold(), err);
    std::process::exit(EXIT_CONFIG);
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run { path, overrides } => {
            let (config, scenarios) = prepare(&path, overrides).unwrap_or_else(|e| fail_config(e));

            println!(
                "{} Running {} scenario(s) from: {}",
                "▶".green().bold(),
                scenarios.len(),
                path.display()
            );
            println!(
                "  Workers: {} (concurrency {}, pool {})",
                config.workers_for(scenarios.len()).to_string().cyan(),
                config.concurrency,
                config.browser.pool_size
            );
            println!(
                "  Browser: {}{}",
                format!("{:?}", config.browser.browser_type).to_lowercase().cyan(),
                if config.browser.headless { " (headless)" } else { "" }
            );
            if let Some(mode) = config.service.mode {
                println!(
                    "  Service: {} at {}",
                    format!("{:?}", mode).yellow(),
                    config.service.base_url().cyan()
                );
            }
            if !config.tags.is_empty() {
                println!("  Tags: {}", config.tags.join(", ").yellow());
            }
            println!("  Max attempts: {}", config.max_attempts);
            println!("  Output: {}", config.output_dir.display().to_string().cyan());

            let cancel = CancelSignal::new();
            let handler = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                if handler.is_cancelled() {
                    std::process::exit(130);
                }
                println!("\n{} Cancelling run (press Ctrl+C again to force)...", "⏹".yellow());
                handler.cancel();
            }) {
                log::warn!("failed to install Ctrl+C handler: {}", e);
            }

            match runner::run_tests(scenarios, config, cancel).await {
                Ok(report) => report.exit_code,
                Err(e) => {
                    eprintln!("{} {:#}", "✗".red().bold(), e);
                    1
                }
            }
        }

        Commands::List { path, config, tags } => {
            let overrides = Overrides {
                config,
                tags,
                ..Default::default()
            };
            let mut config = load_config(overrides.config.as_deref())
                .unwrap_or_else(|e| fail_config(e.into()));
            overrides.apply(&mut config);
            let scenarios =
                load_scenarios(&path, &config.tags).unwrap_or_else(|e| fail_config(e));

            for scenario in &scenarios {
                let tags = if scenario.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", scenario.tags.join(", "))
                };
                println!(
                    "{} {}{} ({} steps) {}",
                    "•".blue(),
                    scenario.id.bold(),
                    tags.yellow(),
                    scenario.steps.len(),
                    scenario.source.display().to_string().dimmed()
                );
            }
            println!("{} scenario(s) selected", scenarios.len());
            0
        }

        Commands::Report {
            results,
            format,
            output,
        } => {
            println!(
                "{} Generating {} report from: {}",
                "📊".to_string().blue(),
                format.cyan(),
                results.display()
            );
            match report::generate_report(&results, &format, output.as_deref()).await {
                Ok(()) => 0,
                Err(e) => fail_config(e),
            }
        }
    };

    std::process::exit(code);
}
