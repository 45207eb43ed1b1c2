use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Harness configuration, loaded from an optional YAML file and then
/// overridden by environment variables and CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarnessConfig {
    /// Number of scenarios executed concurrently (capped by the pool size)
    pub concurrency: usize,

    /// Maximum attempts per scenario, including the first one
    pub max_attempts: u32,

    /// Per-step timeout (ms)
    pub step_timeout_ms: u64,

    /// Default whole-attempt timeout (ms), overridable per scenario
    pub scenario_timeout_ms: u64,

    /// How long an `assert` step keeps re-checking before failing (ms)
    pub assert_timeout_ms: u64,

    /// Default timeout for `waitFor` steps that don't set one (ms)
    pub wait_timeout_ms: u64,

    /// Run-level deadline (ms); in-flight attempts are aborted when it passes
    pub run_timeout_ms: Option<u64>,

    /// Root directory for reports and artifacts
    pub output_dir: PathBuf,

    /// Only scenarios carrying at least one of these tags are selected
    pub tags: Vec<String>,

    pub backoff: BackoffConfig,
    pub capture: CaptureConfig,
    pub browser: BrowserConfig,
    pub service: ServiceConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            step_timeout_ms: 10_000,
            scenario_timeout_ms: 60_000,
            assert_timeout_ms: 2_000,
            wait_timeout_ms: 5_000,
            run_timeout_ms: None,
            output_dir: PathBuf::from("./output"),
            tags: Vec::new(),
            backoff: BackoffConfig::default(),
            capture: CaptureConfig::default(),
            browser: BrowserConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay before the second attempt (ms)
    pub initial_ms: u64,
    /// Upper bound for any delay (ms)
    pub cap_ms: u64,
    /// Jitter as a fraction of the base delay, in [0, 1)
    pub jitter: f64,
    /// Seed for the jitter generator; random when unset
    pub seed: Option<u64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            cap_ms: 5_000,
            jitter: 0.2,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub screenshot: bool,
    pub console: bool,
    pub trace: bool,
    /// Also capture artifacts for passing attempts
    pub on_pass: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            screenshot: true,
            console: true,
            trace: true,
            on_pass: false,
        }
    }
}

/// Web browser type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BrowserType {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserConfig {
    #[serde(rename = "type")]
    pub browser_type: BrowserType,
    pub headless: bool,
    /// Explicit browser executable; discovered on the host when unset
    pub executable: Option<PathBuf>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Maximum number of live browser contexts
    pub pool_size: usize,
    /// How long `acquire` waits for a free slot (ms)
    pub acquire_timeout_ms: u64,
    /// Extra command-line flags passed to the browser
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser_type: BrowserType::Chromium,
            headless: true,
            executable: None,
            viewport_width: 1280,
            viewport_height: 720,
            pool_size: 2,
            acquire_timeout_ms: 30_000,
            args: Vec::new(),
        }
    }
}

/// How the service under test is provisioned for workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum ServiceMode {
    /// One service instance, shared read-only by every worker
    Shared,
    /// One service instance per worker, on consecutive ports
    PerWorker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Must be chosen explicitly, there is no implicit default
    pub mode: Option<ServiceMode>,
    /// Program and arguments; empty means the service is started externally
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    /// Path polled until it answers with a success status
    pub readiness_path: String,
    /// Overrides the `http://host:port` base URL
    pub base_url: Option<String>,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mode: None,
            command: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            host: "127.0.0.1".to_string(),
            port: 5000,
            readiness_path: "/".to_string(),
            base_url: None,
            startup_timeout_ms: 30_000,
            poll_interval_ms: 250,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServiceConfig {
    /// Copy of this config bound to another port, used for per-worker services
    pub fn with_port(&self, port: u16) -> Self {
        let mut config = self.clone();
        config.port = port;
        config
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    pub fn readiness_url(&self) -> String {
        let base = self.base_url();
        let path = self.readiness_path.trim_start_matches('/');
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    pub fn is_external(&self) -> bool {
        self.command.is_empty()
    }
}

impl HarnessConfig {
    /// Load config from a YAML file, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => HarnessConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `E2E_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("E2E_HEADLESS") {
            self.browser.headless = v == "true" || v == "1";
        }
        if let Ok(url) = std::env::var("E2E_BASE_URL") {
            if !url.is_empty() {
                self.service.base_url = Some(url);
            }
        }
        if self.browser.executable.is_none() {
            if let Ok(path) = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH") {
                self.browser.executable = Some(PathBuf::from(path));
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.browser.pool_size == 0 {
            return Err(ConfigError::Invalid("browser.poolSize must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("maxAttempts must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::Invalid("backoff.jitter must be in [0, 1)".into()));
        }
        if self.backoff.initial_ms > self.backoff.cap_ms {
            return Err(ConfigError::Invalid(
                "backoff.initialMs must not exceed backoff.capMs".into(),
            ));
        }
        if self.service.mode.is_none() {
            return Err(ConfigError::Invalid(
                "service.mode must be set to `shared` or `perWorker`".into(),
            ));
        }
        if self.service.mode == Some(ServiceMode::PerWorker) && self.service.is_external() {
            return Err(ConfigError::Invalid(
                "perWorker service mode needs service.command to start one instance per worker"
                    .into(),
            ));
        }
        if self.service.mode == Some(ServiceMode::PerWorker) && self.service.base_url.is_some() {
            return Err(ConfigError::Invalid(
                "service.baseUrl cannot be combined with perWorker mode".into(),
            ));
        }
        if self.service.mode == Some(ServiceMode::PerWorker)
            && self.service.port as usize + self.workers() - 1 > u16::MAX as usize
        {
            return Err(ConfigError::Invalid(format!(
                "perWorker ports {}..{} exceed 65535",
                self.service.port,
                self.service.port as usize + self.workers() - 1
            )));
        }
        Ok(())
    }

    /// Effective number of workers: never more than the pool can serve
    pub fn workers(&self) -> usize {
        self.concurrency.min(self.browser.pool_size).max(1)
    }

    /// Workers actually started for a run of `scenarios` scenarios
    pub fn workers_for(&self, scenarios: usize) -> usize {
        self.workers().min(scenarios).max(1)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.browser.acquire_timeout_ms)
    }
}
