//! Service under test: spawn it (or attach to it), wait for readiness, stop it.

use super::cancel::CancelSignal;
use crate::error::LaunchError;
use crate::utils::config::ServiceConfig;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Ports claimed by launchers. `PortClaims::default()` is the registry shared
/// by every launcher in the process; `isolated()` gives a private one.
#[derive(Debug, Clone)]
pub struct PortClaims {
    ports: Arc<Mutex<HashSet<u16>>>,
}

impl Default for PortClaims {
    fn default() -> Self {
        static PROCESS: OnceLock<Arc<Mutex<HashSet<u16>>>> = OnceLock::new();
        Self {
            ports: PROCESS.get_or_init(Default::default).clone(),
        }
    }
}

impl PortClaims {
    pub fn isolated() -> Self {
        Self {
            ports: Arc::default(),
        }
    }

    /// Returns false when the port is already claimed
    pub fn claim(&self, port: u16) -> bool {
        match self.ports.lock() {
            Ok(mut ports) => ports.insert(port),
            Err(poisoned) => poisoned.into_inner().insert(port),
        }
    }

    pub fn release(&self, port: u16) {
        match self.ports.lock() {
            Ok(mut ports) => ports.remove(&port),
            Err(poisoned) => poisoned.into_inner().remove(&port),
        };
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        match self.ports.lock() {
            Ok(ports) => ports.contains(&port),
            Err(poisoned) => poisoned.into_inner().contains(&port),
        }
    }
}

/// A running (or attached) service instance
#[derive(Debug)]
pub struct ServiceHandle {
    base_url: String,
    readiness_url: String,
    port: u16,
    child: Option<Child>,
    claimed: bool,
    shutdown_timeout: Duration,
}

impl ServiceHandle {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True when this handle owns the service process
    pub fn is_managed(&self) -> bool {
        self.child.is_some()
    }
}

pub struct ServiceLauncher {
    claims: PortClaims,
    client: reqwest::Client,
}

impl ServiceLauncher {
    pub fn new() -> Self {
        Self::with_claims(PortClaims::default())
    }

    pub fn with_claims(claims: PortClaims) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { claims, client }
    }

    pub fn claims(&self) -> &PortClaims {
        &self.claims
    }

    /// Start the service and block until it answers on its readiness path
    pub async fn start(
        &self,
        config: &ServiceConfig,
        cancel: &CancelSignal,
    ) -> Result<ServiceHandle, LaunchError> {
        let mut handle = ServiceHandle {
            base_url: config.base_url(),
            readiness_url: config.readiness_url(),
            port: config.port,
            child: None,
            claimed: false,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
        };

        if config.is_external() {
            log::info!("attaching to external service at {}", handle.base_url);
        } else {
            self.reserve_port(&config.host, config.port)?;
            handle.claimed = true;

            match self.spawn(config, &handle.base_url) {
                Ok(child) => handle.child = Some(child),
                Err(e) => {
                    self.stop(&mut handle).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.wait_ready(config, &mut handle, cancel).await {
            self.stop(&mut handle).await;
            return Err(e);
        }

        log::info!("service ready at {}", handle.base_url);
        Ok(handle)
    }

    /// Kill and reap a managed service and release its port. Safe to call
    /// more than once; external services are left running.
    pub async fn stop(&self, handle: &mut ServiceHandle) {
        if let Some(mut child) = handle.child.take() {
            if let Err(e) = child.start_kill() {
                log::debug!("service kill: {}", e);
            }
            match tokio::time::timeout(handle.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => log::debug!("service on port {} exited: {}", handle.port, status),
                Ok(Err(e)) => log::warn!("failed to reap service on port {}: {}", handle.port, e),
                Err(_) => log::warn!(
                    "service on port {} did not exit within {}ms",
                    handle.port,
                    handle.shutdown_timeout.as_millis()
                ),
            }
        }
        if handle.claimed {
            self.claims.release(handle.port);
            handle.claimed = false;
        }
    }

    /// One short readiness probe
    pub async fn health_check(&self, handle: &ServiceHandle) -> bool {
        self.probe(&handle.readiness_url, HEALTH_TIMEOUT).await
    }

    fn reserve_port(&self, host: &str, port: u16) -> Result<(), LaunchError> {
        if !self.claims.claim(port) {
            return Err(LaunchError::PortConflict { port });
        }
        // Bound by something outside this process?
        if std::net::TcpListener::bind((host, port)).is_err() {
            self.claims.release(port);
            return Err(LaunchError::PortConflict { port });
        }
        Ok(())
    }

    fn spawn(&self, config: &ServiceConfig, base_url: &str) -> Result<Child, LaunchError> {
        let port = config.port.to_string();
        let expand = |s: &str| s.replace("${PORT}", &port).replace("${BASE_URL}", base_url);

        let program = expand(&config.command[0]);
        let mut command = Command::new(&program);
        command
            .args(config.command[1..].iter().map(|a| expand(a)))
            .envs(config.env.iter().map(|(k, v)| (k.clone(), expand(v))))
            .env("PORT", &port)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        log::debug!("spawning service: {:?}", config.command);
        command
            .spawn()
            .map_err(|source| LaunchError::Spawn { program, source })
    }

    async fn wait_ready(
        &self,
        config: &ServiceConfig,
        handle: &mut ServiceHandle,
        cancel: &CancelSignal,
    ) -> Result<(), LaunchError> {
        let started = Instant::now();
        let timeout = Duration::from_millis(config.startup_timeout_ms);
        let interval = Duration::from_millis(config.poll_interval_ms.max(10));

        loop {
            if cancel.is_cancelled() {
                return Err(LaunchError::Cancelled);
            }
            if let Some(child) = handle.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    handle.child = None;
                    return Err(LaunchError::ServiceExited {
                        status: status.to_string(),
                    });
                }
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if self
                .probe(&handle.readiness_url, interval.max(HEALTH_TIMEOUT).min(remaining))
                .await
            {
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(LaunchError::StartupTimeout {
                    url: handle.readiness_url.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => return Err(LaunchError::Cancelled),
            }
        }
    }

    async fn probe(&self, url: &str, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return false;
        }
        match self.client.get(url).timeout(timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::trace!("readiness probe {}: {}", url, e);
                false
            }
        }
    }
}

impl Default for ServiceLauncher {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal HTTP server answering 200 to everything
#[cfg(test)]
pub(crate) async fn serve_ok() -> u16 {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
            });
        }
    });
    port
}
