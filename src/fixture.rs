//! Server process lifecycle - spawning, readiness polling, and teardown

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle states of a fixture.
///
/// `Stopped` is terminal: a fixture owns at most one server process over
/// its lifetime, so a finished fixture never transitions back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Idle,
    Starting,
    Running,
    Stopped,
}

/// Owns one server-process instance for the duration of one test.
///
/// Combined stdout/stderr goes to a `server.log` inside a per-fixture temp
/// directory, surfaced via [`logs`](Self::logs) for post-failure
/// diagnostics. Dropping the fixture runs [`cleanup`](Self::cleanup), so the
/// process and the log directory are released on every exit path.
pub struct ServerFixture {
    binary_path: PathBuf,
    config_path: PathBuf,
    port: u16,
    process: Option<Child>,
    state: FixtureState,
    log_dir: Option<TempDir>,
    log_path: Option<PathBuf>,
}

impl ServerFixture {
    pub fn new(binary_path: impl Into<PathBuf>, config_path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            binary_path: binary_path.into(),
            config_path: config_path.into(),
            port,
            process: None,
            state: FixtureState::Idle,
            log_dir: None,
            log_path: None,
        }
    }

    /// Spawn the server and wait for it to accept TCP connections.
    ///
    /// The binary gets exactly one positional argument, the absolute config
    /// path, and runs with its own directory as working directory so any
    /// relative paths inside the config resolve the same way regardless of
    /// where the harness was invoked from.
    pub async fn start(&mut self, timeout: Duration) -> E2eResult<()> {
        if self.state != FixtureState::Idle {
            return Err(E2eError::InvalidState { state: self.state });
        }

        // Validate before acquiring anything: a missing config must fail
        // fast, with the resolved path for operator debugging, and spawn
        // no process.
        let resolved = absolute_path(&self.config_path)?;
        if !resolved.exists() {
            return Err(E2eError::ConfigMissing {
                given: self.config_path.clone(),
                resolved,
            });
        }

        let log_dir = tempfile::Builder::new()
            .prefix("integration_test_")
            .tempdir()?;
        let log_path = log_dir.path().join("server.log");
        let log_file = File::create(&log_path)?;
        let stderr_file = log_file.try_clone()?;

        let workdir = self
            .binary_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        info!(
            "starting {} with config {} on port {}",
            self.binary_path.display(),
            resolved.display(),
            self.port
        );

        let child = Command::new(&self.binary_path)
            .arg(&resolved)
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .current_dir(&workdir)
            .spawn()
            .map_err(|e| E2eError::Spawn {
                binary: self.binary_path.clone(),
                source: e,
            })?;

        self.process = Some(child);
        self.log_dir = Some(log_dir);
        self.log_path = Some(log_path);
        self.state = FixtureState::Starting;

        match self.wait_for_ready(timeout).await {
            Ok(()) => {
                self.state = FixtureState::Running;
                info!("server ready on port {}", self.port);
                Ok(())
            }
            Err(e) => {
                // The spawned process (if still alive) must not outlive a
                // failed start.
                if let Some(mut child) = self.process.take() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                self.state = FixtureState::Stopped;
                Err(e)
            }
        }
    }

    /// Poll until the server accepts a TCP connection or the bound elapses.
    ///
    /// A successful connect is treated as readiness regardless of any
    /// application-level response; the request path may still be warming
    /// up, which test bodies must tolerate.
    async fn wait_for_ready(&mut self, timeout: Duration) -> E2eResult<()> {
        let deadline = Instant::now() + timeout;
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.port));

        while Instant::now() < deadline {
            // A dead child can never become ready.
            if let Some(status) = self
                .process
                .as_mut()
                .and_then(|c| c.try_wait().ok().flatten())
            {
                return Err(E2eError::StartupCrash { status });
            }

            match tokio::time::timeout(READY_CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => debug!("connect to {} refused: {}", addr, e),
                Err(_) => debug!("connect to {} timed out", addr),
            }

            sleep(READY_POLL_INTERVAL).await;
        }

        Err(E2eError::StartupTimeout {
            port: self.port,
            timeout,
        })
    }

    /// Terminate the server, gracefully first.
    ///
    /// SIGTERM, then up to 5 seconds of polling, then an unconditional
    /// kill+wait. The process handle is cleared no matter which path runs.
    pub fn stop(&mut self) {
        let Some(mut child) = self.process.take() else {
            return;
        };
        let pid = child.id();

        info!("stopping server (pid {})", pid);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("SIGTERM for pid {} failed: {}", pid, e);
            }
        }

        let deadline = Instant::now() + GRACEFUL_STOP_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(None) => {
                    warn!("server pid {} did not exit after SIGTERM, killing", pid);
                    let _ = child.kill();
                    let _ = child.wait();
                    break;
                }
                Err(e) => {
                    warn!("waiting on pid {} failed: {}", pid, e);
                    let _ = child.kill();
                    let _ = child.wait();
                    break;
                }
            }
        }

        self.state = FixtureState::Stopped;
    }

    /// Stop the server and remove the temp log directory. Idempotent.
    pub fn cleanup(&mut self) {
        self.stop();
        if let Some(dir) = self.log_dir.take() {
            if let Err(e) = dir.close() {
                warn!("failed to remove log directory: {}", e);
            }
        }
    }

    /// Non-blocking check that the process exists and has not exited.
    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Accumulated combined stdout/stderr, or empty if unavailable.
    ///
    /// Diagnostics only; never assert on log content.
    pub fn logs(&self) -> String {
        self.log_path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .unwrap_or_default()
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl Drop for ServerFixture {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn absolute_path(path: &Path) -> E2eResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_config_fails_before_any_spawn() {
        let mut fixture = ServerFixture::new("bin/webserver", "no/such/config.conf", 8080);

        let err = fixture.start(Duration::from_secs(1)).await.unwrap_err();
        match err {
            E2eError::ConfigMissing { given, resolved } => {
                assert_eq!(given, PathBuf::from("no/such/config.conf"));
                assert!(resolved.is_absolute());
            }
            other => panic!("expected ConfigMissing, got {:?}", other),
        }

        // Nothing was acquired: no process, no log dir, state untouched.
        assert!(!fixture.is_running());
        assert_eq!(fixture.state(), FixtureState::Idle);
        assert_eq!(fixture.logs(), "");
    }

    #[test]
    fn cleanup_is_idempotent_on_a_never_started_fixture() {
        let mut fixture = ServerFixture::new("bin/webserver", "configs/default.conf", 8080);
        fixture.cleanup();
        fixture.cleanup();
        assert!(!fixture.is_running());
    }
}
