//! Sequential test orchestration and result aggregation

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::client::RequestClient;
use crate::config;
use crate::error::{E2eError, E2eResult};
use crate::fixture::ServerFixture;
use crate::registry::{Registry, TestDefinition};

/// Why a test did not pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FailureReason {
    /// The body ran to completion and reported a failed expectation
    Assertion,
    /// The server never became ready (timeout or crash during startup)
    Startup(String),
    /// Setup or the body returned an error, or the body panicked
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Assertion => write!(f, "assertion failed"),
            FailureReason::Startup(detail) => write!(f, "startup failed: {}", detail),
            FailureReason::Error(detail) => write!(f, "{}", detail),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TestOutcome {
    Passed,
    Failed(FailureReason),
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
    pub duration_ms: u64,
}

/// Result of running the selected suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Names of failing tests, in run order.
    pub fn failing_names(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.outcome.passed())
            .map(|r| r.name.as_str())
            .collect()
    }
}

/// Runs registered tests strictly sequentially.
///
/// Each test's fixture binds an OS TCP port the next test may reuse, so
/// tests never run in parallel. Every failure mode of a test — assertion,
/// setup error, startup failure, body panic — becomes a recorded result;
/// nothing aborts the remaining tests.
pub struct TestRunner {
    binary_path: PathBuf,
    verbose: bool,
    temp_configs: Vec<PathBuf>,
}

impl TestRunner {
    pub fn new(binary_path: impl Into<PathBuf>, verbose: bool) -> Self {
        Self {
            binary_path: binary_path.into(),
            verbose,
            temp_configs: Vec::new(),
        }
    }

    /// Run every selected test, then delete generated temp configs and log
    /// the aggregate summary.
    pub async fn run(&mut self, registry: &Registry, filter: Option<&str>) -> TestSuiteResult {
        let selected = registry.select(filter);
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        if selected.is_empty() {
            info!("no tests to run");
        } else {
            info!("Running {} integration test(s)...", selected.len());
        }

        for def in &selected {
            let result = self.run_one(def).await;
            match &result.outcome {
                TestOutcome::Passed => {
                    passed += 1;
                    info!("✓ {} ({} ms)", result.name, result.duration_ms);
                }
                TestOutcome::Failed(reason) => {
                    failed += 1;
                    error!("✗ {} - {}", result.name, reason);
                }
            }
            results.push(result);
        }

        self.cleanup_temp_configs();

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        TestSuiteResult {
            total: selected.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    async fn run_one(&mut self, def: &TestDefinition) -> TestResult {
        info!("running test: {}", def.name);
        let start = Instant::now();
        let outcome = self.execute(def).await;
        TestResult {
            name: def.name.clone(),
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Materialize config, bring up a fresh fixture and client, run the
    /// body, and always clean the fixture up before returning.
    async fn execute(&mut self, def: &TestDefinition) -> TestOutcome {
        let materialized = match config::materialize(&def.config, &def.name) {
            Ok(m) => m,
            Err(e) => return TestOutcome::Failed(FailureReason::Error(e.to_string())),
        };
        // Only harness-generated files are tracked for deletion; a
        // caller-owned config file is never touched.
        if materialized.generated {
            self.temp_configs.push(materialized.path.clone());
        }

        let binary = def
            .config
            .binary_path
            .clone()
            .unwrap_or_else(|| self.binary_path.clone());
        let mut fixture = ServerFixture::new(binary, materialized.path, def.config.port);

        let client = match RequestClient::new(def.config.port) {
            Ok(c) => c,
            Err(e) => return TestOutcome::Failed(FailureReason::Error(e.to_string())),
        };

        let outcome = match fixture.start(def.config.startup_timeout).await {
            Err(e @ (E2eError::StartupTimeout { .. } | E2eError::StartupCrash { .. })) => {
                TestOutcome::Failed(FailureReason::Startup(e.to_string()))
            }
            Err(e) => TestOutcome::Failed(FailureReason::Error(e.to_string())),
            Ok(()) => {
                // A panicking body is confined to this test.
                let body = AssertUnwindSafe((def.body)(&fixture, &client))
                    .catch_unwind()
                    .await;
                match body {
                    Ok(Ok(true)) => TestOutcome::Passed,
                    Ok(Ok(false)) => TestOutcome::Failed(FailureReason::Assertion),
                    Ok(Err(e)) => TestOutcome::Failed(FailureReason::Error(e.to_string())),
                    Err(panic) => TestOutcome::Failed(FailureReason::Error(panic_message(&panic))),
                }
            }
        };

        if self.verbose && !outcome.passed() {
            let logs = fixture.logs();
            if !logs.is_empty() {
                info!("server logs for {}:\n{}", def.name, logs);
            }
        }

        fixture.cleanup();
        outcome
    }

    /// Best-effort deletion of generated config files; missing files are
    /// not an error.
    fn cleanup_temp_configs(&mut self) {
        for path in self.temp_configs.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove temp config {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Write the suite result as pretty JSON.
    pub fn write_results(&self, suite: &TestSuiteResult, path: &Path) -> E2eResult<PathBuf> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(suite)?;
        std::fs::write(path, json)?;

        info!("results written to {}", path.display());
        Ok(path.to_path_buf())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("test body panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("test body panicked: {}", s)
    } else {
        "test body panicked".to_string()
    }
}
