//! Runner-level isolation and aggregation properties
//!
//! These drive the full orchestration loop against stand-in binaries: every
//! failure mode of one test must be recorded and must leave the rest of the
//! run untouched.

#![cfg(unix)]

use std::net::TcpListener;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use tempfile::TempDir;
use webserver_e2e::runner::{FailureReason, TestOutcome};
use webserver_e2e::{
    E2eError, E2eResult, Registry, RequestClient, ServerFixture, TestConfig, TestRunner,
    TestSuiteResult,
};

const IDLE_SERVER: &str = "#!/bin/sh\ntrap 'exit 0' TERM\nwhile true; do sleep 1; done\n";
const CRASHING_SERVER: &str = "#!/bin/sh\nexit 3\n";

fn fake_binary(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn passing<'a>(
    _fixture: &'a ServerFixture,
    _client: &'a RequestClient,
) -> BoxFuture<'a, E2eResult<bool>> {
    async { Ok(true) }.boxed()
}

fn failing_assertion<'a>(
    _fixture: &'a ServerFixture,
    _client: &'a RequestClient,
) -> BoxFuture<'a, E2eResult<bool>> {
    async { Ok(false) }.boxed()
}

fn erroring<'a>(
    _fixture: &'a ServerFixture,
    _client: &'a RequestClient,
) -> BoxFuture<'a, E2eResult<bool>> {
    async {
        Err(E2eError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "induced failure",
        )))
    }
    .boxed()
}

fn panicking<'a>(
    _fixture: &'a ServerFixture,
    _client: &'a RequestClient,
) -> BoxFuture<'a, E2eResult<bool>> {
    async { panic!("induced panic") }.boxed()
}

fn outcome_of<'a>(suite: &'a TestSuiteResult, name: &str) -> &'a TestOutcome {
    &suite
        .results
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no result recorded for {}", name))
        .outcome
}

#[tokio::test]
async fn one_test_failure_never_aborts_the_run() {
    let dir = TempDir::new().unwrap();
    let binary = fake_binary(dir.path(), "fake_server", IDLE_SERVER);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut registry = Registry::new();
    registry
        .register("passes", TestConfig::inline("listen 0;\n", port), passing)
        .unwrap();
    registry
        .register(
            "fails_assertion",
            TestConfig::inline("listen 0;\n", port),
            failing_assertion,
        )
        .unwrap();
    registry
        .register("errors_out", TestConfig::inline("listen 0;\n", port), erroring)
        .unwrap();
    registry
        .register("panics", TestConfig::inline("listen 0;\n", port), panicking)
        .unwrap();
    registry
        .register(
            "runs_after_failures",
            TestConfig::inline("listen 0;\n", port),
            passing,
        )
        .unwrap();

    let mut runner = TestRunner::new(binary, false);
    let suite = runner.run(&registry, None).await;

    assert_eq!(suite.total, 5);
    assert_eq!(suite.passed, 2);
    assert_eq!(suite.failed, 3);
    assert!(!suite.success());
    assert_eq!(
        suite.failing_names(),
        ["fails_assertion", "errors_out", "panics"]
    );

    assert!(matches!(
        outcome_of(&suite, "fails_assertion"),
        TestOutcome::Failed(FailureReason::Assertion)
    ));
    assert!(matches!(
        outcome_of(&suite, "errors_out"),
        TestOutcome::Failed(FailureReason::Error(_))
    ));
    assert!(matches!(
        outcome_of(&suite, "panics"),
        TestOutcome::Failed(FailureReason::Error(msg)) if msg.contains("induced panic")
    ));
}

#[tokio::test]
async fn startup_failures_are_recorded_and_the_run_continues() {
    let dir = TempDir::new().unwrap();
    let binary = fake_binary(dir.path(), "fake_server", IDLE_SERVER);
    let crashing = fake_binary(dir.path(), "crashing_server", CRASHING_SERVER);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut registry = Registry::new();
    registry
        .register(
            "crashes_at_startup",
            TestConfig {
                binary_path: Some(crashing),
                ..TestConfig::inline("listen 0;\n", port)
            },
            passing,
        )
        .unwrap();
    registry
        .register(
            "config_does_not_exist",
            TestConfig::from_file(dir.path().join("no_such.conf"), port),
            passing,
        )
        .unwrap();
    registry
        .register("still_runs", TestConfig::inline("listen 0;\n", port), passing)
        .unwrap();

    let mut runner = TestRunner::new(binary, false);
    let suite = runner.run(&registry, None).await;

    assert_eq!(suite.passed, 1);
    assert_eq!(suite.failed, 2);

    assert!(matches!(
        outcome_of(&suite, "crashes_at_startup"),
        TestOutcome::Failed(FailureReason::Startup(_))
    ));
    assert!(matches!(
        outcome_of(&suite, "config_does_not_exist"),
        TestOutcome::Failed(FailureReason::Error(msg)) if msg.contains("no_such.conf")
    ));
    assert!(outcome_of(&suite, "still_runs").passed());
}

#[tokio::test]
async fn generated_configs_are_deleted_and_owned_files_kept() {
    let dir = TempDir::new().unwrap();
    let binary = fake_binary(dir.path(), "fake_server", IDLE_SERVER);

    let owned_config = dir.path().join("owned.conf");
    std::fs::write(&owned_config, "listen 0;\n").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut registry = Registry::new();
    registry
        .register(
            "uses_generated_config",
            TestConfig::inline("listen 0;\n", port),
            passing,
        )
        .unwrap();
    registry
        .register(
            "uses_owned_config",
            TestConfig::from_file(&owned_config, port),
            passing,
        )
        .unwrap();

    let mut runner = TestRunner::new(binary, false);
    let suite = runner.run(&registry, None).await;
    assert!(suite.success());

    // The caller-owned file survives the run.
    assert!(owned_config.exists());

    // Every generated config for this test name is gone from the temp dir.
    let leftovers: Vec<_> = std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("test_uses_generated_config_")
        })
        .collect();
    assert!(leftovers.is_empty(), "leftover temp configs: {:?}", leftovers);
}

#[tokio::test]
async fn name_filter_selects_a_subset() {
    let dir = TempDir::new().unwrap();
    let binary = fake_binary(dir.path(), "fake_server", IDLE_SERVER);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut registry = Registry::new();
    registry
        .register("crud_create", TestConfig::inline("listen 0;\n", port), passing)
        .unwrap();
    registry
        .register("crud_delete", TestConfig::inline("listen 0;\n", port), passing)
        .unwrap();
    registry
        .register("static_files", TestConfig::inline("listen 0;\n", port), passing)
        .unwrap();

    let mut runner = TestRunner::new(binary, false);
    let suite = runner.run(&registry, Some("crud")).await;

    assert_eq!(suite.total, 2);
    assert_eq!(suite.passed, 2);
}
