//! Error types for the E2E harness

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::fixture::FixtureState;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("config file not found: {given} (resolved: {resolved})")]
    ConfigMissing { given: PathBuf, resolved: PathBuf },

    #[error("failed to write config to {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fixture cannot start from state {state:?}")]
    InvalidState { state: FixtureState },

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server did not accept connections on port {port} within {timeout:?}")]
    StartupTimeout { port: u16, timeout: Duration },

    #[error("server process exited with {status} before becoming ready")]
    StartupCrash { status: ExitStatus },

    #[error("duplicate test name: {0}")]
    DuplicateTest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
