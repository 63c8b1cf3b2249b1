//! Per-test server configuration and its materialization to disk

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Synthesized when a test declares neither inline text nor a config file.
const DEFAULT_CONFIG_TEXT: &str = "listen 8080;\n";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Server configuration declared by a test case.
///
/// The config text itself is opaque to the harness; parsing it is the
/// server's job. `port` must match the port the config tells the server to
/// listen on — the harness uses it for readiness probes and request URLs
/// and does not cross-check the two.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Inline config text, written to a fresh temp file before the run
    pub config_text: Option<String>,

    /// Existing caller-owned config file, used as-is and never deleted
    pub config_file: Option<PathBuf>,

    /// Port the server is expected to listen on
    pub port: u16,

    /// Per-test override of the server binary
    pub binary_path: Option<PathBuf>,

    /// How long `start` waits for the server to accept connections
    pub startup_timeout: Duration,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            config_text: None,
            config_file: None,
            port: 8080,
            binary_path: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl TestConfig {
    /// Config from inline text.
    pub fn inline(text: impl Into<String>, port: u16) -> Self {
        Self {
            config_text: Some(text.into()),
            port,
            ..Self::default()
        }
    }

    /// Config backed by an existing file.
    pub fn from_file(path: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            config_file: Some(path.into()),
            port,
            ..Self::default()
        }
    }
}

/// A config path ready to hand to the server process.
#[derive(Debug)]
pub struct MaterializedConfig {
    pub path: PathBuf,

    /// True when the harness wrote the file and owns its deletion
    pub generated: bool,
}

/// Turn a test's declared configuration into a concrete file path.
///
/// Caller-owned files are returned unchanged; inline text (or the
/// synthesized default) is written to a uniquely named temp file whose
/// deletion the runner tracks.
pub fn materialize(config: &TestConfig, test_name: &str) -> E2eResult<MaterializedConfig> {
    if let Some(path) = &config.config_file {
        return Ok(MaterializedConfig {
            path: path.clone(),
            generated: false,
        });
    }

    let text = config.config_text.as_deref().unwrap_or(DEFAULT_CONFIG_TEXT);

    let mut file = tempfile::Builder::new()
        .prefix(&format!("test_{}_", test_name))
        .suffix(".conf")
        .tempfile()
        .map_err(|e| E2eError::ConfigWrite {
            path: std::env::temp_dir(),
            source: e,
        })?;

    file.write_all(text.as_bytes())
        .map_err(|e| E2eError::ConfigWrite {
            path: file.path().to_path_buf(),
            source: e,
        })?;

    // Detach from the NamedTempFile guard so the file survives this scope;
    // the runner deletes it after the whole suite has finished.
    let (_, path) = file.keep().map_err(|e| E2eError::ConfigWrite {
        path: e.file.path().to_path_buf(),
        source: e.error,
    })?;

    debug!("materialized config for '{}' at {}", test_name, path.display());

    Ok(MaterializedConfig {
        path,
        generated: true,
    })
}
