//! Webserver E2E Test Harness
//!
//! This crate validates an externally built HTTP server binary by:
//! - Spawning the binary as a subprocess, one fresh process per test
//! - Waiting for it to accept TCP connections (readiness polling)
//! - Driving it with real HTTP requests and soft assertions
//! - Running tests strictly sequentially with per-test failure isolation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Integration Test Runner                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── materialize(config) -> config path (temp or owned)   │
//! │    ├── ServerFixture::start() -> readiness-polled process   │
//! │    ├── body(&fixture, &client) -> pass/fail                 │
//! │    └── cleanup on every exit path, then next test           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Registry                                                   │
//! │    ├── register(name, TestConfig, body)                     │
//! │    └── select(filter) -> ordered definitions                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Server under test (opaque external binary)                 │
//! │    ├── argv: one absolute config path                       │
//! │    ├── stdout+stderr -> per-fixture server.log              │
//! │    └── HTTP/1.1 on 127.0.0.1:<port>                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cases;
pub mod client;
pub mod config;
pub mod error;
pub mod fixture;
pub mod registry;
pub mod runner;

pub use client::{Checks, RequestClient};
pub use config::TestConfig;
pub use error::{E2eError, E2eResult};
pub use fixture::{FixtureState, ServerFixture};
pub use registry::Registry;
pub use runner::{TestRunner, TestSuiteResult};
