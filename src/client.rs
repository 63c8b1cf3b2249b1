//! HTTP helpers for test bodies - verb wrappers and soft assertions

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::error::E2eResult;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Uniform HTTP verb wrapper bound to one fixture's port.
///
/// Redirect following is disabled so 3xx responses stay observable to test
/// bodies (the link-redirect cases assert on them directly).
#[derive(Clone)]
pub struct RequestClient {
    base_url: String,
    port: u16,
    client: reqwest::Client,
}

impl RequestClient {
    pub fn new(port: u16) -> E2eResult<Self> {
        Self::with_base("http://127.0.0.1", port)
    }

    pub fn with_base(base_url: &str, port: u16) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            port,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}:{}{}", self.base_url, self.port, path)
    }

    /// Builder for requests that need custom headers, bodies, or timeouts.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub async fn get(&self, path: &str) -> E2eResult<Response> {
        Ok(self.request(Method::GET, path).send().await?)
    }

    pub async fn post(&self, path: &str, body: impl Into<reqwest::Body>) -> E2eResult<Response> {
        Ok(self.request(Method::POST, path).body(body).send().await?)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> E2eResult<Response> {
        Ok(self.request(Method::POST, path).json(body).send().await?)
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> E2eResult<Response> {
        Ok(self.request(Method::PUT, path).json(body).send().await?)
    }

    pub async fn delete(&self, path: &str) -> E2eResult<Response> {
        Ok(self.request(Method::DELETE, path).send().await?)
    }

    pub async fn head(&self, path: &str) -> E2eResult<Response> {
        Ok(self.request(Method::HEAD, path).send().await?)
    }

    /// Application-level readiness: GET `/` until one request completes.
    ///
    /// Distinct from the fixture's connection-level readiness probe; any
    /// status counts, only transport errors retry.
    pub async fn wait_for_server(&self, max_attempts: u32, delay: Duration) -> bool {
        for _ in 0..max_attempts {
            let probe = self
                .request(Method::GET, "/")
                .timeout(Duration::from_secs(1))
                .send()
                .await;
            if probe.is_ok() {
                return true;
            }
            sleep(delay).await;
        }
        false
    }
}

/// Soft-assertion accumulator.
///
/// Failed checks log a diagnostic and are recorded instead of aborting, so
/// a test body can run every check it has and report all violated
/// expectations from a single run. `ok()` is the overall verdict.
#[derive(Debug, Default)]
pub struct Checks {
    failures: Vec<String>,
}

impl Checks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&mut self, response: &Response, expected: u16) -> bool {
        let actual = response.status().as_u16();
        if actual != expected {
            self.fail(format!(
                "expected status {}, got {} for {}",
                expected,
                actual,
                response.url()
            ));
            return false;
        }
        true
    }

    pub fn contains(&mut self, body: &str, needle: &str) -> bool {
        if !body.contains(needle) {
            let preview: String = body.chars().take(200).collect();
            self.fail(format!(
                "expected text {:?} not found in response (body starts: {:?})",
                needle, preview
            ));
            return false;
        }
        true
    }

    pub fn header(&mut self, response: &Response, name: &str, expected: &str) -> bool {
        let actual = response.headers().get(name).and_then(|v| v.to_str().ok());
        if actual != Some(expected) {
            self.fail(format!(
                "expected header {}: {}, got {:?}",
                name, expected, actual
            ));
            return false;
        }
        true
    }

    pub fn check(&mut self, condition: bool, message: impl Into<String>) -> bool {
        if !condition {
            self.fail(message.into());
        }
        condition
    }

    fn fail(&mut self, message: String) {
        warn!("check failed: {}", message);
        self.failures.push(message);
    }

    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}
