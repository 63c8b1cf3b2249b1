//! Test registration and selection

use futures::future::BoxFuture;

use crate::client::RequestClient;
use crate::config::TestConfig;
use crate::error::{E2eError, E2eResult};
use crate::fixture::ServerFixture;

/// A deferred test body: borrows the running fixture and its bound client,
/// resolves to pass/fail.
///
/// `Ok(false)` is a failed assertion; `Err` is an infrastructure failure.
pub type TestBody = Box<
    dyn for<'a> Fn(&'a ServerFixture, &'a RequestClient) -> BoxFuture<'a, E2eResult<bool>>
        + Send
        + Sync,
>;

pub struct TestDefinition {
    pub name: String,
    pub config: TestConfig,
    pub body: TestBody,
}

/// Ordered table of test definitions, populated explicitly by the entry
/// point. Entries are never removed during a run; `select` is a pure read.
#[derive(Default)]
pub struct Registry {
    tests: Vec<TestDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a test under a unique name.
    ///
    /// Duplicate names are rejected: a collision would otherwise silently
    /// shadow an earlier test.
    pub fn register<F>(&mut self, name: &str, config: TestConfig, body: F) -> E2eResult<()>
    where
        F: for<'a> Fn(&'a ServerFixture, &'a RequestClient) -> BoxFuture<'a, E2eResult<bool>>
            + Send
            + Sync
            + 'static,
    {
        if self.tests.iter().any(|t| t.name == name) {
            return Err(E2eError::DuplicateTest(name.to_string()));
        }
        self.tests.push(TestDefinition {
            name: name.to_string(),
            config,
            body: Box::new(body),
        });
        Ok(())
    }

    /// All definitions whose name contains the filter substring, in
    /// registration order; no filter selects everything.
    pub fn select(&self, filter: Option<&str>) -> Vec<&TestDefinition> {
        self.tests
            .iter()
            .filter(|t| filter.map_or(true, |f| t.name.contains(f)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use test_case::test_case;

    fn passing_body<'a>(
        _fixture: &'a ServerFixture,
        _client: &'a RequestClient,
    ) -> BoxFuture<'a, E2eResult<bool>> {
        async { Ok(true) }.boxed()
    }

    fn sample_registry() -> Registry {
        let mut registry = Registry::new();
        for name in ["crud_lifecycle", "crud_double_delete", "static_files"] {
            registry
                .register(name, TestConfig::default(), passing_body)
                .unwrap();
        }
        registry
    }

    #[test]
    fn registration_order_is_preserved() {
        let registry = sample_registry();
        let names: Vec<&str> = registry
            .select(None)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(
            names,
            ["crud_lifecycle", "crud_double_delete", "static_files"]
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = sample_registry();
        let err = registry
            .register("crud_lifecycle", TestConfig::default(), passing_body)
            .unwrap_err();
        assert!(matches!(err, E2eError::DuplicateTest(name) if name == "crud_lifecycle"));
        assert_eq!(registry.len(), 3);
    }

    #[test_case(None, 3 ; "no filter selects everything")]
    #[test_case(Some("crud"), 2 ; "substring matches multiple")]
    #[test_case(Some("static"), 1 ; "substring matches one")]
    #[test_case(Some("missing"), 0 ; "no match selects nothing")]
    fn select_filters_by_substring(filter: Option<&str>, expected: usize) {
        let registry = sample_registry();
        assert_eq!(registry.select(filter).len(), expected);
    }
}
