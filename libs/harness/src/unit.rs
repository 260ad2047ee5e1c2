//! The collection of test units handed to a suite.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crate::error::HarnessError;
use crate::group::{Group, GroupUnit};
use crate::h::{TestFuture, TestResult, H};
use crate::pattern::Pattern;

/// A standalone test body.
pub type TestFn = Arc<dyn Fn(Arc<H>) -> TestFuture + Send + Sync>;

/// One top-level unit of scheduling.
#[derive(Clone)]
pub(crate) enum Unit {
    Func { name: String, run: TestFn },
    Group(Arc<dyn GroupUnit>),
}

impl Unit {
    /// Names of this unit's tests that match `pattern`.
    pub(crate) fn matching(&self, pattern: &Pattern) -> Vec<String> {
        match self {
            Unit::Func { name, .. } => {
                if pattern.matches(name) {
                    vec![name.clone()]
                } else {
                    Vec::new()
                }
            }
            Unit::Group(group) => group
                .list()
                .into_iter()
                .filter(|name| pattern.matches(name))
                .collect(),
        }
    }
}

/// Ordered set of standalone tests and groups.
#[derive(Clone, Default)]
pub struct Tests {
    units: Vec<Unit>,
    func_names: HashSet<String>,
}

impl Tests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a standalone test. Names must be unique.
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, body: F) -> Result<(), HarnessError>
    where
        F: Fn(Arc<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestResult> + Send + 'static,
    {
        let name = name.into();
        if !self.func_names.insert(name.clone()) {
            return Err(HarnessError::DuplicateTest(name));
        }

        let run: TestFn = Arc::new(move |h| -> TestFuture { Box::pin(body(h)) });
        self.units.push(Unit::Func { name, run });
        Ok(())
    }

    /// Add a group. The caller may keep its own handle to inspect the
    /// group's state after a run.
    pub fn add_group<G: Group>(&mut self, group: Arc<G>) {
        self.units.push(Unit::Group(group));
    }

    /// Every test name, sorted. Nothing is executed.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .units
            .iter()
            .flat_map(|unit| match unit {
                Unit::Func { name, .. } => vec![name.clone()],
                Unit::Group(group) => group.list(),
            })
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub(crate) fn units(&self) -> &[Unit] {
        &self.units
    }
}
