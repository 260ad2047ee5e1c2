//! Groups of related tests sharing set-up and tear-down.
//!
//! A group declares its test methods explicitly through [`Group::methods`];
//! only names carrying the group's prefix (default `Test`) are tests. One
//! group instance is shared by `prepare`, every member and `cleanup`, so
//! `prepare` can stash state (a cluster handle, say) behind interior
//! mutability for the members to use.
//!
//! ```ignore
//! struct SingleNode { machine: Mutex<Option<Arc<dyn Machine>>> }
//!
//! #[async_trait]
//! impl Group for SingleNode {
//!     fn name(&self) -> &str { "SingleNode" }
//!     fn methods(&self) -> Vec<GroupTest<Self>> {
//!         vec![GroupTest::new("TestUname", |g, h| Box::pin(g.test_uname(h)))]
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HarnessError;
use crate::h::{run_harness, BoxFuture, TestFuture, TestResult, H};

/// Default prefix of test method names.
pub const DEFAULT_PREFIX: &str = "Test";

/// Method name reserved for group set-up.
pub const PREPARE: &str = "Prepare";

/// Method name reserved for group tear-down.
pub const CLEANUP: &str = "Cleanup";

/// Invoker for one group method.
pub type MethodFn<G> = for<'a> fn(&'a G, &'a H) -> BoxFuture<'a, TestResult>;

/// A named method declared by a group.
pub struct GroupTest<G> {
    name: &'static str,
    run: MethodFn<G>,
}

impl<G> GroupTest<G> {
    pub fn new(name: &'static str, run: MethodFn<G>) -> Self {
        Self { name, run }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A set of related tests with one `prepare` and one `cleanup`.
#[async_trait]
pub trait Group: Send + Sync + 'static {
    /// Group name, used as the first half of `Group.Method`.
    fn name(&self) -> &str;

    /// Prefix shared by all test methods.
    fn prefix(&self) -> &str {
        DEFAULT_PREFIX
    }

    /// Every method the group exposes, tests and helpers alike.
    fn methods(&self) -> Vec<GroupTest<Self>>
    where
        Self: Sized;

    /// Runs once before any member. Failing or skipping here fails or
    /// skips every member without invoking it.
    async fn prepare(&self, _h: &H) -> TestResult {
        Ok(())
    }

    /// Runs once after all members, only if `prepare` passed.
    async fn cleanup(&self, _h: &H) -> TestResult {
        Ok(())
    }
}

/// Tells whether `name` starts with the word `prefix`: the character after
/// the prefix, if any, must not be a lower-case letter (`TestFoo` and
/// `Test` qualify, `Testing` does not).
pub fn has_identifier_prefix(name: &str, prefix: &str) -> bool {
    match name.strip_prefix(prefix) {
        None => false,
        Some(rest) => rest.chars().next().is_none_or(|c| !c.is_lowercase()),
    }
}

fn is_test_method(name: &str, prefix: &str) -> bool {
    name != PREPARE && name != CLEANUP && has_identifier_prefix(name, prefix)
}

/// Sorted `Group.Method` names of the group's tests.
pub fn list_group<G: Group>(group: &G) -> Vec<String> {
    let mut names: Vec<String> = group
        .methods()
        .iter()
        .filter(|m| is_test_method(m.name, group.prefix()))
        .map(|m| format!("{}.{}", group.name(), m.name))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Run a single named member under a fresh harness, without `prepare` or
/// `cleanup`. A name without a `.` is taken as the bare method name.
pub async fn run_group_member<G: Group>(group: Arc<G>, name: &str) -> Result<Arc<H>, HarnessError> {
    let (full_name, method) = match name.split_once('.') {
        Some((_, method)) => (name.to_string(), method.to_string()),
        None => (format!("{}.{}", group.name(), name), name.to_string()),
    };

    let h = H::new(full_name.clone());
    let body = GroupUnit::member(group, &method, Arc::clone(&h))
        .ok_or(HarnessError::UnknownTest(full_name))?;
    run_harness(&h, body).await;
    Ok(h)
}

/// Type-erased view of a group used by the suite.
pub(crate) trait GroupUnit: Send + Sync {
    fn group_name(&self) -> &str;
    fn list(&self) -> Vec<String>;
    fn prepare(self: Arc<Self>, h: Arc<H>) -> TestFuture;
    fn cleanup(self: Arc<Self>, h: Arc<H>) -> TestFuture;
    fn member(self: Arc<Self>, method: &str, h: Arc<H>) -> Option<TestFuture>;
}

impl<G: Group> GroupUnit for G {
    fn group_name(&self) -> &str {
        Group::name(self)
    }

    fn list(&self) -> Vec<String> {
        list_group(self)
    }

    fn prepare(self: Arc<Self>, h: Arc<H>) -> TestFuture {
        Box::pin(async move { Group::prepare(&*self, &h).await })
    }

    fn cleanup(self: Arc<Self>, h: Arc<H>) -> TestFuture {
        Box::pin(async move { Group::cleanup(&*self, &h).await })
    }

    fn member(self: Arc<Self>, method: &str, h: Arc<H>) -> Option<TestFuture> {
        let run = self
            .methods()
            .into_iter()
            .find(|m| m.name == method && is_test_method(m.name, self.prefix()))?
            .run;
        Some(Box::pin(async move { run(&self, &h).await }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Sample {
        called: AtomicBool,
    }

    impl Sample {
        async fn test_func1(&self, _h: &H) -> TestResult {
            Ok(())
        }

        async fn test_func2(&self, _h: &H) -> TestResult {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn helper(&self, h: &H) -> TestResult {
            Err(h.fatal("helpers are not tests"))
        }
    }

    #[async_trait]
    impl Group for Sample {
        fn name(&self) -> &str {
            "Sample"
        }

        fn methods(&self) -> Vec<GroupTest<Self>> {
            vec![
                GroupTest::new("TestFunc2", |g, h| Box::pin(g.test_func2(h))),
                GroupTest::new("Helper", |g, h| Box::pin(g.helper(h))),
                GroupTest::new("TestFunc1", |g, h| Box::pin(g.test_func1(h))),
            ]
        }
    }

    #[test]
    fn test_identifier_prefix() {
        assert!(has_identifier_prefix("Test", "Test"));
        assert!(has_identifier_prefix("TestFoo", "Test"));
        assert!(has_identifier_prefix("Test_foo", "Test"));
        assert!(!has_identifier_prefix("Testing", "Test"));
        assert!(!has_identifier_prefix("Helper", "Test"));
    }

    #[test]
    fn test_list_group_sorted_and_filtered() {
        let names = list_group(&Sample::default());
        assert_eq!(names, vec!["Sample.TestFunc1", "Sample.TestFunc2"]);
    }

    #[tokio::test]
    async fn test_run_group_member() {
        let group = Arc::new(Sample::default());
        let h = run_group_member(Arc::clone(&group), "Sample.TestFunc2")
            .await
            .unwrap();
        assert!(!h.failed() && !h.skipped());
        assert_eq!(h.name(), "Sample.TestFunc2");
        assert!(group.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_group_member_bare_name() {
        let group = Arc::new(Sample::default());
        let h = run_group_member(group, "TestFunc1").await.unwrap();
        assert_eq!(h.name(), "Sample.TestFunc1");
    }

    #[tokio::test]
    async fn test_helpers_are_not_runnable() {
        let group = Arc::new(Sample::default());
        let err = run_group_member(group, "Helper").await.unwrap_err();
        assert!(matches!(err, HarnessError::UnknownTest(name) if name == "Sample.Helper"));
    }
}
