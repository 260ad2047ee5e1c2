//! Test definitions and the catalog holding them.
//!
//! The catalog is built explicitly by the entry point during start-up and
//! is read-only once a run begins.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use plfm_harness::{TestFuture, TestResult};
use plfm_platform::Platform;
use semver::Version;

use crate::cluster::TestCluster;
use crate::error::RegistryError;

/// Placeholder replaced by the cluster's discovery endpoint.
pub const DISCOVERY_PLACEHOLDER: &str = "$discovery";

/// Placeholder replaced by `instance<N>` for the N-th machine.
pub const NAME_PLACEHOLDER: &str = "$name";

/// Test body run against a provisioned cluster.
pub type RunFn = Arc<dyn Fn(TestCluster) -> TestFuture + Send + Sync>;

/// Function executed on a machine by the companion agent.
pub type NativeFn = fn() -> anyhow::Result<()>;

/// The zero version, meaning "unknown" or "unbounded".
pub fn zero_version() -> Version {
    Version::new(0, 0, 0)
}

/// Static description of one test.
#[derive(Clone)]
pub struct TestDefinition {
    pub name: String,
    pub run: RunFn,
    /// Machines to provision. Zero means the test runs without a cluster.
    pub cluster_size: usize,
    /// Platforms the test may run on. Empty means any.
    pub platforms: BTreeSet<Platform>,
    /// Architectures the test may run on. Empty means any.
    pub architectures: BTreeSet<String>,
    /// Oldest fleet version the test applies to. Zero means no lower bound.
    pub min_version: Version,
    /// First fleet version the test no longer applies to.
    pub end_version: Option<Version>,
    pub native_funcs: BTreeMap<String, NativeFn>,
    /// User-data template; may contain `$discovery` and `$name`.
    pub user_data: String,
}

impl TestDefinition {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(TestCluster) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |c| -> TestFuture { Box::pin(run(c)) }),
            cluster_size: 0,
            platforms: BTreeSet::new(),
            architectures: BTreeSet::new(),
            min_version: zero_version(),
            end_version: None,
            native_funcs: BTreeMap::new(),
            user_data: String::new(),
        }
    }

    pub fn cluster_size(mut self, size: usize) -> Self {
        self.cluster_size = size;
        self
    }

    pub fn platforms(mut self, platforms: impl IntoIterator<Item = Platform>) -> Self {
        self.platforms = platforms.into_iter().collect();
        self
    }

    pub fn architectures<S: Into<String>>(mut self, archs: impl IntoIterator<Item = S>) -> Self {
        self.architectures = archs.into_iter().map(Into::into).collect();
        self
    }

    pub fn min_version(mut self, version: Version) -> Self {
        self.min_version = version;
        self
    }

    pub fn end_version(mut self, version: Version) -> Self {
        self.end_version = Some(version);
        self
    }

    pub fn native_func(mut self, name: impl Into<String>, func: NativeFn) -> Self {
        self.native_funcs.insert(name.into(), func);
        self
    }

    pub fn user_data(mut self, template: impl Into<String>) -> Self {
        self.user_data = template.into();
        self
    }

    /// Returns true if the user data needs a discovery endpoint.
    pub fn needs_discovery(&self) -> bool {
        self.user_data.contains(DISCOVERY_PLACEHOLDER)
    }

    /// Returns true if the test runs on provisioned machines.
    pub fn needs_cluster(&self) -> bool {
        self.cluster_size > 0
    }

    /// Render the user data once per machine.
    pub fn machine_configs(&self, discovery: &str) -> Vec<String> {
        (0..self.cluster_size)
            .map(|i| {
                self.user_data
                    .replace(DISCOVERY_PLACEHOLDER, discovery)
                    .replace(NAME_PLACEHOLDER, &format!("instance{i}"))
            })
            .collect()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.name.contains('/') || self.name.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidName(self.name.clone()));
        }
        if self.cluster_size == 0 {
            let reason = if !self.native_funcs.is_empty() {
                Some("declares native functions")
            } else if self.needs_discovery() || self.user_data.contains(NAME_PLACEHOLDER) {
                Some("its user data is a per-machine template")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(RegistryError::InvalidClusterSize {
                    name: self.name.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TestDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDefinition")
            .field("name", &self.name)
            .field("cluster_size", &self.cluster_size)
            .field("platforms", &self.platforms)
            .field("architectures", &self.architectures)
            .field("min_version", &self.min_version)
            .field("end_version", &self.end_version)
            .field("native_funcs", &self.native_funcs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Every known test, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tests: BTreeMap<String, TestDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition. Invalid or duplicate definitions are rejected.
    pub fn register(&mut self, def: TestDefinition) -> Result<(), RegistryError> {
        def.validate()?;
        if self.tests.contains_key(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.tests.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TestDefinition> {
        self.tests.get(name)
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &TestDefinition> {
        self.tests.values()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Look up a native function by test and function name.
    pub fn native_func(&self, test: &str, func: &str) -> Option<NativeFn> {
        self.tests.get(test)?.native_funcs.get(func).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> TestDefinition {
        TestDefinition::new(name, |_c| async { Ok(()) })
    }

    fn native_ok() -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        registry.register(noop("b.two")).unwrap();
        registry.register(noop("a.one")).unwrap();

        let names: Vec<&str> = registry.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.one", "b.two"]);
        assert!(registry.get("a.one").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new();
        registry.register(noop("x")).unwrap();
        let err = registry.register(noop("x")).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "x"));
    }

    #[test]
    fn test_empty_and_invalid_names_rejected() {
        let mut registry = Registry::new();
        assert!(matches!(registry.register(noop("")), Err(RegistryError::EmptyName)));
        assert!(matches!(
            registry.register(noop("a/b")),
            Err(RegistryError::InvalidName(_))
        ));
        assert!(matches!(
            registry.register(noop("a b")),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_cluster_less_native_funcs_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .register(noop("native").native_func("Check", native_ok))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidClusterSize { .. }));

        registry
            .register(noop("native").cluster_size(1).native_func("Check", native_ok))
            .unwrap();
        assert!(registry.native_func("native", "Check").is_some());
        assert!(registry.native_func("native", "Other").is_none());
    }

    #[test]
    fn test_cluster_less_template_rejected() {
        let mut registry = Registry::new();
        let err = registry
            .register(noop("tmpl").user_data("hostname: $name"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidClusterSize { .. }));
    }

    #[test]
    fn test_machine_configs_substitute_placeholders() {
        let def = noop("etcd")
            .cluster_size(3)
            .user_data("discovery: $discovery\nname: $name\n");
        assert!(def.needs_discovery());

        let configs = def.machine_configs("https://d.example/abc");
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0], "discovery: https://d.example/abc\nname: instance0\n");
        assert_eq!(configs[2], "discovery: https://d.example/abc\nname: instance2\n");
    }
}
