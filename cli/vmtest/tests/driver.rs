//! Integration tests for the orchestration driver against the mock backend.

use std::collections::HashMap;
use std::fs;
use std::future::{ready, Ready};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use plfm_harness::{HarnessError, TestResult};
use plfm_platform::{Backends, MockBehavior, MockFactory, Platform, PlatformError};
use plfm_vmtest::cluster::AGENT_BINARY;
use plfm_vmtest::register::TestDefinition;
use plfm_vmtest::{
    Driver, DriverError, DriverOptions, Registry, SkipError, TestCluster, TestOptions,
};
use semver::Version;

fn options(scratch: &Path) -> DriverOptions {
    let mut opts = DriverOptions::new(Platform::Qemu, scratch.join("out"));
    opts.splay = Duration::ZERO;
    opts.grace_delay = Duration::ZERO;
    opts.agent_dirs = Some(vec![scratch.to_path_buf()]);
    opts
}

fn mock(behavior: MockBehavior) -> (Arc<MockFactory>, Backends) {
    let factory = Arc::new(MockFactory::new(behavior));
    let mut backends = Backends::new();
    backends.insert(Platform::Qemu, factory.clone());
    (factory, backends)
}

fn registry(defs: Vec<TestDefinition>) -> Arc<Registry> {
    let mut registry = Registry::new();
    for def in defs {
        registry.register(def).unwrap();
    }
    Arc::new(registry)
}

fn noop_native() -> anyhow::Result<()> {
    Ok(())
}

/// Body that records its test name when run.
fn recorder(
    ran: &Arc<Mutex<Vec<&'static str>>>,
    name: &'static str,
) -> impl Fn(TestCluster) -> Ready<TestResult> + Send + Sync + 'static {
    let ran = Arc::clone(ran);
    move |_c| {
        ran.lock().push(name);
        ready(Ok(()))
    }
}

#[tokio::test]
async fn test_failures_are_counted_and_clusters_destroyed() {
    let scratch = tempfile::tempdir().unwrap();
    let (factory, backends) = mock(MockBehavior::default());
    let registry = registry(vec![
        TestDefinition::new("t.pass", |_c| async { Ok(()) }).cluster_size(1),
        TestDefinition::new("t.fail", |c| async move {
            c.error("boom");
            Ok(())
        })
        .cluster_size(1),
        TestDefinition::new("t.panic", |_c| async move {
            if std::hint::black_box(true) {
                panic!("kaboom");
            }
            Ok(())
        })
        .cluster_size(2),
    ]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    let err = driver.run_tests("t.*").await.unwrap_err();
    assert!(err.is_test_failure());
    assert!(matches!(
        err,
        DriverError::Harness(HarnessError::TestsFailed { failed: 2 })
    ));

    // One throwaway cluster for the version check plus one per test.
    let clusters = factory.clusters();
    assert_eq!(clusters.len(), 4);
    for cluster in &clusters {
        assert!(cluster.is_destroyed(), "{} left running", cluster.output_dir().display());
        assert!(cluster.mock_machines().iter().all(|m| m.is_destroyed()));
    }
    assert!(driver.live_clusters().is_empty());

    let tap = fs::read_to_string(scratch.path().join("out/test.tap")).unwrap();
    assert!(tap.contains("not ok 1 - t.fail"));
    assert!(tap.contains("not ok 2 - t.panic"));
    assert!(tap.contains("ok 3 - t.pass"));
    assert!(tap.contains("panic: kaboom"));
}

#[tokio::test]
async fn test_cluster_dirs_are_named_after_tests() {
    let scratch = tempfile::tempdir().unwrap();
    let (factory, backends) = mock(MockBehavior::default());
    let registry = registry(vec![
        TestDefinition::new("cluster.one", |_c| async { Ok(()) }).cluster_size(1),
    ]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    driver.run_tests("cluster.one").await.unwrap();

    let clusters = factory.clusters();
    assert_eq!(clusters.len(), 1, "exact name must not trigger a version check");
    assert_eq!(clusters[0].output_dir(), scratch.path().join("out/cluster.one"));
}

#[tokio::test]
async fn test_cluster_less_test_needs_no_backend() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(vec![TestDefinition::new("local.option", |c| async move {
        match c.option("flavor") {
            Some("vanilla") => Ok(()),
            other => Err(c.fatal(format!("unexpected option {other:?}"))),
        }
    })]);

    let mut opts = options(scratch.path());
    opts.options = Arc::new(TestOptions::new().with("flavor", "vanilla").unwrap());
    let driver = Driver::new(registry, Backends::new(), opts);

    let counts = driver.run_tests("local.option").await.unwrap();
    assert_eq!(counts.passed, 1);
    assert_eq!(counts.total(), 1);
}

#[tokio::test]
async fn test_version_bounds_select_tests() {
    let scratch = tempfile::tempdir().unwrap();
    let (_factory, backends) = mock(MockBehavior {
        os_release: "VERSION_ID=1010.5.0\n".to_string(),
        ..Default::default()
    });
    let ran = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(vec![
        TestDefinition::new("v.old", recorder(&ran, "v.old"))
            .cluster_size(1)
            .end_version(Version::new(1000, 0, 0)),
        TestDefinition::new("v.new", recorder(&ran, "v.new"))
            .cluster_size(1)
            .min_version(Version::new(1010, 0, 0)),
        TestDefinition::new("v.future", recorder(&ran, "v.future"))
            .cluster_size(1)
            .min_version(Version::new(2000, 0, 0)),
    ]);

    let driver = Driver::new(Arc::clone(&registry), backends.clone(), options(scratch.path()));
    let counts = driver.run_tests("v.*").await.unwrap();
    assert_eq!(counts.total(), 1);
    assert_eq!(*ran.lock(), vec!["v.new"]);

    // An exact name runs regardless of bounds.
    let driver = Driver::new(registry, backends, options(scratch.path()));
    driver.run_tests("v.old").await.unwrap();
    assert_eq!(*ran.lock(), vec!["v.new", "v.old"]);
}

#[tokio::test]
async fn test_unreadable_version_is_setup_fatal() {
    let scratch = tempfile::tempdir().unwrap();
    let (_factory, backends) = mock(MockBehavior {
        os_release: "NAME=nothing\n".to_string(),
        ..Default::default()
    });
    let registry = registry(vec![
        TestDefinition::new("a.one", |_c| async { Ok(()) }).cluster_size(1),
        TestDefinition::new("a.two", |_c| async { Ok(()) }).cluster_size(1),
    ]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    let err = driver.run_tests("a.*").await.unwrap_err();
    assert!(matches!(err, DriverError::Version(_)));
    assert!(!err.is_test_failure());
}

#[tokio::test]
async fn test_missing_native_binary_aborts_before_provisioning() {
    let scratch = tempfile::tempdir().unwrap();
    let (factory, backends) = mock(MockBehavior::default());
    let registry = registry(vec![TestDefinition::new("native.x", |_c| async { Ok(()) })
        .cluster_size(1)
        .native_func("Check", noop_native)]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    let err = driver.run_tests("native.x").await.unwrap_err();
    assert!(matches!(err, DriverError::NativeBinaryNotFound { .. }));
    assert!(factory.clusters().is_empty());
}

#[tokio::test]
async fn test_native_binary_is_dropped_on_every_machine() {
    let scratch = tempfile::tempdir().unwrap();
    let agent = scratch.path().join(AGENT_BINARY);
    fs::write(&agent, "#!/bin/sh\n").unwrap();

    let (factory, backends) = mock(MockBehavior {
        outputs: HashMap::from([(
            "./vmtest-agent run 'native.x' 'Check'".to_string(),
            "SKIP: nothing to check\n".to_string(),
        )]),
        ..Default::default()
    });
    let registry = registry(vec![TestDefinition::new("native.x", |c| async move {
        for machine in c.machines() {
            let out = c.run_native("Check", machine.as_ref()).await;
            c.check(out)?;
        }
        Ok(())
    })
    .cluster_size(2)
    .native_func("Check", noop_native)]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    let counts = driver.run_tests("native.x").await.unwrap();
    assert_eq!(counts.skipped, 1);

    let machines = factory.clusters()[0].mock_machines();
    assert_eq!(machines.len(), 2);
    for machine in machines {
        assert_eq!(machine.files(), vec![agent.clone()]);
    }
}

#[tokio::test]
async fn test_failed_agent_copy_fails_only_that_test() {
    let scratch = tempfile::tempdir().unwrap();
    fs::write(scratch.path().join(AGENT_BINARY), "").unwrap();
    let (factory, backends) = mock(MockBehavior {
        fail_copies: true,
        ..Default::default()
    });
    let registry = registry(vec![
        TestDefinition::new("copy.native", |_c| async { Ok(()) })
            .cluster_size(1)
            .native_func("Check", noop_native),
        TestDefinition::new("copy.plain", |_c| async { Ok(()) }).cluster_size(1),
    ]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    let err = driver.run_tests("copy.*").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Harness(HarnessError::TestsFailed { failed: 1 })
    ));
    assert!(factory.clusters().iter().all(|c| c.is_destroyed()));
}

#[tokio::test]
async fn test_discovery_and_names_are_rendered() {
    let scratch = tempfile::tempdir().unwrap();
    let (factory, backends) = mock(MockBehavior::default());
    let registry = registry(vec![TestDefinition::new("etcd.discovery", |_c| async {
        Ok(())
    })
    .cluster_size(2)
    .user_data("discovery: $discovery\nname: $name\n")]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    driver.run_tests("etcd.discovery").await.unwrap();

    let mut user_data: Vec<String> = factory.clusters()[0]
        .mock_machines()
        .iter()
        .map(|m| m.user_data().to_string())
        .collect();
    user_data.sort();
    assert_eq!(
        user_data,
        vec![
            "discovery: http://discovery.mock/mock-0?size=2\nname: instance0\n",
            "discovery: http://discovery.mock/mock-0?size=2\nname: instance1\n",
        ]
    );
}

#[tokio::test]
async fn test_machine_failure_fails_test_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let (factory, backends) = mock(MockBehavior {
        machine_limit: Some(1),
        ..Default::default()
    });
    let registry = registry(vec![
        TestDefinition::new("big.cluster", |_c| async { Ok(()) }).cluster_size(3),
    ]);

    let driver = Driver::new(registry, backends, options(scratch.path()));
    let err = driver.run_tests("big.cluster").await.unwrap_err();
    assert!(err.is_test_failure());

    let cluster = &factory.clusters()[0];
    assert!(cluster.is_destroyed());
    assert!(cluster.mock_machines().iter().all(|m| m.is_destroyed()));
}

#[tokio::test]
async fn test_skip_error_skips() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(vec![TestDefinition::new("skip.me", |c| async move {
        let result: anyhow::Result<()> = Err(SkipError::new("wrong image").into());
        c.check(result)
    })]);

    let driver = Driver::new(registry, Backends::new(), options(scratch.path()));
    let counts = driver.run_tests("skip.me").await.unwrap();
    assert_eq!(counts.skipped, 1);
    assert_eq!(counts.failed, 0);
}

#[tokio::test]
async fn test_tap_report_is_copied() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(vec![TestDefinition::new("tap.one", |_c| async { Ok(()) })]);

    let mut opts = options(scratch.path());
    let dest = scratch.path().join("published.tap");
    opts.tap_file = Some(dest.clone());
    let driver = Driver::new(registry, Backends::new(), opts);
    driver.run_tests("tap.one").await.unwrap();

    let tap = fs::read_to_string(dest).unwrap();
    assert!(tap.starts_with("TAP version 13\n1..1\nok 1 - tap.one\n"));
}

#[tokio::test]
async fn test_unconfigured_platform_is_setup_fatal() {
    let scratch = tempfile::tempdir().unwrap();
    let (_factory, backends) = mock(MockBehavior::default());
    let registry = registry(vec![
        TestDefinition::new("aws.only", |_c| async { Ok(()) }).cluster_size(1),
    ]);

    let mut opts = options(scratch.path());
    opts.platform = Platform::Aws;
    let driver = Driver::new(registry, backends, opts);
    let err = driver.run_tests("aws.only").await.unwrap_err();
    assert!(matches!(
        err,
        DriverError::Platform(PlatformError::NoBackend(Platform::Aws))
    ));
}

#[tokio::test]
async fn test_bad_output_dir_is_rejected() {
    let registry = registry(vec![TestDefinition::new("x.y", |_c| async { Ok(()) })]);
    let mut opts = DriverOptions::new(Platform::Qemu, ".");
    opts.splay = Duration::ZERO;
    let driver = Driver::new(registry, Backends::new(), opts);
    assert!(matches!(
        driver.run_tests("*").await.unwrap_err(),
        DriverError::BadOutputDir(_)
    ));
}

#[tokio::test]
async fn test_bad_pattern_is_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(vec![TestDefinition::new("x.y", |_c| async { Ok(()) })]);
    let driver = Driver::new(registry, Backends::new(), options(scratch.path()));
    assert!(matches!(
        driver.run_tests("[x").await.unwrap_err(),
        DriverError::Harness(HarnessError::BadPattern { .. })
    ));
}
