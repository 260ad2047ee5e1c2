//! Test selection by name, platform, architecture and fleet version.

use plfm_harness::Pattern;
use plfm_platform::Platform;
use semver::Version;

use crate::register::{Registry, TestDefinition};

fn is_zero(v: &Version) -> bool {
    v.major == 0 && v.minor == 0 && v.patch == 0 && v.pre.is_empty()
}

/// Returns true if `version` falls outside `[min, end)`. A zero `min` is no
/// lower bound; a missing or zero `end` is no upper bound.
pub fn version_outside_range(version: &Version, min: &Version, end: Option<&Version>) -> bool {
    if !is_zero(min) && version < min {
        return true;
    }
    matches!(end, Some(end) if !is_zero(end) && version >= end)
}

/// Select the definitions to run, in name order.
///
/// A zero `version` disables version filtering. A pattern equal to a test's
/// exact name runs that test whatever its version range.
pub fn filter_tests<'a>(
    registry: &'a Registry,
    pattern: &Pattern,
    platform: Platform,
    arch: &str,
    version: &Version,
) -> Vec<&'a TestDefinition> {
    registry
        .iter()
        .filter(|def| pattern.matches(&def.name))
        .filter(|def| allows_platform(def, platform))
        .filter(|def| allows_arch(def, arch))
        .filter(|def| {
            is_zero(version)
                || def.name == pattern.as_str()
                || !version_outside_range(version, &def.min_version, def.end_version.as_ref())
        })
        .collect()
}

/// Returns true if version bounds can change what [`filter_tests`] selects,
/// i.e. the fleet version has to be looked up.
pub fn needs_version(registry: &Registry, pattern: &Pattern, platform: Platform, arch: &str) -> bool {
    let candidates = filter_tests(registry, pattern, platform, arch, &Version::new(0, 0, 0));
    match candidates.as_slice() {
        [] => false,
        [only] => only.name != pattern.as_str(),
        _ => true,
    }
}

fn allows_platform(def: &TestDefinition, platform: Platform) -> bool {
    def.platforms.is_empty() || def.platforms.contains(&platform)
}

fn allows_arch(def: &TestDefinition, arch: &str) -> bool {
    def.architectures.is_empty() || def.architectures.contains(arch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[rstest]
    #[case("1.2.0", "1.0.0", None, false)]
    #[case("0.9.0", "1.0.0", None, true)]
    #[case("1.0.0", "1.0.0", None, false)]
    #[case("2.0.0", "1.0.0", Some("2.0.0"), true)]
    #[case("1.9.9", "1.0.0", Some("2.0.0"), false)]
    #[case("5.0.0", "0.0.0", Some("0.0.0"), false)]
    #[case("0.0.1", "0.0.0", None, false)]
    fn test_version_outside_range(
        #[case] version: &str,
        #[case] min: &str,
        #[case] end: Option<&str>,
        #[case] outside: bool,
    ) {
        let end = end.map(v);
        assert_eq!(version_outside_range(&v(version), &v(min), end.as_ref()), outside);
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        for def in [
            TestDefinition::new("a.b", |_c| async { Ok(()) }),
            TestDefinition::new("a.c", |_c| async { Ok(()) })
                .cluster_size(1)
                .platforms([Platform::Qemu]),
            TestDefinition::new("x.y.z", |_c| async { Ok(()) })
                .platforms([Platform::Qemu])
                .min_version(v("1.0.0")),
            TestDefinition::new("arm.only", |_c| async { Ok(()) }).architectures(["arm64"]),
        ] {
            registry.register(def).unwrap();
        }
        registry
    }

    fn names(defs: Vec<&TestDefinition>) -> Vec<&str> {
        defs.into_iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_glob_and_platform() {
        let registry = registry();
        let zero = Version::new(0, 0, 0);
        let pattern = Pattern::new("a.*").unwrap();

        let qemu = filter_tests(&registry, &pattern, Platform::Qemu, "amd64", &zero);
        assert_eq!(names(qemu), vec!["a.b", "a.c"]);

        // An empty platform set is unrestricted, so a.b still runs on aws.
        let aws = filter_tests(&registry, &pattern, Platform::Aws, "amd64", &zero);
        assert_eq!(names(aws), vec!["a.b"]);
    }

    #[test]
    fn test_version_bounds() {
        let registry = registry();
        let pattern = Pattern::new("*").unwrap();

        let new = filter_tests(&registry, &pattern, Platform::Qemu, "amd64", &v("1.2.0"));
        assert!(names(new).contains(&"x.y.z"));

        let old = filter_tests(&registry, &pattern, Platform::Qemu, "amd64", &v("0.9.0"));
        assert!(!names(old).contains(&"x.y.z"));
    }

    #[test]
    fn test_exact_name_bypasses_version() {
        let registry = registry();
        let pattern = Pattern::new("x.y.z").unwrap();
        let selected = filter_tests(&registry, &pattern, Platform::Qemu, "amd64", &v("0.9.0"));
        assert_eq!(names(selected), vec!["x.y.z"]);
    }

    #[test]
    fn test_architecture() {
        let registry = registry();
        let pattern = Pattern::new("arm.*").unwrap();
        let zero = Version::new(0, 0, 0);

        assert!(filter_tests(&registry, &pattern, Platform::Qemu, "amd64", &zero).is_empty());
        assert_eq!(
            names(filter_tests(&registry, &pattern, Platform::Qemu, "arm64", &zero)),
            vec!["arm.only"]
        );
    }

    #[rstest]
    #[case("nothing.*", false)]
    #[case("x.y.z", false)]
    #[case("x.y.*", true)]
    #[case("*", true)]
    fn test_needs_version(#[case] pattern: &str, #[case] needed: bool) {
        let registry = registry();
        let pattern = Pattern::new(pattern).unwrap();
        assert_eq!(needs_version(&registry, &pattern, Platform::Qemu, "amd64"), needed);
    }
}
