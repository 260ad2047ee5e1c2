//! Platform identifiers and backend selection.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::cluster::ClusterFactory;
use crate::error::PlatformError;

/// Supported target platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Local virtualization.
    Qemu,
    /// Google Compute Engine.
    Gce,
    /// Amazon EC2.
    Aws,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Qemu, Platform::Gce, Platform::Aws];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Qemu => "qemu",
            Platform::Gce => "gce",
            Platform::Aws => "aws",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PlatformError::UnknownPlatform(s.to_string()))
    }
}

/// Cluster constructors keyed by platform.
#[derive(Clone, Default)]
pub struct Backends {
    factories: HashMap<Platform, Arc<dyn ClusterFactory>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for a platform.
    pub fn insert(&mut self, platform: Platform, factory: Arc<dyn ClusterFactory>) {
        self.factories.insert(platform, factory);
    }

    /// Constructor for `platform`, or `NoBackend`.
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn ClusterFactory>, PlatformError> {
        self.factories
            .get(&platform)
            .cloned()
            .ok_or(PlatformError::NoBackend(platform))
    }

    /// Configured platforms, sorted.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.factories.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("qemu", Platform::Qemu)]
    #[case("gce", Platform::Gce)]
    #[case("aws", Platform::Aws)]
    fn test_parse_platform(#[case] raw: &str, #[case] expected: Platform) {
        assert_eq!(raw.parse::<Platform>().unwrap(), expected);
        assert_eq!(expected.to_string(), raw);
    }

    #[rstest]
    #[case("")]
    #[case("QEMU")]
    #[case("azure")]
    fn test_unknown_platform(#[case] raw: &str) {
        let err = raw.parse::<Platform>().unwrap_err();
        assert!(matches!(err, PlatformError::UnknownPlatform(s) if s == raw));
    }

    #[test]
    fn test_missing_backend() {
        let backends = Backends::new();
        let err = backends.get(Platform::Aws).err().unwrap();
        assert!(matches!(err, PlatformError::NoBackend(Platform::Aws)));
    }
}
