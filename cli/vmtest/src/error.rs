//! Error types for the test catalog and the orchestration driver.

use std::path::PathBuf;

use plfm_harness::{Abort, HarnessError, H};
use plfm_platform::PlatformError;
use thiserror::Error;

/// Invalid test declarations. Always a start-up abort.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A test was declared without a name.
    #[error("test name must not be empty")]
    EmptyName,

    /// The name cannot be used as a directory or command argument.
    #[error("invalid test name {0:?}: must not contain '/' or whitespace")]
    InvalidName(String),

    /// Two tests share a name.
    #[error("test {0:?} already registered")]
    Duplicate(String),

    /// The test needs machines but declares a cluster size of zero.
    #[error("test {name:?} has cluster size 0 but {reason}")]
    InvalidClusterSize { name: String, reason: &'static str },
}

/// Setup-phase failures of a run, and the aggregate test failure.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The output directory cannot be wiped and recreated.
    #[error("invalid output directory {0:?}")]
    BadOutputDir(PathBuf),

    /// Platform selection or backend failure.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The fleet version was needed but could not be read.
    #[error("unable to determine fleet version: {0:#}")]
    Version(anyhow::Error),

    /// The companion binary is not on disk.
    #[error("{binary} for {arch} not found (searched {searched:?})")]
    NativeBinaryNotFound {
        binary: &'static str,
        arch: String,
        searched: Vec<PathBuf>,
    },

    /// A `--test-option` is not `key=value`.
    #[error("invalid test option {0:?}, expected key=value")]
    BadOption(String),

    /// A `--test-option` key was given twice.
    #[error("test option {0:?} given more than once")]
    DuplicateOption(String),

    /// Scheduling failure, or tests failed.
    #[error(transparent)]
    Harness(#[from] HarnessError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Returns true if the run completed and some tests failed, as opposed
    /// to a setup-phase error.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, Self::Harness(err) if err.is_test_failure())
    }
}

/// "Not applicable here". A check returning this ends skipped, not failed.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SkipError(pub String);

impl SkipError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Returns true if `err` (or anything in its chain) is a [`SkipError`].
pub fn is_skip(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<SkipError>())
}

/// Record a failed step on `h`: a skip skips the unit, anything else is
/// fatal.
pub fn check<T>(h: &H, result: anyhow::Result<T>) -> Result<T, Abort> {
    result.map_err(|err| {
        if is_skip(&err) {
            h.skip(err)
        } else {
            h.fatal(format!("{err:#}"))
        }
    })
}
