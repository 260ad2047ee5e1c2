//! Error types for platform backends.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::Platform;

/// Platform and backend errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform identifier is not one of the supported ones.
    #[error("invalid platform {0:?}")]
    UnknownPlatform(String),

    /// No backend was configured for a supported platform.
    #[error("no backend configured for platform {0}")]
    NoBackend(Platform),

    /// A file that must be a regular file is something else.
    #[error("{}: not a regular file", path.display())]
    NotRegularFile { path: PathBuf },

    /// A backend hook ran past its deadline.
    #[error("command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    /// A backend hook exited unsuccessfully.
    #[error("command failed ({status}): {command}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// A create hook printed something other than `<id> <address>`.
    #[error("unexpected create output: {0:?}")]
    BadCreateOutput(String),

    /// The cluster has no discovery hook.
    #[error("discovery is not configured for this platform")]
    NoDiscovery,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
