//! Error types for the test harness.

use thiserror::Error;

/// Errors raised by the harness itself (never by test outcomes alone,
/// except for the aggregate [`HarnessError::TestsFailed`]).
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The name pattern could not be parsed.
    #[error("bad pattern {pattern:?}: {reason}")]
    BadPattern {
        pattern: String,
        reason: &'static str,
    },

    /// Two standalone tests were added under the same name.
    #[error("duplicate test name: {0}")]
    DuplicateTest(String),

    /// A named group member does not exist.
    #[error("unknown test: {0}")]
    UnknownTest(String),

    /// At least one test ended failed.
    #[error("{failed} test(s) failed")]
    TestsFailed { failed: usize },

    /// The concurrency gate was closed while dispatching.
    #[error("concurrency gate closed")]
    GateClosed,

    /// Writing the results report failed.
    #[error("writing report: {0}")]
    Report(#[from] std::io::Error),
}

impl HarnessError {
    /// Returns true if this error only reports failed tests.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, HarnessError::TestsFailed { .. })
    }
}
