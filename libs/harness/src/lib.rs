//! plfm-vt Test Harness
//!
//! Runs expensive integration tests (minutes each, talking to remote
//! machines) with a bounded number of them in flight at once.
//!
//! ## Concepts
//!
//! - [`H`]: per-unit execution context (log, verdict, parallel hint)
//! - Standalone tests: a single async body added with [`Tests::add`]
//! - [`Group`]: one `prepare`, N members, one `cleanup`, sharing state
//! - [`Suite`]: dispatches units under a semaphore and tallies verdicts
//!
//! Test bodies return [`TestResult`]; `h.fatal(..)` and `h.skip(..)` hand
//! back an [`Abort`] which the body returns to stop early. Panics are
//! caught at the unit boundary and recorded as failures.

pub mod error;
pub mod group;
pub mod h;
pub mod pattern;
pub mod suite;
pub mod tap;
pub mod unit;

pub use error::HarnessError;
pub use group::{has_identifier_prefix, list_group, run_group_member, Group, GroupTest};
pub use h::{catch_panic, Abort, BoxFuture, ResultExt, Status, TestFuture, TestResult, H};
pub use pattern::Pattern;
pub use suite::{Counts, Options, Suite, TestReport};
pub use unit::{TestFn, Tests};
