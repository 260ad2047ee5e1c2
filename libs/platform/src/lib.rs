//! plfm-vt Fleet Platforms
//!
//! Capabilities the test driver needs from a fleet of ephemeral machines,
//! and the backends that provide them.
//!
//! - [`Cluster`] / [`Machine`]: create, command, copy, destroy
//! - [`Platform`] / [`Backends`]: closed set of targets and their constructors
//! - [`mock`]: in-memory backend for tests
//! - [`command`]: shell-hook backend for real fleets

pub mod backend;
pub mod cluster;
pub mod command;
pub mod error;
pub mod fs;
pub mod mock;

pub use backend::{Backends, Platform};
pub use cluster::{new_machines, Cluster, ClusterFactory, Machine};
pub use command::{CommandConfig, CommandFactory};
pub use error::PlatformError;
pub use fs::copy_regular_file;
pub use mock::{MockBehavior, MockCluster, MockFactory, MockMachine};
