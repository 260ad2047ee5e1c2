//! plfm-vt VM Test Driver
//!
//! Selects tests from a catalog, provisions a short-lived cluster for each
//! and runs them through the plfm harness with bounded concurrency.
//!
//! - [`register`]: test definitions and the [`Registry`] holding them
//! - [`filter`]: platform, architecture and version selection
//! - [`driver`]: one run, from output directory to `PASS`/`FAIL`
//! - [`signal`]: cluster teardown on SIGINT/SIGTERM
//! - [`single_node`]: one machine shared by a group of checks
//! - [`checks`]: the built-in catalog

pub mod checks;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod logging;
pub mod options;
pub mod register;
pub mod signal;
pub mod single_node;

pub use cluster::TestCluster;
pub use config::Config;
pub use driver::{Driver, DriverOptions};
pub use error::{DriverError, RegistryError, SkipError};
pub use options::TestOptions;
pub use register::{Registry, TestDefinition};
pub use signal::{LiveClusters, SignalGuard};
pub use single_node::SingleNode;
