//! Built-in test catalog.

pub mod filesystem;
pub mod hostname;
pub mod local;
pub mod os_release;
pub mod ssh;

use crate::error::RegistryError;
use crate::register::Registry;

pub use local::LocalChecks;

/// Catalog of every built-in test.
pub fn builtin_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    filesystem::register(&mut registry)?;
    hostname::register(&mut registry)?;
    os_release::register(&mut registry)?;
    ssh::register(&mut registry)?;
    Ok(registry)
}
