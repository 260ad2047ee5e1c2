//! Free-form options handed to test bodies.
//!
//! Built once at start-up from `--test-option key=value` flags and shared
//! read-only afterwards.

use std::collections::BTreeMap;

use crate::error::DriverError;

/// Frozen key/value options visible to every test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestOptions {
    values: BTreeMap<String, String>,
}

impl TestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` pairs. A repeated key is an error.
    pub fn parse<I, S>(pairs: I) -> Result<Self, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| DriverError::BadOption(pair.to_string()))?;
            options = options.with(key.trim(), value)?;
        }
        Ok(options)
    }

    /// Add one option. A repeated key is an error.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self, DriverError> {
        let key = key.into();
        if self.values.contains_key(&key) {
            return Err(DriverError::DuplicateOption(key));
        }
        self.values.insert(key, value.into());
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
