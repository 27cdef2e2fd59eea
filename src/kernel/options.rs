use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::locking::LockOptions;
use crate::types::{Error, Result};

/// Configuration supplied when constructing a [`super::Kernel`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelOptions {
    /// Name attached to kernel log events.
    pub name: String,
    /// Lock acquisition policy.
    pub locks: LockOptions,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            name: "kernel".to_owned(),
            locks: LockOptions::default(),
        }
    }
}

impl KernelOptions {
    /// Sets the kernel name used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the lock policy.
    pub fn locks(mut self, locks: LockOptions) -> Self {
        self.locks = locks;
        self
    }

    /// Sets the lock acquisition timeout; `None` waits indefinitely.
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.locks.acquire_timeout = timeout;
        self
    }

    /// Parses options from a TOML document.
    ///
    /// ```toml
    /// name = "orders"
    ///
    /// [locks]
    /// acquire_timeout_ms = 2500
    /// deadlock_detection = true
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| Error::Config(err.to_string()))
    }

    /// Reads and parses options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    /// Renders the options as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| Error::Config(err.to_string()))
    }
}
