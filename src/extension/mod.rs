//! Explicit extension registration.
//!
//! Components that must follow the kernel lifecycle register an
//! [`Extension`] under a stable key. The kernel initializes and starts them
//! in registration order, and stops and shuts them down in reverse.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::kernel::KernelOptions;
use crate::types::{Error, Result};

/// View of the kernel handed to lifecycle hooks.
#[derive(Clone, Copy, Debug)]
pub struct ExtensionContext<'a> {
    options: &'a KernelOptions,
}

impl<'a> ExtensionContext<'a> {
    pub(crate) fn new(options: &'a KernelOptions) -> Self {
        Self { options }
    }

    /// Options the kernel was built with.
    pub fn options(&self) -> &'a KernelOptions {
        self.options
    }
}

/// Component bound to the kernel lifecycle.
///
/// Every hook defaults to a no-op.
pub trait Extension: Send + Sync {
    /// Stable registry key; two extensions are the same iff their keys are.
    fn key(&self) -> &str;

    /// Prepares internal state. Runs before any extension is started.
    fn init(&self, _ctx: &ExtensionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Begins serving.
    fn start(&self, _ctx: &ExtensionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Stops serving. Runs before any extension is shut down.
    fn stop(&self, _ctx: &ExtensionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Releases internal state.
    fn shutdown(&self, _ctx: &ExtensionContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Ordered table of extensions keyed by [`Extension::key`].
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    entries: Vec<Arc<dyn Extension>>,
    by_key: FxHashMap<String, usize>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `extension`, rejecting a key that is already registered.
    pub fn register(&mut self, extension: Arc<dyn Extension>) -> Result<()> {
        let key = extension.key().to_owned();
        if self.by_key.contains_key(&key) {
            return Err(Error::Invalid("extension key already registered"));
        }
        self.by_key.insert(key, self.entries.len());
        self.entries.push(extension);
        Ok(())
    }

    /// Looks up an extension by key.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Extension>> {
        self.by_key
            .get(key)
            .map(|&idx| Arc::clone(&self.entries[idx]))
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|ext| ext.key())
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `init` then `start` on every extension in registration order.
    ///
    /// When a hook fails, the extensions already initialized are shut down in
    /// reverse order and the failure is returned.
    pub(crate) fn start_all(&self, ctx: &ExtensionContext<'_>) -> Result<()> {
        for (idx, ext) in self.entries.iter().enumerate() {
            if let Err(err) = ext.init(ctx) {
                warn!(extension = ext.key(), error = %err, "extension.init_failed");
                self.unwind(&self.entries[..idx], ctx, false);
                return Err(err);
            }
        }
        for (idx, ext) in self.entries.iter().enumerate() {
            if let Err(err) = ext.start(ctx) {
                warn!(extension = ext.key(), error = %err, "extension.start_failed");
                self.unwind(&self.entries[..idx], ctx, true);
                self.unwind(&self.entries[idx..], ctx, false);
                return Err(err);
            }
            info!(extension = ext.key(), "extension.started");
        }
        Ok(())
    }

    /// Runs `stop` then `shutdown` on every extension in reverse order.
    ///
    /// Every hook runs even if an earlier one fails; the first failure is
    /// returned.
    pub(crate) fn stop_all(&self, ctx: &ExtensionContext<'_>) -> Result<()> {
        let mut first_err = None;
        for ext in self.entries.iter().rev() {
            if let Err(err) = ext.stop(ctx) {
                warn!(extension = ext.key(), error = %err, "extension.stop_failed");
                first_err.get_or_insert(err);
            }
        }
        for ext in self.entries.iter().rev() {
            if let Err(err) = ext.shutdown(ctx) {
                warn!(extension = ext.key(), error = %err, "extension.shutdown_failed");
                first_err.get_or_insert(err);
            }
            info!(extension = ext.key(), "extension.shutdown");
        }
        first_err.map_or(Ok(()), Err)
    }

    fn unwind(&self, entries: &[Arc<dyn Extension>], ctx: &ExtensionContext<'_>, stop: bool) {
        for ext in entries.iter().rev() {
            let result = if stop { ext.stop(ctx) } else { Ok(()) };
            if let Err(err) = result.and_then(|()| ext.shutdown(ctx)) {
                warn!(extension = ext.key(), error = %err, "extension.unwind_failed");
            }
        }
    }
}
