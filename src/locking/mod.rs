//! Index entry locks.
//!
//! Unique-index seeks serialize on a *logical* entry, identified by a hash of
//! the entity token and the looked-up `(property, value)` pairs. The entry
//! may not exist yet; holding its exclusive lock is what keeps a concurrent
//! transaction from creating it.

#![forbid(unsafe_code)]

mod manager;
mod options;
mod resource;

pub use manager::{LockClient, LockManager, LockSnapshot};
pub use options::LockOptions;
pub use resource::{index_entry_resource_id, ResourceId, ResourceType};

use crate::types::Result;

/// Lock operations a transaction performs on index entries.
///
/// Acquisitions block until granted and fail with
/// [`crate::types::Error::LockTimeout`] or [`crate::types::Error::Deadlock`]
/// when they cannot be. Releasing a lock not held is an error.
pub trait Locks: Send + Sync {
    /// Takes a shared lock on the index entry `key`.
    fn acquire_shared_index_entry_lock(&self, key: u64) -> Result<()>;
    /// Releases one shared hold on `key`.
    fn release_shared_index_entry_lock(&self, key: u64) -> Result<()>;
    /// Takes an exclusive lock on the index entry `key`.
    fn acquire_exclusive_index_entry_lock(&self, key: u64) -> Result<()>;
    /// Releases one exclusive hold on `key`.
    fn release_exclusive_index_entry_lock(&self, key: u64) -> Result<()>;
}
