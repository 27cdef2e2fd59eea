//! Index definitions and the metadata service that reports their state.

#![forbid(unsafe_code)]

mod catalog;
mod descriptor;

pub use catalog::SchemaCatalog;
pub use descriptor::{IndexCapability, IndexDescriptor, IndexPrototype, SchemaDescriptor};

use crate::types::{IndexId, Result};

/// Population state of an index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IndexState {
    /// Still being built; not usable for seeks.
    Populating,
    /// Fully built and maintained.
    Online,
    /// Population failed; see [`IndexMetadata::index_failure`].
    Failed,
}

/// Read access to index metadata.
///
/// Lookups for a descriptor that no longer exists fail with
/// [`crate::types::IndexUnavailable::NotFound`].
pub trait IndexMetadata: Send + Sync {
    /// Current population state of `index`.
    fn index_state(&self, index: &IndexDescriptor) -> Result<IndexState>;

    /// Failure description of `index`; empty unless the index failed.
    fn index_failure(&self, index: &IndexDescriptor) -> Result<String>;

    /// Looks up an index by name.
    fn index_by_name(&self, name: &str) -> Option<IndexDescriptor>;

    /// Looks up an index by id.
    fn index_by_id(&self, id: IndexId) -> Option<IndexDescriptor>;
}
