use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::types::{Error, IndexId, IndexUnavailable, Result};

use super::descriptor::{IndexDescriptor, IndexPrototype};
use super::{IndexMetadata, IndexState};

struct CatalogEntry {
    descriptor: IndexDescriptor,
    state: IndexState,
    failure: Option<String>,
}

#[derive(Default)]
struct CatalogInner {
    next_id: u32,
    entries: FxHashMap<IndexId, CatalogEntry>,
    by_name: FxHashMap<String, IndexId>,
}

/// In-memory catalog of index definitions and their population state.
#[derive(Default)]
pub struct SchemaCatalog {
    inner: RwLock<CatalogInner>,
}

impl SchemaCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new index in the `Populating` state.
    pub fn create_index(&self, prototype: IndexPrototype) -> Result<IndexDescriptor> {
        if prototype.schema.property_ids().is_empty() {
            return Err(Error::Invalid("index schema must cover at least one property"));
        }
        if prototype.schema.entity_token_ids().is_empty() {
            return Err(Error::Invalid("index schema must name at least one entity token"));
        }
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&prototype.name) {
            return Err(Error::Invalid("index name already in use"));
        }
        inner.next_id += 1;
        let id = IndexId(inner.next_id);
        let descriptor = prototype.materialize(id);
        inner.by_name.insert(descriptor.name().to_owned(), id);
        inner.entries.insert(
            id,
            CatalogEntry {
                descriptor: descriptor.clone(),
                state: IndexState::Populating,
                failure: None,
            },
        );
        info!(index = %descriptor, "schema.index.created");
        Ok(descriptor)
    }

    /// Marks a populating index as online.
    pub fn mark_online(&self, id: IndexId) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(Error::Invalid("unknown index id"))?;
        if entry.state == IndexState::Failed {
            return Err(Error::Invalid("failed index cannot be brought online"));
        }
        entry.state = IndexState::Online;
        debug!(index = id.0, "schema.index.online");
        Ok(())
    }

    /// Marks an index as failed, recording `cause` as its failure description.
    pub fn mark_failed(&self, id: IndexId, cause: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(Error::Invalid("unknown index id"))?;
        let cause = cause.into();
        warn!(index = id.0, %cause, "schema.index.failed");
        entry.state = IndexState::Failed;
        entry.failure = Some(cause);
        Ok(())
    }

    /// Removes the index. Returns `false` when it was already gone.
    pub fn drop_index(&self, id: IndexId) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.remove(&id) else {
            return false;
        };
        inner.by_name.remove(entry.descriptor.name());
        info!(index = id.0, "schema.index.dropped");
        true
    }

    /// Returns every registered index ordered by id.
    pub fn all_indexes(&self) -> Vec<IndexDescriptor> {
        let inner = self.inner.read();
        let mut all: Vec<_> = inner
            .entries
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect();
        all.sort_by_key(|desc| desc.id());
        all
    }

    fn with_entry<T>(
        &self,
        index: &IndexDescriptor,
        f: impl FnOnce(&CatalogEntry) -> T,
    ) -> Result<T> {
        let inner = self.inner.read();
        match inner.entries.get(&index.id()) {
            Some(entry) if entry.descriptor == *index => Ok(f(entry)),
            _ => Err(IndexUnavailable::NotFound {
                index: index.name().to_owned(),
            }
            .into()),
        }
    }
}

impl IndexMetadata for SchemaCatalog {
    fn index_state(&self, index: &IndexDescriptor) -> Result<IndexState> {
        self.with_entry(index, |entry| entry.state)
    }

    fn index_failure(&self, index: &IndexDescriptor) -> Result<String> {
        self.with_entry(index, |entry| entry.failure.clone().unwrap_or_default())
    }

    fn index_by_name(&self, name: &str) -> Option<IndexDescriptor> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?;
        inner.entries.get(id).map(|entry| entry.descriptor.clone())
    }

    fn index_by_id(&self, id: IndexId) -> Option<IndexDescriptor> {
        self.inner
            .read()
            .entries
            .get(&id)
            .map(|entry| entry.descriptor.clone())
    }
}
