use std::fmt;

use xxhash_rust::xxh64::xxh64;

use crate::index::ExactPredicate;
use crate::types::{encode_value_key, Result};

/// Kind of lockable resource.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[non_exhaustive]
pub enum ResourceType {
    /// Logical unique-index entry, keyed by [`index_entry_resource_id`].
    IndexEntry,
}

/// Lockable resource: a kind plus a 64-bit key.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ResourceId {
    /// Resource kind.
    pub kind: ResourceType,
    /// Key within the kind.
    pub id: u64,
}

impl ResourceId {
    /// Index entry resource with the given key.
    pub fn index_entry(id: u64) -> Self {
        Self {
            kind: ResourceType::IndexEntry,
            id,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResourceType::IndexEntry => write!(f, "IndexEntry({:#018x})", self.id),
        }
    }
}

/// Derives the lock key of a logical unique-index entry.
///
/// The key depends only on the entity token and the `(property, value)`
/// pairs in order, so every transaction computes the same key for the same
/// logical row whether or not it exists yet.
pub fn index_entry_resource_id(entity_token: u32, predicates: &[ExactPredicate]) -> Result<u64> {
    let mut buf = Vec::with_capacity(4 + predicates.len() * 16);
    buf.extend_from_slice(&entity_token.to_be_bytes());
    for pred in predicates {
        buf.extend_from_slice(&pred.prop_id().0.to_be_bytes());
        encode_value_key(pred.value(), &mut buf)?;
    }
    Ok(xxh64(&buf, 0))
}
