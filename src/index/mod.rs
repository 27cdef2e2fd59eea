//! Value index queries, cursors, readers and the in-memory index store.

#![forbid(unsafe_code)]

mod cursor;
mod memory;
mod query;
mod reader;

pub use cursor::{
    EntityKind, IndexHit, IndexSeekClient, Node, NodeValueIndexCursor, Relationship,
    RelationshipValueIndexCursor, ValueIndexCursor,
};
pub use memory::{IndexStoreStats, IndexUpdate, MemoryIndexStore};
pub use query::{
    validate_query_shape, ExactPredicate, IndexOrder, IndexQueryConstraints, PropertyIndexQuery,
};
pub use reader::{IndexReaderFactory, ValueIndexReader};
