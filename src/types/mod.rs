//! Identifiers, property values and the crate-wide error type.

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

mod value;

pub use value::{encode_value_key, Value};

/// Node identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);
/// Relationship identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeId(pub u64);
/// Node label token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);
/// Relationship type token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeId(pub u32);
/// Property key token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropId(pub u32);
/// Index identifier assigned by the schema catalog.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct IndexId(pub u32);
/// Transaction identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxId(pub u64);

/// Kind of entity an index or cursor ranges over.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EntityType {
    /// Nodes, keyed by label tokens.
    Node,
    /// Relationships, keyed by relationship type tokens.
    Relationship,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Node => f.write_str("node"),
            EntityType::Relationship => f.write_str("relationship"),
        }
    }
}

/// Entity reference stored in value indexes, tagged with its entity type.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum EntityId {
    /// A node.
    Node(NodeId),
    /// A relationship.
    Relationship(EdgeId),
}

impl EntityId {
    /// Returns the entity type of this reference.
    pub fn entity_type(self) -> EntityType {
        match self {
            EntityId::Node(_) => EntityType::Node,
            EntityId::Relationship(_) => EntityType::Relationship,
        }
    }

    /// Returns the raw 64-bit reference.
    pub fn raw(self) -> u64 {
        match self {
            EntityId::Node(id) => id.0,
            EntityId::Relationship(id) => id.0,
        }
    }
}

impl From<NodeId> for EntityId {
    fn from(value: NodeId) -> Self {
        EntityId::Node(value)
    }
}

impl From<EdgeId> for EntityId {
    fn from(value: EdgeId) -> Self {
        EntityId::Relationship(value)
    }
}

/// Reasons an index cannot serve a seek.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUnavailable {
    /// The descriptor no longer names an index in the catalog.
    NotFound {
        /// Index name from the stale descriptor.
        index: String,
    },
    /// The index failed to populate.
    Broken {
        /// Index name.
        index: String,
        /// Failure description recorded when population failed.
        cause: String,
    },
    /// The index exists but is still populating.
    NotOnline {
        /// Index name.
        index: String,
    },
}

impl fmt::Display for IndexUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexUnavailable::NotFound { index } => write!(f, "index '{index}' not found"),
            IndexUnavailable::Broken { index, cause } => {
                write!(f, "index '{index}' is broken: {cause}")
            }
            IndexUnavailable::NotOnline { index } => write!(f, "index '{index}' is not online"),
        }
    }
}

/// Lock mode requested or held on a resource.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum LockMode {
    /// Multiple holders allowed.
    Shared,
    /// Single holder.
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => f.write_str("shared"),
            LockMode::Exclusive => f.write_str("exclusive"),
        }
    }
}

/// Errors surfaced by the kernel read layer, lock manager and index store.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO failure, e.g. while loading configuration.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The index is missing, broken or not yet online.
    #[error("index unavailable: {0}")]
    IndexUnavailable(IndexUnavailable),
    /// Lookup predicates disagree with the index schema.
    #[error("predicate mismatch: {0}")]
    PredicateSchemaMismatch(String),
    /// The index shape cannot enforce uniqueness (e.g. multi-token schema).
    #[error("unsupported index shape: {0}")]
    UnsupportedIndexShape(String),
    /// The index does not apply to the requested entity type.
    #[error("index not applicable: {0}")]
    IndexNotApplicable(String),
    /// The index lacks a capability the caller asked for.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A lock could not be acquired within the configured timeout.
    #[error("timed out after {waited:?} acquiring {mode} lock on {resource}")]
    LockTimeout {
        /// Rendered resource identifier.
        resource: String,
        /// Requested mode.
        mode: LockMode,
        /// Time spent waiting.
        waited: Duration,
    },
    /// Waiting for the lock would close a cycle in the wait-for graph.
    #[error("deadlock detected: {tx:?} waiting for {mode} lock on {resource}")]
    Deadlock {
        /// Rendered resource identifier.
        resource: String,
        /// Requested mode.
        mode: LockMode,
        /// Transaction that was chosen to fail.
        tx: TxId,
    },
    /// A unique index already maps the key to a different entity.
    #[error("index '{index}' already contains {existing:?} for the given key")]
    UniquenessViolation {
        /// Index name.
        index: String,
        /// Entity already owning the key.
        existing: EntityId,
    },
    /// The transaction was terminated and cannot serve further operations.
    #[error("transaction {0:?} has been terminated")]
    TransactionTerminated(TxId),
    /// Invalid argument or state.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be parsed or applied.
    #[error("configuration: {0}")]
    Config(String),
}

impl From<IndexUnavailable> for Error {
    fn from(value: IndexUnavailable) -> Self {
        Error::IndexUnavailable(value)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<LabelId> for u32 {
    fn from(value: LabelId) -> Self {
        value.0
    }
}

impl From<u32> for TypeId {
    fn from(value: u32) -> Self {
        TypeId(value)
    }
}

impl From<TypeId> for u32 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

impl From<u32> for PropId {
    fn from(value: u32) -> Self {
        PropId(value)
    }
}

impl From<PropId> for u32 {
    fn from(value: PropId) -> Self {
        value.0
    }
}
