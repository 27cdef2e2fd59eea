use std::fmt;
use std::marker::PhantomData;

use crate::schema::IndexDescriptor;
use crate::types::{EdgeId, EntityId, EntityType, IndexId, NodeId, Value};

/// Index entry handed from a reader to a seek client.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexHit {
    /// Matching entity.
    pub entity: EntityId,
    /// Stored key values; empty unless values were requested.
    pub values: Vec<Value>,
}

/// Capability a reader needs to position a cursor.
pub trait IndexSeekClient {
    /// Entity type the client accepts.
    fn entity_type(&self) -> EntityType;

    /// Replaces the client's contents with `hits` and rewinds it.
    fn initialize(
        &mut self,
        index: &IndexDescriptor,
        hits: &mut dyn Iterator<Item = IndexHit>,
        needs_values: bool,
    );
}

/// Entity kind a typed cursor ranges over.
pub trait EntityKind {
    /// Typed reference returned by the cursor.
    type Id: Copy + Eq + fmt::Debug;

    /// Entity type tag.
    const ENTITY_TYPE: EntityType;

    /// Narrows a tagged reference, `None` when it is of another kind.
    fn narrow(entity: EntityId) -> Option<Self::Id>;
}

/// Marker for node cursors.
#[derive(Debug)]
pub enum Node {}

/// Marker for relationship cursors.
#[derive(Debug)]
pub enum Relationship {}

impl EntityKind for Node {
    type Id = NodeId;
    const ENTITY_TYPE: EntityType = EntityType::Node;

    fn narrow(entity: EntityId) -> Option<NodeId> {
        match entity {
            EntityId::Node(id) => Some(id),
            EntityId::Relationship(_) => None,
        }
    }
}

impl EntityKind for Relationship {
    type Id = EdgeId;
    const ENTITY_TYPE: EntityType = EntityType::Relationship;

    fn narrow(entity: EntityId) -> Option<EdgeId> {
        match entity {
            EntityId::Relationship(id) => Some(id),
            EntityId::Node(_) => None,
        }
    }
}

/// Reusable cursor over value index results.
///
/// Seeks reposition the cursor in place; buffers are kept between seeks.
pub struct ValueIndexCursor<K: EntityKind> {
    index: Option<IndexId>,
    refs: Vec<K::Id>,
    values: Vec<Vec<Value>>,
    needs_values: bool,
    // Index of the current row plus one; zero before the first `next`.
    pos: usize,
    _kind: PhantomData<K>,
}

/// Cursor over node index results.
pub type NodeValueIndexCursor = ValueIndexCursor<Node>;
/// Cursor over relationship index results.
pub type RelationshipValueIndexCursor = ValueIndexCursor<Relationship>;

impl<K: EntityKind> Default for ValueIndexCursor<K> {
    fn default() -> Self {
        Self {
            index: None,
            refs: Vec::new(),
            values: Vec::new(),
            needs_values: false,
            pos: 0,
            _kind: PhantomData,
        }
    }
}

impl<K: EntityKind> fmt::Debug for ValueIndexCursor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueIndexCursor")
            .field("index", &self.index)
            .field("len", &self.refs.len())
            .field("pos", &self.pos)
            .finish()
    }
}

impl<K: EntityKind> ValueIndexCursor<K> {
    /// Creates an unpositioned cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances to the next entry, returning `false` when exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.pos < self.refs.len() {
            self.pos += 1;
            true
        } else {
            self.pos = self.refs.len() + 1;
            false
        }
    }

    /// Reference at the current position.
    pub fn reference(&self) -> Option<K::Id> {
        self.pos
            .checked_sub(1)
            .and_then(|idx| self.refs.get(idx))
            .copied()
    }

    /// Stored key values at the current position, if they were requested.
    pub fn values(&self) -> Option<&[Value]> {
        if !self.needs_values {
            return None;
        }
        self.pos
            .checked_sub(1)
            .and_then(|idx| self.values.get(idx))
            .map(Vec::as_slice)
    }

    /// Index the cursor was last positioned on.
    pub fn index(&self) -> Option<IndexId> {
        self.index
    }

    /// Number of entries from the last seek.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Whether the last seek produced no entries.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Releases the current position; buffers stay allocated for reuse.
    pub fn close(&mut self) {
        self.index = None;
        self.refs.clear();
        self.values.clear();
        self.needs_values = false;
        self.pos = 0;
    }
}

impl<K: EntityKind> IndexSeekClient for ValueIndexCursor<K> {
    fn entity_type(&self) -> EntityType {
        K::ENTITY_TYPE
    }

    fn initialize(
        &mut self,
        index: &IndexDescriptor,
        hits: &mut dyn Iterator<Item = IndexHit>,
        needs_values: bool,
    ) {
        self.close();
        self.index = Some(index.id());
        self.needs_values = needs_values;
        for hit in hits {
            let Some(id) = K::narrow(hit.entity) else {
                continue;
            };
            self.refs.push(id);
            if needs_values {
                self.values.push(hit.values);
            }
        }
    }
}
