use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::index::{
    EntityKind, ExactPredicate, IndexOrder, IndexQueryConstraints, IndexReaderFactory, Node,
    NodeValueIndexCursor, PropertyIndexQuery, Relationship, RelationshipValueIndexCursor,
    ValueIndexCursor, ValueIndexReader,
};
use crate::locking::{index_entry_resource_id, Locks};
use crate::schema::{IndexDescriptor, IndexMetadata, IndexState};
use crate::types::{EdgeId, EntityType, Error, IndexUnavailable, NodeId, Result, TxId};

/// Index reader bound to one index for the lifetime of the session.
///
/// The reader is created when the session opens, so every query through the
/// session observes the index as it was at that point.
pub struct IndexReadSession {
    descriptor: IndexDescriptor,
    reader: Box<dyn ValueIndexReader>,
}

impl IndexReadSession {
    /// Index the session reads.
    pub fn reference(&self) -> &IndexDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for IndexReadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexReadSession")
            .field("index", &self.descriptor.id())
            .finish()
    }
}

/// Index reads performed on behalf of one transaction.
pub struct Read {
    tx: TxId,
    metadata: Arc<dyn IndexMetadata>,
    readers: Arc<dyn IndexReaderFactory>,
    locks: Arc<dyn Locks>,
    terminated: Arc<AtomicBool>,
}

impl fmt::Debug for Read {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Read")
            .field("tx", &self.tx)
            .field("terminated", &self.terminated.load(Ordering::Acquire))
            .finish()
    }
}

impl Read {
    /// Builds a read surface for `tx` over the given services.
    ///
    /// `terminated` is shared with whoever may terminate the transaction;
    /// once set, every read fails with [`Error::TransactionTerminated`].
    pub fn new(
        tx: TxId,
        metadata: Arc<dyn IndexMetadata>,
        readers: Arc<dyn IndexReaderFactory>,
        locks: Arc<dyn Locks>,
        terminated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tx,
            metadata,
            readers,
            locks,
            terminated,
        }
    }

    /// Transaction the reads belong to.
    pub fn tx(&self) -> TxId {
        self.tx
    }

    /// Whether the owning transaction has been terminated.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Opens a read session on an online index.
    pub fn index_read_session(&self, index: &IndexDescriptor) -> Result<IndexReadSession> {
        self.ensure_open()?;
        self.ensure_online(index)?;
        let reader = self.readers.new_value_index_reader(index)?;
        Ok(IndexReadSession {
            descriptor: index.clone(),
            reader,
        })
    }

    /// Seeks a node index, positioning `cursor` on the matching entries.
    pub fn node_index_seek(
        &self,
        session: &IndexReadSession,
        cursor: &mut NodeValueIndexCursor,
        constraints: IndexQueryConstraints,
        query: &[PropertyIndexQuery],
    ) -> Result<()> {
        self.index_seek::<Node>(session, cursor, constraints, query, "index seek")
    }

    /// Seeks a relationship index, positioning `cursor` on the matching entries.
    pub fn relationship_index_seek(
        &self,
        session: &IndexReadSession,
        cursor: &mut RelationshipValueIndexCursor,
        constraints: IndexQueryConstraints,
        query: &[PropertyIndexQuery],
    ) -> Result<()> {
        self.index_seek::<Relationship>(session, cursor, constraints, query, "index seek")
    }

    /// Positions `cursor` on every entry of a node index.
    pub fn node_index_scan(
        &self,
        session: &IndexReadSession,
        cursor: &mut NodeValueIndexCursor,
        constraints: IndexQueryConstraints,
    ) -> Result<()> {
        self.index_seek::<Node>(
            session,
            cursor,
            constraints,
            &[PropertyIndexQuery::AllEntries],
            "index scan",
        )
    }

    /// Positions `cursor` on every entry of a relationship index.
    pub fn relationship_index_scan(
        &self,
        session: &IndexReadSession,
        cursor: &mut RelationshipValueIndexCursor,
        constraints: IndexQueryConstraints,
    ) -> Result<()> {
        self.index_seek::<Relationship>(
            session,
            cursor,
            constraints,
            &[PropertyIndexQuery::AllEntries],
            "index scan",
        )
    }

    /// Finds the node owning the unique key `predicates` and locks that key.
    ///
    /// On a match the transaction keeps a shared lock on the key. Without a
    /// match it keeps the exclusive lock, so no other transaction can create
    /// the entry until this one ends, and `None` is returned.
    pub fn locking_node_unique_index_seek(
        &self,
        index: &IndexDescriptor,
        cursor: &mut NodeValueIndexCursor,
        predicates: &[ExactPredicate],
    ) -> Result<Option<NodeId>> {
        self.locking_unique_index_seek::<Node>(index, cursor, predicates)
    }

    /// Relationship counterpart of [`Read::locking_node_unique_index_seek`].
    pub fn locking_relationship_unique_index_seek(
        &self,
        index: &IndexDescriptor,
        cursor: &mut RelationshipValueIndexCursor,
        predicates: &[ExactPredicate],
    ) -> Result<Option<EdgeId>> {
        self.locking_unique_index_seek::<Relationship>(index, cursor, predicates)
    }

    fn index_seek<K: EntityKind>(
        &self,
        session: &IndexReadSession,
        cursor: &mut ValueIndexCursor<K>,
        constraints: IndexQueryConstraints,
        query: &[PropertyIndexQuery],
        operation: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        let index = &session.descriptor;
        let capability = index.capability();
        if constraints.needs_values && !capability.supports_values {
            return Err(Error::Unsupported(format!(
                "index {} cannot provide property values",
                index.name()
            )));
        }
        if constraints.order != IndexOrder::None && !capability.supports_order {
            return Err(Error::Unsupported(format!(
                "index {} cannot provide results in {:?} order",
                index.name(),
                constraints.order
            )));
        }
        ensure_entity_type::<K>(index, operation)?;
        session.reader.query(cursor, constraints, query)
    }

    fn locking_unique_index_seek<K: EntityKind>(
        &self,
        index: &IndexDescriptor,
        cursor: &mut ValueIndexCursor<K>,
        predicates: &[ExactPredicate],
    ) -> Result<Option<K::Id>> {
        self.ensure_open()?;
        self.ensure_online(index)?;
        ensure_predicates_match_schema(index, predicates)?;
        let entity_token = single_entity_token(index)?;
        ensure_entity_type::<K>(index, "unique index seek")?;

        let key = index_entry_resource_id(entity_token, predicates)?;
        let tx = self.tx.0;

        self.locks.acquire_shared_index_entry_lock(key)?;
        if let Some(found) = self.seek_unique(index, cursor, predicates)? {
            trace!(tx, index = index.id().0, key, "read.unique_seek.found_shared");
            return Ok(Some(found));
        }

        self.locks.release_shared_index_entry_lock(key)?;
        debug!(tx, index = index.id().0, key, "read.unique_seek.upgrade");
        self.locks.acquire_exclusive_index_entry_lock(key)?;
        if let Some(found) = self.seek_unique(index, cursor, predicates)? {
            self.locks.acquire_shared_index_entry_lock(key)?;
            self.locks.release_exclusive_index_entry_lock(key)?;
            debug!(tx, index = index.id().0, key, "read.unique_seek.found_exclusive");
            return Ok(Some(found));
        }

        debug!(tx, index = index.id().0, key, "read.unique_seek.absent");
        Ok(None)
    }

    // Each attempt uses a reader opened after the current lock was granted.
    fn seek_unique<K: EntityKind>(
        &self,
        index: &IndexDescriptor,
        cursor: &mut ValueIndexCursor<K>,
        predicates: &[ExactPredicate],
    ) -> Result<Option<K::Id>> {
        let reader = self.readers.new_value_index_reader(index)?;
        let query: Vec<PropertyIndexQuery> =
            predicates.iter().cloned().map(PropertyIndexQuery::from).collect();
        reader.query(&mut *cursor, IndexQueryConstraints::unconstrained(), &query)?;
        drop(reader);
        Ok(if cursor.next() { cursor.reference() } else { None })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::TransactionTerminated(self.tx));
        }
        Ok(())
    }

    fn ensure_online(&self, index: &IndexDescriptor) -> Result<()> {
        match self.metadata.index_state(index)? {
            IndexState::Online => Ok(()),
            IndexState::Failed => Err(IndexUnavailable::Broken {
                index: index.name().to_owned(),
                cause: self.metadata.index_failure(index)?,
            }
            .into()),
            IndexState::Populating => Err(IndexUnavailable::NotOnline {
                index: index.name().to_owned(),
            }
            .into()),
        }
    }
}

fn ensure_predicates_match_schema(
    index: &IndexDescriptor,
    predicates: &[ExactPredicate],
) -> Result<()> {
    let props = index.schema().property_ids();
    if props.len() != predicates.len() {
        return Err(Error::PredicateSchemaMismatch(format!(
            "the index specifies {} properties, but only {} lookup predicates were given",
            props.len(),
            predicates.len()
        )));
    }
    for (pos, (expected, pred)) in props.iter().zip(predicates).enumerate() {
        if *expected != pred.prop_id() {
            return Err(Error::PredicateSchemaMismatch(format!(
                "the index has property id {} in position {}, but the lookup property id was {}",
                expected,
                pos,
                pred.prop_id()
            )));
        }
    }
    Ok(())
}

fn single_entity_token(index: &IndexDescriptor) -> Result<u32> {
    match index.schema().entity_token_ids() {
        [token] => Ok(*token),
        tokens => Err(Error::UnsupportedIndexShape(format!(
            "unique index seek requires exactly one entity token, index {} has {}",
            index.user_description(),
            tokens.len()
        ))),
    }
}

fn ensure_entity_type<K: EntityKind>(index: &IndexDescriptor, operation: &str) -> Result<()> {
    let actual = index.schema().entity_type();
    if actual == K::ENTITY_TYPE {
        return Ok(());
    }
    let kind = match K::ENTITY_TYPE {
        EntityType::Node => "node",
        EntityType::Relationship => "relationship",
    };
    Err(Error::IndexNotApplicable(format!(
        "{kind} {operation} can not be performed on index: {}",
        index.user_description()
    )))
}
