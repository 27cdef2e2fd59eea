use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::index::{
    ExactPredicate, IndexQueryConstraints, IndexReaderFactory, IndexUpdate, NodeValueIndexCursor,
    PropertyIndexQuery, RelationshipValueIndexCursor,
};
use crate::locking::{index_entry_resource_id, LockClient, Locks};
use crate::schema::{IndexDescriptor, IndexMetadata, IndexState};
use crate::types::{
    EdgeId, EntityId, EntityType, Error, IndexId, IndexUnavailable, NodeId, Result, TxId, Value,
};

use super::read::Read;
use super::KernelShared;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TxState {
    Open,
    Committed,
    RolledBack,
}

/// Unit of work against a [`super::Kernel`].
///
/// Index inserts are staged and become visible at [`Transaction::commit`].
/// Every lock the transaction takes, including those taken by unique seeks,
/// is held until commit or rollback. Dropping an open transaction rolls it
/// back.
pub struct Transaction {
    id: TxId,
    kernel: Arc<KernelShared>,
    locks: Arc<LockClient>,
    read: Read,
    terminated: Arc<AtomicBool>,
    staged: FxHashMap<IndexId, (IndexDescriptor, Vec<IndexUpdate>)>,
    state: TxState,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("staged_indexes", &self.staged.len())
            .finish()
    }
}

impl Transaction {
    pub(super) fn new(id: TxId, kernel: Arc<KernelShared>) -> Self {
        let locks = Arc::new(kernel.locks.new_client(id));
        let terminated = Arc::new(AtomicBool::new(false));
        let read = Read::new(
            id,
            kernel.catalog.clone(),
            kernel.store.clone(),
            locks.clone(),
            Arc::clone(&terminated),
        );
        Self {
            id,
            kernel,
            locks,
            read,
            terminated,
            staged: FxHashMap::default(),
            state: TxState::Open,
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// Read operations bound to this transaction.
    pub fn read(&self) -> &Read {
        &self.read
    }

    /// Lock client of this transaction.
    pub fn locks(&self) -> &LockClient {
        &self.locks
    }

    /// Allocates a new node id.
    pub fn create_node(&mut self) -> Result<NodeId> {
        self.ensure_open()?;
        Ok(NodeId(self.kernel.next_node.fetch_add(1, Ordering::Relaxed)))
    }

    /// Allocates a new relationship id.
    pub fn create_relationship(&mut self) -> Result<EdgeId> {
        self.ensure_open()?;
        Ok(EdgeId(self.kernel.next_edge.fetch_add(1, Ordering::Relaxed)))
    }

    /// Stages an index entry mapping `values` to `entity`.
    ///
    /// Takes the exclusive lock on the entry key, so a concurrent unique
    /// seek for the same key waits until this transaction ends. On a unique
    /// index a key already owned by another committed entity is rejected
    /// immediately.
    pub fn index_insert(
        &mut self,
        index: &IndexDescriptor,
        entity: impl Into<EntityId>,
        values: Vec<Value>,
    ) -> Result<()> {
        self.ensure_open()?;
        let entity = entity.into();
        match self.kernel.catalog.index_state(index)? {
            IndexState::Online => {}
            IndexState::Failed => {
                return Err(IndexUnavailable::Broken {
                    index: index.name().to_owned(),
                    cause: self.kernel.catalog.index_failure(index)?,
                }
                .into())
            }
            IndexState::Populating => {
                return Err(IndexUnavailable::NotOnline {
                    index: index.name().to_owned(),
                }
                .into())
            }
        }
        if entity.entity_type() != index.schema().entity_type() {
            return Err(Error::IndexNotApplicable(format!(
                "{} cannot be added to index: {}",
                entity.entity_type(),
                index.user_description()
            )));
        }
        let props = index.schema().property_ids();
        if props.len() != values.len() {
            return Err(Error::Invalid("index insert arity differs from index schema"));
        }

        if index.is_unique() {
            // Entry locks are keyed by one token; seekers could not share them otherwise.
            let [token] = index.schema().entity_token_ids() else {
                return Err(Error::UnsupportedIndexShape(format!(
                    "unique index insert requires exactly one entity token, index {} has {}",
                    index.user_description(),
                    index.schema().entity_token_ids().len()
                )));
            };
            let predicates: Vec<ExactPredicate> = props
                .iter()
                .zip(&values)
                .map(|(prop, value)| ExactPredicate::new(*prop, value.clone()))
                .collect();
            let key = index_entry_resource_id(*token, &predicates)?;
            self.locks.acquire_exclusive_index_entry_lock(key)?;
            if let Some(existing) = self.committed_owner(index, &predicates)? {
                if existing != entity {
                    return Err(Error::UniquenessViolation {
                        index: index.name().to_owned(),
                        existing,
                    });
                }
            }
        }

        trace!(tx = self.id.0, index = index.id().0, ?entity, "kernel.tx.index_insert");
        self.staged
            .entry(index.id())
            .or_insert_with(|| (index.clone(), Vec::new()))
            .1
            .push(IndexUpdate::Add { entity, values });
        Ok(())
    }

    /// Makes staged inserts visible and releases every lock.
    ///
    /// Nothing is applied if any index rejects its updates.
    pub fn commit(mut self) -> Result<()> {
        self.ensure_open()?;
        let batch: Vec<(IndexDescriptor, Vec<IndexUpdate>)> =
            self.staged.drain().map(|(_, staged)| staged).collect();
        let updates: usize = batch.iter().map(|(_, updates)| updates.len()).sum();
        let result = if batch.is_empty() {
            Ok(())
        } else {
            self.kernel.store.apply_batch(&batch)
        };
        self.finish(if result.is_ok() {
            TxState::Committed
        } else {
            TxState::RolledBack
        });
        result?;
        debug!(
            kernel = %self.kernel.options.name,
            tx = self.id.0,
            updates,
            "kernel.tx.commit"
        );
        Ok(())
    }

    /// Discards staged inserts and releases every lock.
    pub fn rollback(mut self) {
        self.rollback_in_place();
    }

    /// Marks the transaction terminated; further reads and writes fail with
    /// [`Error::TransactionTerminated`]. Locks stay held until rollback.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            debug!(tx = self.id.0, "kernel.tx.terminated");
        }
    }

    fn committed_owner(
        &self,
        index: &IndexDescriptor,
        predicates: &[ExactPredicate],
    ) -> Result<Option<EntityId>> {
        let reader = self.kernel.store.new_value_index_reader(index)?;
        let query: Vec<PropertyIndexQuery> =
            predicates.iter().cloned().map(PropertyIndexQuery::from).collect();
        Ok(match index.schema().entity_type() {
            EntityType::Node => {
                let mut cursor = NodeValueIndexCursor::new();
                reader.query(&mut cursor, IndexQueryConstraints::unconstrained(), &query)?;
                cursor.next().then(|| cursor.reference()).flatten().map(EntityId::from)
            }
            EntityType::Relationship => {
                let mut cursor = RelationshipValueIndexCursor::new();
                reader.query(&mut cursor, IndexQueryConstraints::unconstrained(), &query)?;
                cursor.next().then(|| cursor.reference()).flatten().map(EntityId::from)
            }
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state != TxState::Open || self.terminated.load(Ordering::Acquire) {
            return Err(Error::TransactionTerminated(self.id));
        }
        Ok(())
    }

    fn rollback_in_place(&mut self) {
        if self.state != TxState::Open {
            return;
        }
        let discarded = self.staged.len();
        self.staged.clear();
        self.finish(TxState::RolledBack);
        debug!(tx = self.id.0, staged_indexes = discarded, "kernel.tx.rollback");
    }

    fn finish(&mut self, state: TxState) {
        self.state = state;
        self.terminated.store(true, Ordering::Release);
        self.locks.release_all();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.rollback_in_place();
    }
}
