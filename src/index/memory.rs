use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::schema::IndexDescriptor;
use crate::types::{EntityId, Error, IndexId, IndexUnavailable, Result, Value};

use super::cursor::{IndexHit, IndexSeekClient};
use super::query::{validate_query_shape, IndexOrder, IndexQueryConstraints, PropertyIndexQuery};
use super::reader::{IndexReaderFactory, ValueIndexReader};

type Postings = SmallVec<[EntityId; 1]>;
type KeyEntries = BTreeMap<Vec<Value>, Postings>;

/// Change applied to a value index at commit.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexUpdate {
    /// Adds `entity` under the key `values`.
    Add {
        /// Indexed entity.
        entity: EntityId,
        /// Key values in schema order.
        values: Vec<Value>,
    },
    /// Removes `entity` from the key `values`.
    Remove {
        /// Indexed entity.
        entity: EntityId,
        /// Key values in schema order.
        values: Vec<Value>,
    },
}

impl IndexUpdate {
    fn key(&self) -> &[Value] {
        match self {
            IndexUpdate::Add { values, .. } | IndexUpdate::Remove { values, .. } => values,
        }
    }
}

/// Reader bookkeeping exposed for observability.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexStoreStats {
    /// Readers created since the store was opened.
    pub readers_opened: u64,
    /// Readers currently alive.
    pub readers_open: u64,
}

#[derive(Default)]
struct ReaderCounters {
    opened: AtomicU64,
    open: AtomicU64,
}

struct MemoryIndex {
    descriptor: IndexDescriptor,
    // Readers hold the `Arc` they were created with; writers copy on write.
    entries: RwLock<Arc<KeyEntries>>,
}

/// In-memory value index store and reader factory.
///
/// Each commit swaps in a new version of the touched index, so a reader keeps
/// seeing the contents that existed when it was opened.
#[derive(Default)]
pub struct MemoryIndexStore {
    indexes: RwLock<FxHashMap<IndexId, Arc<MemoryIndex>>>,
    readers: Arc<ReaderCounters>,
}

impl MemoryIndexStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates empty storage for `index`.
    pub fn create(&self, index: &IndexDescriptor) -> Result<()> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&index.id()) {
            return Err(Error::Invalid("index storage already exists"));
        }
        indexes.insert(
            index.id(),
            Arc::new(MemoryIndex {
                descriptor: index.clone(),
                entries: RwLock::new(Arc::new(KeyEntries::new())),
            }),
        );
        debug!(index = index.id().0, "index.memory.created");
        Ok(())
    }

    /// Releases the storage of `id`. Returns `false` when nothing was stored.
    pub fn drop_index(&self, id: IndexId) -> bool {
        self.indexes.write().remove(&id).is_some()
    }

    /// Applies `updates` to `index` atomically.
    ///
    /// On a unique index, adding a key already owned by another entity fails
    /// with [`Error::UniquenessViolation`] and nothing is applied.
    pub fn apply(&self, index: &IndexDescriptor, updates: &[IndexUpdate]) -> Result<()> {
        self.apply_batch(&[(index.clone(), updates.to_vec())])
    }

    /// Applies updates to several indexes as one unit.
    ///
    /// Every touched index is write-locked (in id order) while the updates
    /// are validated; either all of them become visible or none do.
    pub fn apply_batch(&self, batch: &[(IndexDescriptor, Vec<IndexUpdate>)]) -> Result<()> {
        let mut order: Vec<usize> = (0..batch.len()).collect();
        order.sort_by_key(|&pos| batch[pos].0.id());
        let mut targets = Vec::with_capacity(batch.len());
        for &pos in &order {
            let (index, updates) = &batch[pos];
            check_updates(index, updates)?;
            targets.push((index, updates, self.lookup(index)?));
        }
        if targets.windows(2).any(|pair| pair[0].0.id() == pair[1].0.id()) {
            return Err(Error::Invalid("index appears twice in one batch"));
        }

        let mut guards: Vec<_> = targets
            .iter()
            .map(|(_, _, target)| target.entries.write())
            .collect();
        let mut staged = Vec::with_capacity(targets.len());
        for ((index, updates, _), guard) in targets.iter().zip(&guards) {
            staged.push(stage(index, guard, updates)?);
        }
        for (((index, updates, _), guard), touched) in
            targets.iter().zip(guards.iter_mut()).zip(staged)
        {
            let entries = Arc::make_mut(&mut **guard);
            for (key, postings) in touched {
                if postings.is_empty() {
                    entries.remove(&key);
                } else {
                    entries.insert(key, postings);
                }
            }
            trace!(
                index = index.id().0,
                updates = updates.len(),
                keys = entries.len(),
                "index.memory.applied"
            );
        }
        Ok(())
    }

    /// Number of distinct keys stored for `index`.
    pub fn key_count(&self, index: &IndexDescriptor) -> Result<usize> {
        Ok(self.lookup(index)?.entries.read().len())
    }

    /// Reader counters.
    pub fn stats(&self) -> IndexStoreStats {
        IndexStoreStats {
            readers_opened: self.readers.opened.load(Ordering::SeqCst),
            readers_open: self.readers.open.load(Ordering::SeqCst),
        }
    }

    fn lookup(&self, index: &IndexDescriptor) -> Result<Arc<MemoryIndex>> {
        self.indexes
            .read()
            .get(&index.id())
            .filter(|stored| stored.descriptor == *index)
            .cloned()
            .ok_or_else(|| {
                IndexUnavailable::NotFound {
                    index: index.name().to_owned(),
                }
                .into()
            })
    }
}

fn check_updates(index: &IndexDescriptor, updates: &[IndexUpdate]) -> Result<()> {
    let arity = index.schema().property_ids().len();
    for update in updates {
        if update.key().len() != arity {
            return Err(Error::Invalid("index update arity differs from index schema"));
        }
        if update.key().iter().any(Value::is_nan) {
            return Err(Error::Invalid("NaN values cannot be indexed"));
        }
    }
    Ok(())
}

// Computes the new postings of every key `updates` touches without
// modifying `current`.
fn stage(
    index: &IndexDescriptor,
    current: &KeyEntries,
    updates: &[IndexUpdate],
) -> Result<BTreeMap<Vec<Value>, Postings>> {
    let mut touched: BTreeMap<Vec<Value>, Postings> = BTreeMap::new();
    for update in updates {
        let key = update.key();
        if !touched.contains_key(key) {
            let existing = current.get(key).cloned().unwrap_or_default();
            touched.insert(key.to_vec(), existing);
        }
        let Some(postings) = touched.get_mut(key) else {
            continue;
        };
        match update {
            IndexUpdate::Add { entity, .. } => {
                if postings.contains(entity) {
                    continue;
                }
                if index.is_unique() {
                    if let Some(existing) = postings.first() {
                        return Err(Error::UniquenessViolation {
                            index: index.name().to_owned(),
                            existing: *existing,
                        });
                    }
                }
                postings.push(*entity);
                postings.sort_unstable();
            }
            IndexUpdate::Remove { entity, .. } => postings.retain(|e| e != entity),
        }
    }
    Ok(touched)
}

impl IndexReaderFactory for MemoryIndexStore {
    fn new_value_index_reader(&self, index: &IndexDescriptor) -> Result<Box<dyn ValueIndexReader>> {
        let target = self.lookup(index)?;
        let snapshot = Arc::clone(&*target.entries.read());
        self.readers.opened.fetch_add(1, Ordering::SeqCst);
        self.readers.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryValueIndexReader {
            descriptor: target.descriptor.clone(),
            snapshot,
            counters: Arc::clone(&self.readers),
        }))
    }
}

struct MemoryValueIndexReader {
    descriptor: IndexDescriptor,
    snapshot: Arc<KeyEntries>,
    counters: Arc<ReaderCounters>,
}

impl MemoryValueIndexReader {
    fn matching<'a>(&'a self, query: &[PropertyIndexQuery]) -> Vec<(&'a Vec<Value>, &'a Postings)> {
        let entries = &*self.snapshot;
        let Some((last, head)) = query.split_last() else {
            return Vec::new();
        };
        if matches!(last, PropertyIndexQuery::AllEntries) {
            return entries.iter().collect();
        }
        let mut prefix = Vec::with_capacity(query.len());
        for component in head {
            if let PropertyIndexQuery::Exact(pred) = component {
                prefix.push(pred.value().clone());
            }
        }
        if let PropertyIndexQuery::Exact(pred) = last {
            let mut key = prefix;
            key.push(pred.value().clone());
            return entries.get_key_value(&key).into_iter().collect();
        }
        let depth = prefix.len();
        entries
            .range::<Vec<Value>, _>((Bound::Included(prefix.clone()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.get(depth).is_some_and(|value| last.accepts(value)))
            .collect()
    }
}

impl ValueIndexReader for MemoryValueIndexReader {
    fn query(
        &self,
        client: &mut dyn IndexSeekClient,
        constraints: IndexQueryConstraints,
        query: &[PropertyIndexQuery],
    ) -> Result<()> {
        validate_query_shape(&self.descriptor, query)?;
        let needs_values = constraints.needs_values;
        let mut matches = self.matching(query);
        if constraints.order == IndexOrder::Descending {
            matches.reverse();
        }
        let mut hits = matches.into_iter().flat_map(|(key, postings)| {
            postings.iter().map(move |entity| IndexHit {
                entity: *entity,
                values: if needs_values { key.clone() } else { Vec::new() },
            })
        });
        client.initialize(&self.descriptor, &mut hits, needs_values);
        Ok(())
    }
}

impl Drop for MemoryValueIndexReader {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}
