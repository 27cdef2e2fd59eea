use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::types::{Error, LockMode, Result, TxId};

use super::options::LockOptions;
use super::resource::ResourceId;
use super::Locks;

#[derive(Default, Debug)]
struct LockEntry {
    // Holder and re-entrancy count.
    exclusive: Option<(TxId, u32)>,
    shared: SmallVec<[(TxId, u32); 4]>,
}

impl LockEntry {
    fn grantable(&self, tx: TxId, mode: LockMode) -> bool {
        let exclusive_ok = self.exclusive.map_or(true, |(owner, _)| owner == tx);
        match mode {
            LockMode::Shared => exclusive_ok,
            LockMode::Exclusive => exclusive_ok && self.shared.iter().all(|(owner, _)| *owner == tx),
        }
    }

    fn grant(&mut self, tx: TxId, mode: LockMode) {
        match mode {
            LockMode::Exclusive => match &mut self.exclusive {
                Some((_, count)) => *count += 1,
                None => self.exclusive = Some((tx, 1)),
            },
            LockMode::Shared => match self.shared.iter_mut().find(|(owner, _)| *owner == tx) {
                Some((_, count)) => *count += 1,
                None => self.shared.push((tx, 1)),
            },
        }
    }

    fn release(&mut self, tx: TxId, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => match &mut self.exclusive {
                Some((owner, count)) if *owner == tx => {
                    *count -= 1;
                    if *count == 0 {
                        self.exclusive = None;
                    }
                    true
                }
                _ => false,
            },
            LockMode::Shared => {
                let Some(pos) = self.shared.iter().position(|(owner, _)| *owner == tx) else {
                    return false;
                };
                self.shared[pos].1 -= 1;
                if self.shared[pos].1 == 0 {
                    self.shared.swap_remove(pos);
                }
                true
            }
        }
    }

    fn release_all(&mut self, tx: TxId) {
        if matches!(self.exclusive, Some((owner, _)) if owner == tx) {
            self.exclusive = None;
        }
        self.shared.retain(|(owner, _)| *owner != tx);
    }

    fn holds(&self, tx: TxId, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => matches!(self.exclusive, Some((owner, _)) if owner == tx),
            LockMode::Shared => self.shared.iter().any(|(owner, _)| *owner == tx),
        }
    }

    /// Holders that keep `tx` from taking the lock in `mode`.
    fn blockers(&self, tx: TxId, mode: LockMode) -> SmallVec<[TxId; 4]> {
        let mut out = SmallVec::new();
        if let Some((owner, _)) = self.exclusive {
            if owner != tx {
                out.push(owner);
            }
        }
        if mode == LockMode::Exclusive {
            out.extend(
                self.shared
                    .iter()
                    .map(|(owner, _)| *owner)
                    .filter(|owner| *owner != tx),
            );
        }
        out
    }

    fn is_free(&self) -> bool {
        self.exclusive.is_none() && self.shared.is_empty()
    }
}

#[derive(Default)]
struct LockTable {
    locks: FxHashMap<ResourceId, LockEntry>,
    waiting: FxHashMap<TxId, (ResourceId, LockMode)>,
}

impl LockTable {
    fn would_deadlock(&self, tx: TxId, resource: ResourceId, mode: LockMode) -> bool {
        let mut stack: Vec<TxId> = match self.locks.get(&resource) {
            Some(entry) => entry.blockers(tx, mode).into_vec(),
            None => return false,
        };
        let mut seen = FxHashSet::default();
        while let Some(holder) = stack.pop() {
            if holder == tx {
                return true;
            }
            if !seen.insert(holder) {
                continue;
            }
            let Some((next_resource, next_mode)) = self.waiting.get(&holder) else {
                continue;
            };
            if let Some(entry) = self.locks.get(next_resource) {
                stack.extend(entry.blockers(holder, *next_mode));
            }
        }
        false
    }

    fn drop_if_free(&mut self, resource: ResourceId) {
        if self.locks.get(&resource).is_some_and(LockEntry::is_free) {
            self.locks.remove(&resource);
        }
    }
}

#[derive(Default)]
struct Counters {
    shared_acquired: AtomicU64,
    exclusive_acquired: AtomicU64,
    waits: AtomicU64,
    timeouts: AtomicU64,
    deadlocks: AtomicU64,
}

struct Shared {
    table: Mutex<LockTable>,
    released: Condvar,
    options: LockOptions,
    counters: Counters,
}

/// Snapshot of lock manager state for observability.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LockSnapshot {
    /// Resources with at least one holder.
    pub resources_locked: usize,
    /// Transactions currently blocked.
    pub waiting: usize,
    /// Shared grants since creation.
    pub shared_acquired: u64,
    /// Exclusive grants since creation.
    pub exclusive_acquired: u64,
    /// Acquisitions that had to block.
    pub waits: u64,
    /// Acquisitions that timed out.
    pub timeouts: u64,
    /// Acquisitions refused because of a wait-for cycle.
    pub deadlocks: u64,
}

/// Keyed shared/exclusive lock table shared by all transactions.
///
/// Locks are re-entrant per transaction. A transaction holding the exclusive
/// lock may also take the shared lock, and a transaction that is the only
/// shared holder may take the exclusive lock.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Shared>,
}

impl LockManager {
    /// Creates an empty lock table with the given policy.
    pub fn new(options: LockOptions) -> Self {
        Self {
            inner: Arc::new(Shared {
                table: Mutex::new(LockTable::default()),
                released: Condvar::new(),
                options,
                counters: Counters::default(),
            }),
        }
    }

    /// Acquisition policy in effect.
    pub fn options(&self) -> &LockOptions {
        &self.inner.options
    }

    /// Opens a lock client for transaction `tx`.
    pub fn new_client(&self, tx: TxId) -> LockClient {
        LockClient {
            manager: self.clone(),
            tx,
            held: Mutex::new(FxHashSet::default()),
        }
    }

    /// Returns a snapshot of the current lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        let table = self.inner.table.lock();
        let counters = &self.inner.counters;
        LockSnapshot {
            resources_locked: table.locks.values().filter(|entry| !entry.is_free()).count(),
            waiting: table.waiting.len(),
            shared_acquired: counters.shared_acquired.load(Ordering::Relaxed),
            exclusive_acquired: counters.exclusive_acquired.load(Ordering::Relaxed),
            waits: counters.waits.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            deadlocks: counters.deadlocks.load(Ordering::Relaxed),
        }
    }

    /// Whether `tx` currently holds `resource` in `mode`.
    pub fn holds(&self, tx: TxId, resource: ResourceId, mode: LockMode) -> bool {
        self.inner
            .table
            .lock()
            .locks
            .get(&resource)
            .is_some_and(|entry| entry.holds(tx, mode))
    }

    fn acquire(&self, tx: TxId, resource: ResourceId, mode: LockMode) -> Result<()> {
        let started = Instant::now();
        // A timeout too large to represent as an instant waits indefinitely.
        let deadline = self
            .inner
            .options
            .acquire_timeout
            .and_then(|t| started.checked_add(t));
        let mut table = self.inner.table.lock();
        let mut blocked = false;
        loop {
            let entry = table.locks.entry(resource).or_default();
            if entry.grantable(tx, mode) {
                entry.grant(tx, mode);
                table.waiting.remove(&tx);
                let counter = match mode {
                    LockMode::Shared => &self.inner.counters.shared_acquired,
                    LockMode::Exclusive => &self.inner.counters.exclusive_acquired,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                if blocked {
                    debug!(
                        tx = tx.0,
                        %resource,
                        %mode,
                        waited_us = started.elapsed().as_micros() as u64,
                        "locks.acquire.granted_after_wait"
                    );
                } else {
                    trace!(tx = tx.0, %resource, %mode, "locks.acquire.granted");
                }
                return Ok(());
            }

            if self.inner.options.deadlock_detection && table.would_deadlock(tx, resource, mode) {
                table.waiting.remove(&tx);
                table.drop_if_free(resource);
                self.inner.counters.deadlocks.fetch_add(1, Ordering::Relaxed);
                warn!(tx = tx.0, %resource, %mode, "locks.deadlock_detected");
                return Err(Error::Deadlock {
                    resource: resource.to_string(),
                    mode,
                    tx,
                });
            }

            if !blocked {
                blocked = true;
                self.inner.counters.waits.fetch_add(1, Ordering::Relaxed);
                debug!(tx = tx.0, %resource, %mode, "locks.acquire.wait");
            }
            table.waiting.insert(tx, (resource, mode));

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        table.waiting.remove(&tx);
                        table.drop_if_free(resource);
                        self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                        let waited = started.elapsed();
                        warn!(
                            tx = tx.0,
                            %resource,
                            %mode,
                            waited_ms = waited.as_millis() as u64,
                            "locks.acquire.timeout"
                        );
                        return Err(Error::LockTimeout {
                            resource: resource.to_string(),
                            mode,
                            waited,
                        });
                    }
                    self.inner.released.wait_until(&mut table, deadline);
                }
                None => self.inner.released.wait(&mut table),
            }
        }
    }

    fn release(&self, tx: TxId, resource: ResourceId, mode: LockMode) -> Result<()> {
        let mut table = self.inner.table.lock();
        let released = table
            .locks
            .get_mut(&resource)
            .is_some_and(|entry| entry.release(tx, mode));
        if !released {
            return Err(Error::Invalid("lock released by a transaction that does not hold it"));
        }
        table.drop_if_free(resource);
        drop(table);
        trace!(tx = tx.0, %resource, %mode, "locks.release");
        self.inner.released.notify_all();
        Ok(())
    }

    fn release_all<'a>(&self, tx: TxId, resources: impl Iterator<Item = &'a ResourceId>) {
        let mut table = self.inner.table.lock();
        let mut count = 0usize;
        for resource in resources {
            if let Some(entry) = table.locks.get_mut(resource) {
                entry.release_all(tx);
                count += 1;
            }
            table.drop_if_free(*resource);
        }
        table.waiting.remove(&tx);
        drop(table);
        if count > 0 {
            debug!(tx = tx.0, resources = count, "locks.release_all");
            self.inner.released.notify_all();
        }
    }
}

/// Per-transaction view of the lock manager.
///
/// Tracks every resource the transaction touched so that
/// [`LockClient::release_all`] (or drop) frees them at transaction end.
pub struct LockClient {
    manager: LockManager,
    tx: TxId,
    held: Mutex<FxHashSet<ResourceId>>,
}

impl LockClient {
    /// Transaction owning this client.
    pub fn tx(&self) -> TxId {
        self.tx
    }

    /// Acquires `resource` in `mode`, blocking per the manager's policy.
    pub fn acquire(&self, resource: ResourceId, mode: LockMode) -> Result<()> {
        self.manager.acquire(self.tx, resource, mode)?;
        self.held.lock().insert(resource);
        Ok(())
    }

    /// Releases one hold of `resource` in `mode`.
    pub fn release(&self, resource: ResourceId, mode: LockMode) -> Result<()> {
        self.manager.release(self.tx, resource, mode)
    }

    /// Whether this transaction holds `resource` in `mode`.
    pub fn holds(&self, resource: ResourceId, mode: LockMode) -> bool {
        self.manager.holds(self.tx, resource, mode)
    }

    /// Releases every lock held by this transaction.
    pub fn release_all(&self) {
        let held: Vec<ResourceId> = self.held.lock().drain().collect();
        if !held.is_empty() {
            self.manager.release_all(self.tx, held.iter());
        }
    }

    /// Configured acquisition timeout, for diagnostics.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.manager.options().acquire_timeout
    }
}

impl Locks for LockClient {
    fn acquire_shared_index_entry_lock(&self, key: u64) -> Result<()> {
        self.acquire(ResourceId::index_entry(key), LockMode::Shared)
    }

    fn release_shared_index_entry_lock(&self, key: u64) -> Result<()> {
        self.release(ResourceId::index_entry(key), LockMode::Shared)
    }

    fn acquire_exclusive_index_entry_lock(&self, key: u64) -> Result<()> {
        self.acquire(ResourceId::index_entry(key), LockMode::Exclusive)
    }

    fn release_exclusive_index_entry_lock(&self, key: u64) -> Result<()> {
        self.release(ResourceId::index_entry(key), LockMode::Exclusive)
    }
}

impl Drop for LockClient {
    fn drop(&mut self) {
        self.release_all();
    }
}
