//! Kernel wiring: schema catalog, index storage, locks and transactions.

#![forbid(unsafe_code)]

mod options;
mod read;
mod transaction;

pub use options::KernelOptions;
pub use read::{IndexReadSession, Read};
pub use transaction::Transaction;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::extension::{Extension, ExtensionContext, ExtensionRegistry};
use crate::index::{IndexStoreStats, MemoryIndexStore};
use crate::locking::{LockManager, LockSnapshot};
use crate::schema::{IndexDescriptor, IndexMetadata, IndexPrototype, SchemaCatalog};
use crate::types::{Error, IndexId, Result, TxId};

pub(crate) struct KernelShared {
    pub(crate) options: KernelOptions,
    pub(crate) catalog: Arc<SchemaCatalog>,
    pub(crate) store: Arc<MemoryIndexStore>,
    pub(crate) locks: LockManager,
    pub(crate) next_node: AtomicU64,
    pub(crate) next_edge: AtomicU64,
    next_tx: AtomicU64,
    extensions: ExtensionRegistry,
    shut_down: AtomicBool,
}

/// Entry point owning every shared service.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct Kernel {
    shared: Arc<KernelShared>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.shared.options.name)
            .field("extensions", &self.shared.extensions)
            .finish()
    }
}

impl Kernel {
    /// Creates a kernel without extensions.
    pub fn new(options: KernelOptions) -> Self {
        Self::build(options, ExtensionRegistry::new())
    }

    /// Creates a kernel and starts `extensions` in registration order.
    pub fn with_extensions(options: KernelOptions, extensions: ExtensionRegistry) -> Result<Self> {
        let kernel = Self::build(options, extensions);
        let shared = &kernel.shared;
        shared
            .extensions
            .start_all(&ExtensionContext::new(&shared.options))?;
        Ok(kernel)
    }

    fn build(options: KernelOptions, extensions: ExtensionRegistry) -> Self {
        let locks = LockManager::new(options.locks.clone());
        info!(
            kernel = %options.name,
            lock_timeout_ms = options.locks.acquire_timeout.map(|t| t.as_millis() as u64),
            deadlock_detection = options.locks.deadlock_detection,
            extensions = extensions.len(),
            "kernel.open"
        );
        Self {
            shared: Arc::new(KernelShared {
                options,
                catalog: Arc::new(SchemaCatalog::new()),
                store: Arc::new(MemoryIndexStore::new()),
                locks,
                next_node: AtomicU64::new(0),
                next_edge: AtomicU64::new(0),
                next_tx: AtomicU64::new(1),
                extensions,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Options the kernel was built with.
    pub fn options(&self) -> &KernelOptions {
        &self.shared.options
    }

    /// Registers an index; it stays `Populating` until marked online.
    pub fn create_index(&self, prototype: IndexPrototype) -> Result<IndexDescriptor> {
        let descriptor = self.shared.catalog.create_index(prototype)?;
        if let Err(err) = self.shared.store.create(&descriptor) {
            self.shared.catalog.drop_index(descriptor.id());
            return Err(err);
        }
        Ok(descriptor)
    }

    /// Marks a populated index online.
    pub fn mark_index_online(&self, id: IndexId) -> Result<()> {
        self.shared.catalog.mark_online(id)
    }

    /// Marks an index failed with a failure description.
    pub fn mark_index_failed(&self, id: IndexId, cause: impl Into<String>) -> Result<()> {
        self.shared.catalog.mark_failed(id, cause)
    }

    /// Drops an index and its storage. Returns `false` when it did not exist.
    pub fn drop_index(&self, id: IndexId) -> bool {
        let dropped = self.shared.catalog.drop_index(id);
        self.shared.store.drop_index(id);
        dropped
    }

    /// Index metadata service.
    pub fn metadata(&self) -> Arc<dyn IndexMetadata> {
        self.shared.catalog.clone()
    }

    /// Index storage, also the reader factory used by transactions.
    pub fn index_store(&self) -> Arc<MemoryIndexStore> {
        Arc::clone(&self.shared.store)
    }

    /// Shared lock manager.
    pub fn lock_manager(&self) -> &LockManager {
        &self.shared.locks
    }

    /// Lock manager counters.
    pub fn lock_snapshot(&self) -> LockSnapshot {
        self.shared.locks.snapshot()
    }

    /// Index reader counters.
    pub fn index_stats(&self) -> IndexStoreStats {
        self.shared.store.stats()
    }

    /// Looks up a registered extension.
    pub fn extension(&self, key: &str) -> Option<Arc<dyn Extension>> {
        self.shared.extensions.get(key)
    }

    /// Starts a transaction.
    pub fn begin_tx(&self) -> Result<Transaction> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(Error::Invalid("kernel has been shut down"));
        }
        let id = TxId(self.shared.next_tx.fetch_add(1, Ordering::Relaxed));
        Ok(Transaction::new(id, Arc::clone(&self.shared)))
    }

    /// Allocates a transaction id without opening a transaction, for callers
    /// that assemble a [`Read`] around their own lock client.
    pub fn allocate_tx_id(&self) -> TxId {
        TxId(self.shared.next_tx.fetch_add(1, Ordering::Relaxed))
    }

    /// Stops and shuts down extensions in reverse registration order.
    ///
    /// Later calls are no-ops. New transactions are refused afterwards.
    pub fn shutdown(&self) -> Result<()> {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let shared = &self.shared;
        let result = shared
            .extensions
            .stop_all(&ExtensionContext::new(&shared.options));
        info!(kernel = %shared.options.name, "kernel.shutdown");
        result
    }
}
