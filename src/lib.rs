//! Locking-aware unique index seeks for a property graph kernel.
//!
//! [`kernel::Read::locking_node_unique_index_seek`] looks up the single
//! entity owning a unique index key and locks that key, so a caller that
//! finds nothing can create the entity knowing no concurrent transaction
//! will create it first. The supporting pieces are the schema catalog
//! ([`schema`]), value index storage and cursors ([`index`]), the
//! index-entry lock manager ([`locking`]) and transactions ([`kernel`]).

#![warn(missing_docs)]

pub mod extension;
pub mod index;
pub mod kernel;
pub mod locking;
pub mod logging;
pub mod schema;
pub mod types;

pub use kernel::{Kernel, KernelOptions, Read, Transaction};
pub use types::{Error, Result};
