//! The relationship index.
//!
//! The index holds the controller's view of the mesh: namespaces, workloads (pods, services and
//! endpoints), traffic policies and connected proxies, all grouped by namespace. From the SMI
//! `TrafficTarget`s it derives a bidirectional namespace graph:
//!
//! ```text
//! received_by[dst][src][target-id]    sent_by[src][dst][target-id]
//! ```
//!
//! Both sides are always updated together, so a namespace is related to another exactly when a
//! target grants traffic between them in either direction. The graph is used to translate "a
//! resource in namespace N changed" into "the proxies of these namespaces may be affected".
//!
//! The index is mutated only by the coordinator, under the write lock of a [`SharedIndex`]. Other
//! components (e.g. a discovery server building a proxy's configuration) use the read lock to
//! observe a consistent view.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod collection;
mod index;
pub mod metrics;
mod resolve;
mod traffic;


pub use self::{
    collection::ByNamespace,
    index::Index,
    resolve::{ResolveError, SelectorResolver, ServiceResolver},
    traffic::TrafficTargets,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// A handle to the index that may be shared across tasks.
///
/// Access is only possible through scoped acquisition of the read or write lock so that a caller's
/// multi-step read or write is never interleaved with another writer.
#[derive(Clone, Debug, Default)]
pub struct SharedIndex(Arc<RwLock<Index>>);

// === impl SharedIndex ===

impl SharedIndex {
    pub fn new(index: Index) -> Self {
        Self(Arc::new(RwLock::new(index)))
    }

    /// Runs `f` while holding the read lock. Many readers may hold the lock concurrently.
    pub fn with_read<T>(&self, f: impl FnOnce(&Index) -> T) -> T {
        f(&self.0.read())
    }

    /// Runs `f` while holding the write lock, excluding all other readers and writers.
    pub fn with_write<T>(&self, f: impl FnOnce(&mut Index) -> T) -> T {
        f(&mut self.0.write())
    }
}
