//! The proxy update dispatcher.
//!
//! A debounced [`Scope`](mesh_sync_core::Scope) is turned into configuration pushes. Pushes are
//! executed by a [`WorkerPool`] that routes each job by the FNV-1a hash of the proxy's common
//! name, so pushes to one proxy are serialized while pushes to different proxies proceed in
//! parallel.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod broadcast;
mod dispatcher;
mod pool;
mod push;


pub use self::{
    broadcast::{BroadcastListener, Workloads},
    dispatcher::Dispatcher,
    pool::{Job, PoolClosed, WorkerPool},
    push::{ConfigPush, PushJob, SnapshotVersions},
};
