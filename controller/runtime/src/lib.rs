#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_sync_coordinator as coordinator;
pub use mesh_sync_core as core;
pub use mesh_sync_dispatch as dispatch;
pub use mesh_sync_k8s_api as k8s;
pub use mesh_sync_k8s_index as index;

mod args;
mod watch;

pub use self::args::Args;
