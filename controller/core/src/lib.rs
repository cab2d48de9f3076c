//! Types shared by the mesh configuration sync controller.
//!
//! Changes to cluster resources are published on a [`Bus`] as [`Message`]s. The coordinator
//! consumes them, maintains the relationship index and emits a [`Scope`] describing which proxies
//! must be refreshed. Proxies are identified by the [`CommonName`] of their certificate.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod bus;
mod event;
mod proxy;
mod scope;

pub use self::{
    bus::{Bus, Subscription},
    event::{Action, Kind, Message, Resource, Topic},
    proxy::{identity_hash, CommonName, InvalidCommonName, NotMeshPod, Proxy, ServiceRef},
    scope::Scope,
};

/// The pod label that carries a proxy's unique id. Only pods with this label are part of the mesh.
pub const PROXY_UUID_LABEL: &str = "osm-proxy-uuid";
