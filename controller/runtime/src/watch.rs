use crate::{
    core::{Bus, Message, Proxy, Resource},
    k8s::{self, smi, ResourceExt},
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use futures::prelude::*;
use kube::runtime::watcher;

/// A watched resource type that is announced on the bus.
pub(crate) trait Watched:
    kube::Resource<DynamicType = ()> + Clone + Into<Resource> + Send + 'static
{
    /// The proxy running alongside the resource, if any.
    fn proxy(&self) -> Option<Proxy> {
        None
    }
}

/// Translates watch events into bus messages.
///
/// The last observed version of each object is retained so that updates carry the prior
/// payload. When a watch restarts, objects that are absent from the new listing are announced as
/// deleted.
pub(crate) struct Announce<T> {
    bus: Bus,
    seen: HashMap<Key, T>,
    relisted: Option<HashSet<Key>>,
}

type Key = (Option<String>, String);

// === impl Announce ===

impl<T: Watched> Announce<T> {
    pub(crate) fn new(bus: Bus) -> Self {
        Self {
            bus,
            seen: HashMap::default(),
            relisted: None,
        }
    }

    pub(crate) async fn run(mut self, events: impl Stream<Item = watcher::Event<T>>) {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            self.handle(event);
        }
        tracing::debug!("Watch ended");
    }

    fn handle(&mut self, event: watcher::Event<T>) {
        match event {
            watcher::Event::Apply(obj) => self.apply(obj),
            watcher::Event::Delete(obj) => {
                self.seen.remove(&key(&obj));
                self.delete(obj);
            }
            watcher::Event::Init => {
                tracing::debug!("Watch restarted");
                self.relisted = Some(HashSet::default());
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(key(&obj));
                }
                self.apply(obj);
            }
            watcher::Event::InitDone => {
                let Some(live) = self.relisted.take() else {
                    return;
                };
                let stale = self
                    .seen
                    .keys()
                    .filter(|k| !live.contains(*k))
                    .cloned()
                    .collect::<Vec<_>>();
                for k in stale {
                    if let Some(obj) = self.seen.remove(&k) {
                        self.delete(obj);
                    }
                }
            }
        }
    }

    fn apply(&mut self, obj: T) {
        let proxy = obj.proxy();
        let msg = match self.seen.insert(key(&obj), obj.clone()) {
            Some(old) => Message::updated(old.into(), obj.into()),
            None => Message::added(obj.into()),
        };
        let changed = msg.is_delta();
        self.bus.publish(msg);

        // Re-announcing the proxy lets it be resolved against services indexed since it was first
        // seen.
        if let Some(proxy) = proxy.filter(|_| changed) {
            self.bus.publish(Message::added(Resource::Proxy(proxy)));
        }
    }

    fn delete(&mut self, obj: T) {
        let proxy = obj.proxy();
        self.bus.publish(Message::deleted(obj.into()));
        if let Some(proxy) = proxy {
            self.bus.publish(Message::deleted(Resource::Proxy(proxy)));
        }
    }
}

fn key<T: kube::Resource>(obj: &T) -> Key {
    (obj.namespace(), obj.name_any())
}

impl Watched for k8s::Namespace {}
impl Watched for k8s::Service {}
impl Watched for k8s::Endpoints {}
impl Watched for k8s::Ingress {}
impl Watched for smi::TrafficSplit {}
impl Watched for smi::HTTPRouteGroup {}
impl Watched for smi::TrafficTarget {}
impl Watched for smi::TCPRoute {}

impl Watched for k8s::Pod {
    fn proxy(&self) -> Option<Proxy> {
        match Proxy::from_pod(self) {
            Ok(proxy) => Some(proxy),
            Err(error) => {
                tracing::debug!(%error, "Ignoring pod");
                None
            }
        }
    }
}
