use crate::deferred::DeferredProxies;
use kubert::index::IndexNamespacedResource;
use mesh_sync_core::{Action, Kind, Message, Proxy, Resource, Scope, Topic};
use mesh_sync_k8s_api::{self as k8s, smi, ResourceExt};
use mesh_sync_k8s_index::{Index, ServiceResolver};

/// An error that causes a single message to be skipped.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("malformed {topic} message")]
    Malformed { topic: Topic },
}

/// Applies a change to the index, returning the scope of proxies it affects.
///
/// All of a message's mutations happen within the caller's single write-lock acquisition.
/// Proxies that cannot be resolved yet are held in `deferred` and registered once a pod or
/// service in their namespace is applied.
pub(crate) fn handle<R: ServiceResolver>(
    index: &mut Index,
    resolver: &R,
    deferred: &mut DeferredProxies,
    msg: &Message,
) -> Result<Scope, HandleError> {
    let (kind, action) = match msg.topic {
        Topic::Resource(kind, action) => (kind, action),
        // Broadcast requests have no handler and affect everything.
        Topic::ScheduleProxyBroadcast | Topic::ProxyBroadcast => return Ok(Scope::global()),
    };

    match kind {
        Kind::Namespace => Ok(namespace(
            index,
            deferred,
            Change::from_message(msg, action)?,
        )),
        Kind::Pod => {
            let change = Change::<k8s::Pod>::from_message(msg, action)?;
            let retry = change.new.and_then(|pod| pod.namespace());
            let mut scope = namespaced(index, change);
            if let Some(ns) = retry {
                scope.merge(retry_deferred(index, resolver, deferred, &ns));
            }
            Ok(scope)
        }
        Kind::Service => {
            let change = Change::<k8s::Service>::from_message(msg, action)?;
            let retry = change.new.and_then(|svc| svc.namespace());
            let mut scope = namespaced(index, change);
            if let Some(ns) = retry {
                scope.merge(retry_deferred(index, resolver, deferred, &ns));
            }
            Ok(scope)
        }
        Kind::Endpoints => Ok(namespaced::<k8s::Endpoints>(
            index,
            Change::from_message(msg, action)?,
        )),
        Kind::TrafficSplit => Ok(namespaced::<smi::TrafficSplit>(
            index,
            Change::from_message(msg, action)?,
        )),
        Kind::HttpRouteGroup => Ok(namespaced::<smi::HTTPRouteGroup>(
            index,
            Change::from_message(msg, action)?,
        )),
        Kind::TrafficTarget => Ok(traffic_target(index, Change::from_message(msg, action)?)),
        Kind::Proxy => Ok(proxy(
            index,
            resolver,
            deferred,
            Change::from_message(msg, action)?,
        )),
        Kind::TcpRoute | Kind::Ingress => {
            tracing::debug!(topic = %msg.topic, "no handler; escalating to all proxies");
            Ok(Scope::global())
        }
    }
}

/// The typed payloads of a message, validated against its action.
struct Change<'a, T> {
    old: Option<&'a T>,
    new: Option<&'a T>,
}

/// Extracts a typed payload from a [`Resource`].
trait Payload: Sized {
    fn from_resource(resource: &Resource) -> Option<&Self>;
}

impl<'a, T: Payload> Change<'a, T> {
    fn from_message(msg: &'a Message, action: Action) -> Result<Self, HandleError> {
        let malformed = || HandleError::Malformed { topic: msg.topic };
        let typed = |r: &'a Option<Resource>| match r {
            Some(r) => T::from_resource(r).map(Some).ok_or_else(malformed),
            None => Ok(None),
        };
        let old = typed(&msg.old)?;
        let new = typed(&msg.new)?;

        match (action, old, new) {
            (Action::Added, _, Some(new)) => Ok(Self {
                old: None,
                new: Some(new),
            }),
            (Action::Updated, Some(old), Some(new)) => Ok(Self {
                old: Some(old),
                new: Some(new),
            }),
            (Action::Deleted, Some(old), _) => Ok(Self {
                old: Some(old),
                new: None,
            }),
            _ => Err(malformed()),
        }
    }
}

macro_rules! payload {
    ($variant:ident => $ty:ty) => {
        impl Payload for $ty {
            fn from_resource(resource: &Resource) -> Option<&Self> {
                match resource {
                    Resource::$variant(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

payload!(Namespace => k8s::Namespace);
payload!(Pod => k8s::Pod);
payload!(Service => k8s::Service);
payload!(Endpoints => k8s::Endpoints);
payload!(TrafficSplit => smi::TrafficSplit);
payload!(HttpRouteGroup => smi::HTTPRouteGroup);
payload!(TrafficTarget => smi::TrafficTarget);
payload!(Proxy => Proxy);

/// Namespace changes are recorded but do not, by themselves, affect any proxy.
fn namespace(
    index: &mut Index,
    deferred: &mut DeferredProxies,
    change: Change<'_, k8s::Namespace>,
) -> Scope {
    match (change.old, change.new) {
        (_, Some(new)) => {
            <Index as kubert::index::IndexClusterResource<k8s::Namespace>>::apply(
                index,
                new.clone(),
            );
        }
        (Some(old), None) => {
            let name = old.name_any();
            index.delete_namespace(&name);
            deferred.forget_namespace(&name);
        }
        (None, None) => {}
    }
    Scope::default()
}

/// Replaces a namespaced resource, scoping the namespaces related to both its old and new
/// locations.
fn namespaced<T>(index: &mut Index, change: Change<'_, T>) -> Scope
where
    T: ResourceExt + Clone,
    Index: IndexNamespacedResource<T>,
{
    let mut scope = Scope::default();
    if let Some(old) = change.old {
        let ns = old.namespace().unwrap_or_default();
        <Index as IndexNamespacedResource<T>>::delete(index, ns.clone(), old.name_any());
        scope.merge(Scope::from_namespaces(index.related_namespaces(&ns)));
    }
    if let Some(new) = change.new {
        let ns = new.namespace().unwrap_or_default();
        <Index as IndexNamespacedResource<T>>::apply(index, new.clone());
        scope.merge(Scope::from_namespaces(index.related_namespaces(&ns)));
    }
    scope
}

/// Re-derives a target's edges, scoping every namespace named by its old or new edges.
fn traffic_target(index: &mut Index, change: Change<'_, smi::TrafficTarget>) -> Scope {
    let mut scope = Scope::default();
    if let Some(old) = change.old {
        let renamed = change.new.map(|new| new.id() != old.id()).unwrap_or(true);
        if renamed {
            scope.merge(Scope::from_namespaces(index.delete_traffic_target(&old.id())));
        }
    }
    if let Some(new) = change.new {
        scope.merge(Scope::from_namespaces(index.apply_traffic_target(new.clone())));
    }
    scope
}

/// Re-keys a proxy, registering it under the namespace of the services backing it.
///
/// A proxy whose services cannot be resolved is deferred. A renamed proxy's old registration is
/// removed either way, so the returned scope always covers the index changes made.
fn proxy<R: ServiceResolver>(
    index: &mut Index,
    resolver: &R,
    deferred: &mut DeferredProxies,
    change: Change<'_, Proxy>,
) -> Scope {
    let mut scope = Scope::default();
    if let Some(old) = change.old {
        deferred.forget(&old.common_name);
        let moved = change
            .new
            .map(|new| new.common_name != old.common_name)
            .unwrap_or(true);
        if moved {
            if let Some((ns, _)) = index.delete_proxy(&old.common_name) {
                tracing::debug!(proxy = %old.common_name, namespace = %ns, "removed proxy");
                scope.insert(ns);
            }
        }
    }

    if let Some(new) = change.new {
        deferred.forget(&new.common_name);
        match register(index, resolver, new) {
            Ok(registered) => scope.merge(registered),
            Err(error) => {
                tracing::warn!(proxy = %new.common_name, %error, "Deferring proxy registration");
                deferred.defer(new.clone());
            }
        }
    }
    scope
}

/// Registers the proxies deferred in a namespace that now resolve.
fn retry_deferred<R: ServiceResolver>(
    index: &mut Index,
    resolver: &R,
    deferred: &mut DeferredProxies,
    ns: &str,
) -> Scope {
    let mut scope = Scope::default();
    for proxy in deferred.take_namespace(ns) {
        match register(index, resolver, &proxy) {
            Ok(registered) => scope.merge(registered),
            Err(error) => {
                tracing::trace!(proxy = %proxy.common_name, %error, "Proxy still unresolved");
                deferred.defer(proxy);
            }
        }
    }
    scope
}

fn register<R: ServiceResolver>(
    index: &mut Index,
    resolver: &R,
    proxy: &Proxy,
) -> Result<Scope, mesh_sync_k8s_index::ResolveError> {
    let services = resolver.services_for_proxy(index, &proxy.common_name)?;
    // All of a proxy's services share the namespace of its pod.
    let Some(ns) = services.first().map(|svc| svc.namespace.clone()) else {
        return Ok(Scope::default());
    };
    tracing::debug!(
        proxy = %proxy.common_name,
        namespace = %ns,
        services = services.len(),
        "resolved proxy"
    );
    index.apply_proxy(ns.clone(), proxy.clone());
    Ok(Scope::from_namespaces([ns]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_sync_core::{CommonName, PROXY_UUID_LABEL};
    use mesh_sync_k8s_api::{
        smi::{IdentityBindingSubject, TrafficTargetSpec},
        ObjectMeta,
    };
    use mesh_sync_k8s_index::SelectorResolver;
    use maplit::{btreemap, convert_args};

    fn scope<const N: usize>(namespaces: [&str; N]) -> Scope {
        Scope::from_namespaces(namespaces)
    }

    fn mk_target(name: &str, dst: &str, srcs: &[&str]) -> Resource {
        let subject = |ns: &str| IdentityBindingSubject {
            kind: "ServiceAccount".to_string(),
            name: "sa".to_string(),
            namespace: Some(ns.to_string()),
            port: None,
        };
        Resource::TrafficTarget(smi::TrafficTarget {
            metadata: ObjectMeta {
                namespace: Some(dst.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: TrafficTargetSpec {
                destination: subject(dst),
                sources: srcs.iter().copied().map(subject).collect(),
                rules: vec![],
            },
        })
    }

    fn mk_pod(ns: &str, name: &str, uuid: &str) -> k8s::Pod {
        k8s::Pod {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                labels: Some(convert_args!(btreemap!(
                    PROXY_UUID_LABEL => uuid,
                    "app" => name,
                ))),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn mk_service(ns: &str, name: &str) -> k8s::Service {
        k8s::Service {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(k8s::ServiceSpec {
                selector: Some(convert_args!(btreemap!("app" => name))),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn handle(index: &mut Index, msg: Message) -> Result<Scope, HandleError> {
        let mut deferred = DeferredProxies::default();
        super::handle(index, &SelectorResolver::default(), &mut deferred, &msg)
    }

    fn handle_deferring(
        index: &mut Index,
        deferred: &mut DeferredProxies,
        msg: Message,
    ) -> Scope {
        super::handle(index, &SelectorResolver::default(), deferred, &msg)
            .expect("message must be well-formed")
    }

    #[test]
    fn workload_scope_is_related_namespaces() {
        let mut index = Index::default();
        let scope = handle(&mut index, Message::added(mk_target("t1", "ns-server", &["ns-client"])))
            .expect("target must apply");
        assert_eq!(scope, self::scope(["ns-server", "ns-client"]));

        let pod = Resource::Pod(mk_pod("ns-server", "server", "1"));
        let scope = handle(&mut index, Message::added(pod.clone())).expect("pod must apply");
        assert_eq!(scope, self::scope(["ns-client"]));
        assert_eq!(index.pods().len_in("ns-server"), 1);

        let scope = handle(&mut index, Message::deleted(pod)).expect("pod must delete");
        assert_eq!(scope, self::scope(["ns-client"]));
        assert!(index.pods().is_empty());

        // Workloads in namespaces without traffic policy affect no proxies.
        let scope = handle(
            &mut index,
            Message::added(Resource::Service(mk_service("ns-lonely", "svc"))),
        )
        .expect("service must apply");
        assert!(scope.is_empty());
    }

    #[test]
    fn target_update_scopes_dropped_sources() {
        let mut index = Index::default();
        handle(&mut index, Message::added(mk_target("t1", "ns-server", &["ns-a"])))
            .expect("target must apply");
        let scope = handle(
            &mut index,
            Message::updated(
                mk_target("t1", "ns-server", &["ns-a"]),
                mk_target("t1", "ns-server", &["ns-b"]),
            ),
        )
        .expect("target must update");
        assert_eq!(scope, self::scope(["ns-server", "ns-a", "ns-b"]));
        assert!(index.related_namespaces("ns-a").is_empty());

        let scope = handle(
            &mut index,
            Message::deleted(mk_target("t1", "ns-server", &["ns-b"])),
        )
        .expect("target must delete");
        assert_eq!(scope, self::scope(["ns-server", "ns-b"]));
        assert!(index.related_namespaces("ns-server").is_empty());
    }

    #[test]
    fn namespace_changes_affect_no_proxies() {
        let mut index = Index::default();
        let ns = Resource::Namespace(k8s::Namespace {
            metadata: ObjectMeta {
                name: Some("ns-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(handle(&mut index, Message::added(ns.clone()))
            .expect("namespace must apply")
            .is_empty());
        assert!(index.get_namespace("ns-0").is_some());
        assert!(handle(&mut index, Message::deleted(ns))
            .expect("namespace must delete")
            .is_empty());
        assert!(index.get_namespace("ns-0").is_none());
    }

    #[test]
    fn unhandled_kinds_escalate() {
        let mut index = Index::default();
        let ingress = Resource::Ingress(k8s::Ingress::default());
        assert!(handle(&mut index, Message::added(ingress)).expect("escalates").global);
        assert!(handle(&mut index, Message::schedule_proxy_broadcast())
            .expect("escalates")
            .global);
    }

    #[test]
    fn malformed_messages_are_rejected() {
        let mut index = Index::default();

        // Wrong payload kind for the topic.
        let msg = Message::new(
            Topic::Resource(Kind::Pod, Action::Added),
            None,
            Some(Resource::Service(mk_service("ns-0", "svc"))),
        );
        let err = handle(&mut index, msg).expect_err("payload does not match topic");
        assert!(matches!(err, HandleError::Malformed { .. }), "{err}");

        // Missing payload.
        let msg = Message::new(Topic::Resource(Kind::Service, Action::Updated), None, None);
        let err = handle(&mut index, msg).expect_err("update requires payloads");
        assert!(matches!(err, HandleError::Malformed { .. }), "{err}");
        assert!(index.services().is_empty());
    }

    #[test]
    fn proxy_registers_under_service_namespace() {
        let mut index = Index::default();
        <Index as IndexNamespacedResource<k8s::Pod>>::apply(
            &mut index,
            mk_pod("bookstore", "bookstore", "1234"),
        );
        <Index as IndexNamespacedResource<k8s::Service>>::apply(
            &mut index,
            mk_service("bookstore", "bookstore"),
        );

        let proxy = Proxy::new(CommonName::from_parts("1234", "bookstore", "bookstore"), "1");
        let scope = handle(&mut index, Message::added(Resource::Proxy(proxy.clone())))
            .expect("proxy must resolve");
        assert_eq!(scope, self::scope(["bookstore"]));
        assert_eq!(index.proxy_namespace(&proxy.common_name), Some("bookstore"));

        let scope = handle(&mut index, Message::deleted(Resource::Proxy(proxy.clone())))
            .expect("proxy must delete");
        assert_eq!(scope, self::scope(["bookstore"]));
        assert_eq!(index.proxies_in("bookstore").count(), 0);
    }

    #[test]
    fn unresolved_proxy_is_deferred() {
        let mut index = Index::default();
        let mut deferred = DeferredProxies::default();
        let proxy = Proxy::new(CommonName::from_parts("9999", "sa", "ns-0"), "1");
        let scope = handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Proxy(proxy.clone())),
        );
        assert!(scope.is_empty());
        assert!(index.proxies().is_empty());
        assert!(deferred.contains(&proxy.common_name));

        // Deleting the proxy drops it from the deferred set.
        handle_deferring(
            &mut index,
            &mut deferred,
            Message::deleted(Resource::Proxy(proxy.clone())),
        );
        assert_eq!(deferred.len(), 0);
    }

    #[test]
    fn deferred_proxy_registers_when_service_appears() {
        let mut index = Index::default();
        let mut deferred = DeferredProxies::default();

        handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Pod(mk_pod("bookstore", "bookstore", "1234"))),
        );
        let proxy = Proxy::new(CommonName::from_parts("1234", "bookstore", "bookstore"), "1");
        handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Proxy(proxy.clone())),
        );
        assert_eq!(index.proxy_namespace(&proxy.common_name), None);
        assert_eq!(deferred.len(), 1);

        // A service in another namespace does not help.
        handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Service(mk_service("bookbuyer", "bookstore"))),
        );
        assert_eq!(deferred.len(), 1);

        let scope = handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Service(mk_service("bookstore", "bookstore"))),
        );
        assert_eq!(scope, self::scope(["bookstore"]));
        assert_eq!(index.proxy_namespace(&proxy.common_name), Some("bookstore"));
        assert_eq!(deferred.len(), 0);
    }

    #[test]
    fn deferred_proxy_registers_when_pod_appears() {
        let mut index = Index::default();
        let mut deferred = DeferredProxies::default();
        <Index as IndexNamespacedResource<k8s::Service>>::apply(
            &mut index,
            mk_service("bookstore", "bookstore"),
        );

        let proxy = Proxy::new(CommonName::from_parts("1234", "bookstore", "bookstore"), "1");
        handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Proxy(proxy.clone())),
        );
        assert_eq!(deferred.len(), 1);

        let scope = handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Pod(mk_pod("bookstore", "bookstore", "1234"))),
        );
        assert!(scope.namespaces.contains("bookstore"));
        assert_eq!(index.proxy_namespace(&proxy.common_name), Some("bookstore"));
        assert_eq!(deferred.len(), 0);
    }

    #[test]
    fn renamed_proxy_scopes_removal_when_new_name_is_unresolved() {
        let mut index = Index::default();
        let mut deferred = DeferredProxies::default();
        <Index as IndexNamespacedResource<k8s::Pod>>::apply(
            &mut index,
            mk_pod("bookstore", "bookstore", "1234"),
        );
        <Index as IndexNamespacedResource<k8s::Service>>::apply(
            &mut index,
            mk_service("bookstore", "bookstore"),
        );
        let old = Proxy::new(CommonName::from_parts("1234", "bookstore", "bookstore"), "1");
        handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Proxy(old.clone())),
        );
        assert_eq!(index.proxy_namespace(&old.common_name), Some("bookstore"));

        let new = Proxy::new(CommonName::from_parts("5678", "bookstore", "bookstore"), "2");
        let scope = handle_deferring(
            &mut index,
            &mut deferred,
            Message::updated(Resource::Proxy(old.clone()), Resource::Proxy(new.clone())),
        );
        assert_eq!(scope, self::scope(["bookstore"]));
        assert_eq!(index.proxy_namespace(&old.common_name), None);
        assert!(deferred.contains(&new.common_name));
    }

    #[test]
    fn namespace_delete_drops_deferred_proxies() {
        let mut index = Index::default();
        let mut deferred = DeferredProxies::default();
        let proxy = Proxy::new(CommonName::from_parts("1", "sa", "ns-0"), "1");
        handle_deferring(
            &mut index,
            &mut deferred,
            Message::added(Resource::Proxy(proxy)),
        );
        let ns = Resource::Namespace(k8s::Namespace {
            metadata: ObjectMeta {
                name: Some("ns-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        handle_deferring(&mut index, &mut deferred, Message::deleted(ns));
        assert_eq!(deferred.len(), 0);
    }
}
