use crate::Proxy;
use mesh_sync_k8s_api::{self as k8s, smi};
use std::fmt;

/// The kinds of resources that are announced on the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Namespace,
    Pod,
    Service,
    Endpoints,
    TrafficSplit,
    HttpRouteGroup,
    TrafficTarget,
    TcpRoute,
    Ingress,
    Proxy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Added,
    Updated,
    Deleted,
}

/// Identifies a class of messages that may be subscribed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Resource(Kind, Action),

    /// Instructs proxy-facing consumers to refresh the configuration of every proxy.
    ProxyBroadcast,

    /// Requests that a (debounced) refresh of every proxy be scheduled.
    ScheduleProxyBroadcast,
}

/// A resource payload carried by a [`Message`].
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Namespace(k8s::Namespace),
    Pod(k8s::Pod),
    Service(k8s::Service),
    Endpoints(k8s::Endpoints),
    TrafficSplit(smi::TrafficSplit),
    HttpRouteGroup(smi::HTTPRouteGroup),
    TrafficTarget(smi::TrafficTarget),
    TcpRoute(smi::TCPRoute),
    Ingress(k8s::Ingress),
    Proxy(Proxy),
}

/// An announcement published on the bus.
///
/// `old` is set for updates and deletions; `new` is set for additions and updates.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub topic: Topic,
    pub old: Option<Resource>,
    pub new: Option<Resource>,
}

// === impl Kind ===

impl Kind {
    pub const ALL: [Kind; 10] = [
        Kind::Namespace,
        Kind::Pod,
        Kind::Service,
        Kind::Endpoints,
        Kind::TrafficSplit,
        Kind::HttpRouteGroup,
        Kind::TrafficTarget,
        Kind::TcpRoute,
        Kind::Ingress,
        Kind::Proxy,
    ];

    /// Returns the added, updated and deleted topics for this kind.
    pub fn topics(self) -> [Topic; 3] {
        [
            Topic::Resource(self, Action::Added),
            Topic::Resource(self, Action::Updated),
            Topic::Resource(self, Action::Deleted),
        ]
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Pod => "Pod",
            Self::Service => "Service",
            Self::Endpoints => "Endpoints",
            Self::TrafficSplit => "TrafficSplit",
            Self::HttpRouteGroup => "RouteGroup",
            Self::TrafficTarget => "TrafficTarget",
            Self::TcpRoute => "TCPRoute",
            Self::Ingress => "Ingress",
            Self::Proxy => "Proxy",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Action ===

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "Added",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        })
    }
}

// === impl Topic ===

impl Topic {
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Self::Resource(kind, _) => Some(*kind),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<Action> {
        match self {
            Self::Resource(_, action) => Some(*action),
            _ => None,
        }
    }

    /// Every resource topic plus the broadcast request topic: the set of topics that may affect
    /// proxy configuration.
    pub fn all_changes() -> impl Iterator<Item = Topic> {
        Kind::ALL
            .into_iter()
            .flat_map(Kind::topics)
            .chain(Some(Topic::ScheduleProxyBroadcast))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(kind, action) => write!(f, "{kind}{action}"),
            Self::ProxyBroadcast => f.write_str("ProxyBroadcast"),
            Self::ScheduleProxyBroadcast => f.write_str("ScheduleProxyBroadcast"),
        }
    }
}

// === impl Resource ===

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Namespace(_) => Kind::Namespace,
            Self::Pod(_) => Kind::Pod,
            Self::Service(_) => Kind::Service,
            Self::Endpoints(_) => Kind::Endpoints,
            Self::TrafficSplit(_) => Kind::TrafficSplit,
            Self::HttpRouteGroup(_) => Kind::HttpRouteGroup,
            Self::TrafficTarget(_) => Kind::TrafficTarget,
            Self::TcpRoute(_) => Kind::TcpRoute,
            Self::Ingress(_) => Kind::Ingress,
            Self::Proxy(_) => Kind::Proxy,
        }
    }
}

macro_rules! resource_from {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Resource {
                fn from(r: $ty) -> Self {
                    Self::$variant(r)
                }
            }
        )+
    };
}

resource_from! {
    Namespace => k8s::Namespace,
    Pod => k8s::Pod,
    Service => k8s::Service,
    Endpoints => k8s::Endpoints,
    TrafficSplit => smi::TrafficSplit,
    HttpRouteGroup => smi::HTTPRouteGroup,
    TrafficTarget => smi::TrafficTarget,
    TcpRoute => smi::TCPRoute,
    Ingress => k8s::Ingress,
    Proxy => Proxy,
}

// === impl Message ===

impl Message {
    pub fn new(topic: Topic, old: Option<Resource>, new: Option<Resource>) -> Self {
        Self { topic, old, new }
    }

    pub fn added(new: Resource) -> Self {
        Self::new(Topic::Resource(new.kind(), Action::Added), None, Some(new))
    }

    pub fn updated(old: Resource, new: Resource) -> Self {
        Self::new(
            Topic::Resource(new.kind(), Action::Updated),
            Some(old),
            Some(new),
        )
    }

    pub fn deleted(old: Resource) -> Self {
        Self::new(Topic::Resource(old.kind(), Action::Deleted), Some(old), None)
    }

    pub fn proxy_broadcast() -> Self {
        Self::new(Topic::ProxyBroadcast, None, None)
    }

    pub fn schedule_proxy_broadcast() -> Self {
        Self::new(Topic::ScheduleProxyBroadcast, None, None)
    }

    /// Returns false if this is an update whose old and new payloads are identical, i.e. a resync
    /// that carries no change.
    pub fn is_delta(&self) -> bool {
        !(self.topic.action() == Some(Action::Updated) && self.old == self.new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::ObjectMeta;

    fn mk_ns(name: &str, labels: &[(&str, &str)]) -> Resource {
        Resource::Namespace(k8s::Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn topic_display() {
        assert_eq!(
            Topic::Resource(Kind::Pod, Action::Updated).to_string(),
            "PodUpdated"
        );
        assert_eq!(
            Topic::Resource(Kind::TrafficTarget, Action::Added).to_string(),
            "TrafficTargetAdded"
        );
        assert_eq!(Topic::ProxyBroadcast.to_string(), "ProxyBroadcast");
    }

    #[test]
    fn identical_update_is_not_a_delta() {
        let msg = Message::updated(mk_ns("ns-0", &[]), mk_ns("ns-0", &[]));
        assert!(!msg.is_delta());

        let msg = Message::updated(mk_ns("ns-0", &[]), mk_ns("ns-0", &[("a", "b")]));
        assert!(msg.is_delta());
    }

    #[test]
    fn additions_and_deletions_are_always_deltas() {
        assert!(Message::added(mk_ns("ns-0", &[])).is_delta());
        assert!(Message::deleted(mk_ns("ns-0", &[])).is_delta());
        assert!(Message::schedule_proxy_broadcast().is_delta());
    }

    #[test]
    fn all_changes_covers_every_resource_topic() {
        let topics = Topic::all_changes().collect::<Vec<_>>();
        assert_eq!(topics.len(), Kind::ALL.len() * 3 + 1);
        assert!(topics.contains(&Topic::Resource(Kind::Ingress, Action::Deleted)));
        assert!(topics.contains(&Topic::ScheduleProxyBroadcast));
        assert!(!topics.contains(&Topic::ProxyBroadcast));
    }
}
