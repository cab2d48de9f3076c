use mesh_sync_core::Topic;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct CoordinatorMetrics {
    events: Family<TopicLabels, Counter>,
    ignored: Family<IgnoredLabels, Counter>,
    broadcasts: Family<BroadcastLabels, Counter>,
    deferred_proxies: Gauge,
}

/// Why a message did not contribute to a broadcast.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Ignored {
    Resync,
    Malformed,
}

/// The deadline that ended a debounce window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    Moving,
    Max,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TopicLabels {
    topic: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IgnoredLabels {
    reason: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BroadcastLabels {
    trigger: &'static str,
    global: &'static str,
}

// === impl CoordinatorMetrics ===

impl CoordinatorMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let events = Family::default();
        reg.register(
            "events",
            "Count of messages received from the event bus",
            events.clone(),
        );

        let ignored = Family::default();
        reg.register(
            "ignored_events",
            "Count of messages that did not contribute to a broadcast",
            ignored.clone(),
        );

        let broadcasts = Family::default();
        reg.register(
            "broadcasts",
            "Count of debounced proxy update broadcasts",
            broadcasts.clone(),
        );

        let deferred_proxies = Gauge::default();
        reg.register(
            "deferred_proxies",
            "Number of proxies waiting for a pod or service to resolve their namespace",
            deferred_proxies.clone(),
        );

        Self {
            events,
            ignored,
            broadcasts,
            deferred_proxies,
        }
    }

    pub(crate) fn event(&self, topic: &Topic) {
        self.events
            .get_or_create(&TopicLabels {
                topic: topic.to_string(),
            })
            .inc();
    }

    pub(crate) fn ignored(&self, reason: Ignored) {
        let reason = match reason {
            Ignored::Resync => "resync",
            Ignored::Malformed => "malformed",
        };
        self.ignored.get_or_create(&IgnoredLabels { reason }).inc();
    }

    pub(crate) fn set_deferred_proxies(&self, n: usize) {
        self.deferred_proxies.set(n as i64);
    }

    pub(crate) fn broadcast(&self, trigger: Trigger, global: bool) {
        self.broadcasts
            .get_or_create(&BroadcastLabels {
                trigger: trigger.as_str(),
                global: if global { "true" } else { "false" },
            })
            .inc();
    }
}

// === impl Trigger ===

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Moving => "moving",
            Self::Max => "max",
        }
    }
}
