use crate::{Message, Topic};
use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A topic-based publish/subscribe channel.
///
/// Each subscriber receives, in publish order, every message whose topic it subscribed to.
/// Publishing never blocks: subscribers are fed by unbounded queues.
#[derive(Clone, Debug, Default)]
pub struct Bus(Arc<Mutex<Vec<Subscriber>>>);

/// Receives the messages published on a [`Bus`] for a set of topics.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
}

#[derive(Debug)]
struct Subscriber {
    topics: HashSet<Topic>,
    tx: mpsc::UnboundedSender<Message>,
}

// === impl Bus ===

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topics: impl IntoIterator<Item = Topic>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let topics = topics.into_iter().collect::<HashSet<_>>();
        tracing::trace!(topics = topics.len(), "subscribing");
        self.0.lock().push(Subscriber { topics, tx });
        Subscription { rx }
    }

    /// Delivers the message to all subscribers of its topic, returning the number of subscribers
    /// that received it.
    pub fn publish(&self, msg: Message) -> usize {
        let mut subscribers = self.0.lock();
        // Subscribers whose receivers have been dropped are pruned as we go.
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for sub in subscribers.iter().filter(|s| s.topics.contains(&msg.topic)) {
            if sub.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        tracing::trace!(topic = %msg.topic, delivered, "published");
        delivered
    }

    pub fn subscribers(&self) -> usize {
        self.0.lock().iter().filter(|s| !s.tx.is_closed()).count()
    }
}

// === impl Subscription ===

impl Subscription {
    /// Waits for the next message. Returns `None` once every [`Bus`] handle has been dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, Kind};
    use tokio_test::assert_pending;

    #[tokio::test]
    async fn delivers_only_subscribed_topics() {
        let bus = Bus::new();
        let mut pods = bus.subscribe(Kind::Pod.topics());
        let mut broadcasts = bus.subscribe([Topic::ProxyBroadcast]);

        let msg = Message::new(Topic::Resource(Kind::Pod, Action::Deleted), None, None);
        assert_eq!(bus.publish(msg.clone()), 1);
        assert_eq!(bus.publish(Message::proxy_broadcast()), 1);

        assert_eq!(pods.recv().await, Some(msg));
        assert_eq!(pods.try_recv(), None);
        assert_eq!(broadcasts.recv().await, Some(Message::proxy_broadcast()));
    }

    #[tokio::test]
    async fn preserves_publish_order() {
        let bus = Bus::new();
        let mut sub = bus.subscribe(Topic::all_changes());
        let topics = [
            Topic::Resource(Kind::Namespace, Action::Added),
            Topic::Resource(Kind::Pod, Action::Added),
            Topic::ScheduleProxyBroadcast,
        ];
        for topic in topics {
            bus.publish(Message::new(topic, None, None));
        }
        for topic in topics {
            assert_eq!(sub.recv().await.map(|m| m.topic), Some(topic));
        }
    }

    #[tokio::test]
    async fn prunes_dropped_subscribers() {
        let bus = Bus::new();
        let sub = bus.subscribe([Topic::ProxyBroadcast]);
        assert_eq!(bus.subscribers(), 1);
        drop(sub);
        assert_eq!(bus.publish(Message::proxy_broadcast()), 0);
        assert_eq!(bus.subscribers(), 0);
    }

    #[tokio::test]
    async fn subscription_closes_with_bus() {
        let bus = Bus::new();
        let mut sub = bus.subscribe([Topic::ProxyBroadcast]);
        let mut recv = tokio_test::task::spawn(async move { sub.recv().await });
        assert_pending!(recv.poll());
        drop(bus);
        assert_eq!(recv.await, None);
    }
}
