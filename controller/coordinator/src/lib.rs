//! The update coordinator.
//!
//! The coordinator is the single consumer of resource changes. Each change is applied to the
//! relationship index and yields a [`Scope`] of affected proxies. Scopes are accumulated into a
//! debounce window that opens with the first change and closes when either:
//!
//! - no further change arrives within the moving deadline (3s by default), or
//! - the max deadline (15s by default) elapses since the window opened.
//!
//! Each further change re-arms the moving deadline but never the max deadline, so bursts of
//! changes are coalesced into one broadcast while a continuous stream of changes still produces a
//! broadcast at least once per max deadline.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod deadline;
mod deferred;
mod handle;
pub mod metrics;
mod ticker;


pub use self::{
    deadline::{Deadline, Debounce},
    handle::HandleError,
    metrics::{CoordinatorMetrics, Trigger},
    ticker::{InvalidResyncInterval, Resync, MIN_RESYNC_INTERVAL},
};
use self::{deferred::DeferredProxies, metrics::Ignored};
use mesh_sync_core::{Message, Scope, Subscription};
use mesh_sync_k8s_index::{ServiceResolver, SharedIndex};
use tokio::{sync::mpsc, time};

pub struct Coordinator<R> {
    index: SharedIndex,
    resolver: R,
    events: Subscription,
    broadcasts: mpsc::UnboundedSender<Scope>,
    debounce: Debounce,
    metrics: CoordinatorMetrics,

    /// The scope accumulated in the current window.
    pending: Scope,
    deferred: DeferredProxies,
    moving: Deadline,
    max: Deadline,
}

enum Wake {
    Message(Message),
    Fired(Trigger),
    Closed,
}

// === impl Coordinator ===

impl<R: ServiceResolver> Coordinator<R> {
    pub fn new(
        index: SharedIndex,
        resolver: R,
        events: Subscription,
        broadcasts: mpsc::UnboundedSender<Scope>,
        debounce: Debounce,
        metrics: CoordinatorMetrics,
    ) -> Self {
        Self {
            index,
            resolver,
            events,
            broadcasts,
            debounce,
            metrics,
            pending: Scope::default(),
            deferred: DeferredProxies::default(),
            moving: Deadline::Disarmed,
            max: Deadline::Disarmed,
        }
    }

    /// Returns true while a debounce window is open.
    pub fn is_scheduled(&self) -> bool {
        self.max.is_armed()
    }

    /// Processes changes and deadlines until the event subscription closes or the broadcast
    /// receiver is dropped.
    pub async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                biased;

                () = self.max.fired() => Wake::Fired(Trigger::Max),
                () = self.moving.fired() => Wake::Fired(Trigger::Moving),
                msg = self.events.recv() => match msg {
                    Some(msg) => Wake::Message(msg),
                    None => Wake::Closed,
                },
            };

            match wake {
                Wake::Message(msg) => self.process(msg),
                Wake::Fired(trigger) => {
                    if self.broadcast(trigger).is_err() {
                        tracing::debug!("Broadcast receiver dropped");
                        return;
                    }
                }
                Wake::Closed => {
                    tracing::debug!("Event subscription closed");
                    return;
                }
            }
        }
    }

    /// Applies a single message to the index and, if it affects any proxies, opens or extends
    /// the debounce window.
    pub fn process(&mut self, msg: Message) {
        let topic = msg.topic;
        self.metrics.event(&topic);

        if !msg.is_delta() {
            tracing::trace!(%topic, "Ignoring unchanged update");
            self.metrics.ignored(Ignored::Resync);
            return;
        }

        let resolver = &self.resolver;
        let deferred = &mut self.deferred;
        let res = self
            .index
            .with_write(|idx| handle::handle(idx, resolver, deferred, &msg));
        self.metrics.set_deferred_proxies(self.deferred.len());
        let scope = match res {
            Ok(scope) => scope,
            Err(error @ HandleError::Malformed { .. }) => {
                tracing::warn!(%error, "Dropping message");
                self.metrics.ignored(Ignored::Malformed);
                return;
            }
        };
        tracing::debug!(
            %topic,
            global = scope.global,
            namespaces = scope.namespaces.len(),
            "Processed change"
        );

        self.pending.merge(scope);
        if self.pending.is_empty() {
            return;
        }

        let now = time::Instant::now();
        if !self.max.is_armed() {
            tracing::debug!(debounce = ?self.debounce, "Scheduling broadcast");
            self.max.arm(now + self.debounce.max);
        }
        self.moving.arm(now + self.debounce.moving);
    }

    /// Closes the debounce window, handing its scope to the dispatcher.
    fn broadcast(&mut self, trigger: Trigger) -> Result<(), mpsc::error::SendError<Scope>> {
        let scope = self.pending.take();
        self.moving.disarm();
        self.max.disarm();

        tracing::info!(
            trigger = trigger.as_str(),
            global = scope.global,
            namespaces = ?scope.namespaces,
            "Broadcasting proxy updates"
        );
        self.metrics.broadcast(trigger, scope.global);
        self.broadcasts.send(scope)
    }
}
