use crate::{ConfigPush, PoolClosed, PushJob, WorkerPool};
use mesh_sync_core::{Bus, Message, Proxy, Scope};
use mesh_sync_k8s_index::SharedIndex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Turns broadcast scopes into configuration pushes.
pub struct Dispatcher<P> {
    index: SharedIndex,
    bus: Bus,
    pool: WorkerPool,
    push: Arc<P>,
}

impl<P: ConfigPush> Dispatcher<P> {
    pub fn new(index: SharedIndex, bus: Bus, pool: WorkerPool, push: Arc<P>) -> Self {
        Self {
            index,
            bus,
            pool,
            push,
        }
    }

    /// Dispatches scopes until the coordinator stops sending them.
    pub async fn run(self, mut scopes: mpsc::UnboundedReceiver<Scope>) {
        while let Some(scope) = scopes.recv().await {
            if let Err(error) = self.dispatch(scope).await {
                tracing::warn!(%error, "Stopping dispatcher");
                return;
            }
        }
        tracing::debug!("Scope channel closed");
    }

    /// Dispatches a single scope, returning the number of jobs submitted.
    ///
    /// A global scope is published as a proxy broadcast, which every proxy-facing consumer
    /// handles by refreshing all proxies. Otherwise one job is submitted for each proxy registered
    /// in the scope's namespaces.
    pub async fn dispatch(&self, scope: Scope) -> Result<usize, PoolClosed> {
        if scope.global {
            let subscribers = self.bus.publish(Message::proxy_broadcast());
            tracing::debug!(subscribers, "Published proxy broadcast");
            return Ok(0);
        }

        // The read lock is released before submitting so that a full queue cannot hold up index
        // writers.
        let proxies = self.index.with_read(|idx| {
            scope
                .namespaces
                .iter()
                .flat_map(|ns| {
                    let proxies = idx.proxies_in(ns).cloned().collect::<Vec<_>>();
                    if proxies.is_empty() {
                        tracing::trace!(namespace = %ns, "No registered proxies");
                    }
                    proxies
                })
                .collect::<Vec<Proxy>>()
        });

        let jobs = proxies.len();
        for proxy in proxies {
            self.pool
                .submit(Box::new(PushJob::new(proxy, self.push.clone())))
                .await?;
        }
        tracing::debug!(namespaces = scope.namespaces.len(), jobs, "Dispatched");
        Ok(jobs)
    }
}
