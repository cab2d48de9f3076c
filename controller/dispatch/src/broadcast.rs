use crate::{ConfigPush, PushJob, WorkerPool};
use ahash::AHashMap as HashMap;
use mesh_sync_core::{CommonName, Proxy, Subscription};
use mesh_sync_k8s_api as k8s;
use mesh_sync_k8s_index::SharedIndex;
use std::sync::Arc;

/// Lists the workloads that make up the mesh.
pub trait Workloads: Send + Sync + 'static {
    fn list_pods(&self) -> Vec<k8s::Pod>;

    fn list_services(&self) -> Vec<k8s::Service>;

    /// The proxies registered with their full certificate common names.
    fn list_proxies(&self) -> Vec<Proxy>;
}

/// The `(proxy uuid, service account, namespace)` identity shared by every common name issued to
/// one proxy, regardless of trust domain.
type Identity = (String, String, String);

fn identity(cn: &CommonName) -> Option<Identity> {
    let (uuid, sa, ns) = cn.parse_parts().ok()?;
    Some((uuid.to_string(), sa.to_string(), ns.to_string()))
}

/// Refreshes every proxy in the mesh whenever a proxy broadcast is published.
pub struct BroadcastListener<W, P> {
    workloads: W,
    broadcasts: Subscription,
    pool: WorkerPool,
    push: Arc<P>,
}

// === impl BroadcastListener ===

impl<W: Workloads, P: ConfigPush> BroadcastListener<W, P> {
    /// `broadcasts` must be subscribed to the proxy broadcast topic.
    pub fn new(workloads: W, broadcasts: Subscription, pool: WorkerPool, push: Arc<P>) -> Self {
        Self {
            workloads,
            broadcasts,
            pool,
            push,
        }
    }

    pub async fn run(mut self) {
        while self.broadcasts.recv().await.is_some() {
            let proxies = self.proxies();
            let jobs = proxies.len();
            for proxy in proxies {
                let job = PushJob::new(proxy, self.push.clone());
                if self.pool.submit(Box::new(job)).await.is_err() {
                    tracing::warn!("Worker pool closed; stopping broadcast listener");
                    return;
                }
            }
            tracing::info!(jobs, "Refreshing all proxies");
        }
        tracing::debug!("Broadcast subscription closed");
    }

    /// Every registered proxy plus the proxy of each mesh pod not yet registered.
    ///
    /// A registered proxy replaces the pod-derived one with the same identity so that its jobs
    /// carry the same common name, and land on the same worker, as scoped pushes.
    fn proxies(&self) -> Vec<Proxy> {
        let registered = self
            .workloads
            .list_proxies()
            .into_iter()
            .filter_map(|proxy| Some((identity(&proxy.common_name)?, proxy)))
            .collect::<HashMap<_, _>>();

        let mut proxies = Vec::new();
        for pod in self.workloads.list_pods() {
            let proxy = match Proxy::from_pod(&pod) {
                Ok(proxy) => proxy,
                Err(error) => {
                    tracing::debug!(%error, "Skipping pod");
                    continue;
                }
            };
            let registered = identity(&proxy.common_name)
                .map(|id| registered.contains_key(&id))
                .unwrap_or(false);
            if !registered {
                proxies.push(proxy);
            }
        }
        proxies.extend(registered.into_iter().map(|(_, proxy)| proxy));
        proxies
    }
}

// === impl Workloads ===

impl Workloads for SharedIndex {
    fn list_pods(&self) -> Vec<k8s::Pod> {
        self.with_read(|idx| idx.pods().iter().map(|(_, _, pod)| pod.clone()).collect())
    }

    fn list_services(&self) -> Vec<k8s::Service> {
        self.with_read(|idx| {
            idx.services()
                .iter()
                .map(|(_, _, svc)| svc.clone())
                .collect()
        })
    }

    fn list_proxies(&self) -> Vec<Proxy> {
        self.with_read(|idx| {
            idx.proxies()
                .iter()
                .map(|(_, _, proxy)| proxy.clone())
                .collect()
        })
    }
}
