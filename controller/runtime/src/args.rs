use crate::{
    coordinator::{Coordinator, CoordinatorMetrics, Debounce, Resync},
    core::{Bus, Topic, PROXY_UUID_LABEL},
    dispatch::{BroadcastListener, Dispatcher, SnapshotVersions, WorkerPool},
    index::{self, SelectorResolver, SharedIndex},
    k8s::{self, smi},
    watch::{Announce, Watched},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::{runtime::watcher, Client, Resource};
use prometheus_client::registry::Registry;
use std::{num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "mesh-sync",
    about = "Propagates mesh resource changes to proxy configuration"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "mesh_sync=info,warn",
        env = "MESH_SYNC_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Time to wait for further changes before broadcasting proxy updates.
    #[clap(long, default_value = "3000")]
    moving_deadline_ms: u64,

    /// The longest proxy updates may be deferred while changes keep arriving.
    #[clap(long, default_value = "15000")]
    max_deadline_ms: u64,

    /// The number of proxy update workers. Defaults to the number of available CPUs.
    #[clap(long)]
    workers: Option<usize>,

    #[clap(long, default_value = "1024")]
    worker_queue_capacity: usize,

    /// Interval between periodic refreshes of all proxies, in seconds. 0 disables them.
    #[clap(long, default_value = "0")]
    resync_interval_secs: u64,

    /// Label selector for the pods that are part of the mesh.
    #[clap(long, default_value = PROXY_UUID_LABEL)]
    mesh_pod_label: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            moving_deadline_ms,
            max_deadline_ms,
            workers,
            worker_queue_capacity,
            resync_interval_secs,
            mesh_pod_label,
        } = self;

        let debounce = Debounce {
            moving: Duration::from_millis(moving_deadline_ms),
            max: Duration::from_millis(max_deadline_ms),
        };
        if debounce.moving > debounce.max {
            bail!("--moving-deadline-ms must not exceed --max-deadline-ms");
        }
        let resync = Resync::new(Duration::from_secs(resync_interval_secs))?;
        let workers = workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });

        let index = SharedIndex::default();
        let bus = Bus::new();

        let mut prom = <Registry>::default();
        index::metrics::register(prom.sub_registry_with_prefix("index"), index.clone());
        let coordinator_metrics =
            CoordinatorMetrics::register(prom.sub_registry_with_prefix("coordinator"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Subscribe before any watch starts so that no change is missed.
        let changes = bus.subscribe(Topic::all_changes());
        let broadcasts = bus.subscribe([Topic::ProxyBroadcast]);

        // Spawn resource watches.

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        spawn_announce(&bus, namespaces, "namespaces");

        let pods =
            runtime.watch_all::<k8s::Pod>(watcher::Config::default().labels(&mesh_pod_label));
        spawn_announce(&bus, pods, "pods");

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        spawn_announce(&bus, services, "services");

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        spawn_announce(&bus, endpoints, "endpoints");

        let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
        spawn_announce(&bus, ingresses, "ingresses");

        if api_resource_exists::<smi::TrafficTarget>(&runtime.client()).await {
            let targets = runtime.watch_all::<smi::TrafficTarget>(watcher::Config::default());
            spawn_announce(&bus, targets, "traffictargets.access.smi-spec.io");
        } else {
            tracing::warn!(
                "traffictargets.access.smi-spec.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<smi::TrafficSplit>(&runtime.client()).await {
            let splits = runtime.watch_all::<smi::TrafficSplit>(watcher::Config::default());
            spawn_announce(&bus, splits, "trafficsplits.split.smi-spec.io");
        } else {
            tracing::warn!(
                "trafficsplits.split.smi-spec.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<smi::HTTPRouteGroup>(&runtime.client()).await {
            let groups = runtime.watch_all::<smi::HTTPRouteGroup>(watcher::Config::default());
            spawn_announce(&bus, groups, "httproutegroups.specs.smi-spec.io");
        } else {
            tracing::warn!(
                "httproutegroups.specs.smi-spec.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<smi::TCPRoute>(&runtime.client()).await {
            let routes = runtime.watch_all::<smi::TCPRoute>(watcher::Config::default());
            spawn_announce(&bus, routes, "tcproutes.specs.smi-spec.io");
        } else {
            tracing::warn!("tcproutes.specs.smi-spec.io resource kind not found, skipping watches");
        }

        // Spawn the coordinator, which applies changes to the index and decides when to push.
        let (scopes_tx, scopes_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(
            index.clone(),
            SelectorResolver::default(),
            changes,
            scopes_tx,
            debounce,
            coordinator_metrics,
        );
        tokio::spawn(coordinator.run().instrument(info_span!("coordinator")));

        // Spawn the dispatcher and broadcast listener, which share a worker pool so that all pushes
        // to a proxy are serialized.
        let pool = WorkerPool::new(workers, worker_queue_capacity);
        let versions = Arc::new(SnapshotVersions::default());
        let dispatcher =
            Dispatcher::new(index.clone(), bus.clone(), pool.clone(), versions.clone());
        tokio::spawn(
            dispatcher
                .run(scopes_rx)
                .instrument(info_span!("dispatcher")),
        );
        let listener = BroadcastListener::new(index, broadcasts, pool, versions);
        tokio::spawn(listener.run().instrument(info_span!("broadcasts")));

        tokio::spawn(resync.run(bus).instrument(info_span!("resync")));

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn spawn_announce<T: Watched>(
    bus: &Bus,
    events: impl futures::Stream<Item = watcher::Event<T>> + Send + 'static,
    name: &'static str,
) {
    tokio::spawn(
        Announce::new(bus.clone())
            .run(events)
            .instrument(info_span!("watch", resource = name)),
    );
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
