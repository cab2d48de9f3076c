use crate::{ByNamespace, TrafficTargets};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use kubert::index::{IndexClusterResource, IndexNamespacedResource};
use mesh_sync_core::{CommonName, Proxy};
use mesh_sync_k8s_api::{self as k8s, smi, ResourceExt};
use std::sync::Arc;

/// Holds all indexing state. Owned and updated by the coordinator, which processes bus events.
#[derive(Debug, Default)]
pub struct Index {
    namespaces: HashMap<String, k8s::Namespace>,
    pods: ByNamespace<k8s::Pod>,
    services: ByNamespace<k8s::Service>,
    endpoints: ByNamespace<k8s::Endpoints>,
    traffic_splits: ByNamespace<smi::TrafficSplit>,
    route_groups: ByNamespace<smi::HTTPRouteGroup>,

    /// Connected proxies by namespace and certificate common name.
    proxies: ByNamespace<Proxy>,

    traffic_targets: TrafficTargets,
}

// === impl Index ===

impl Index {
    /// Returns the namespaces that may send traffic to, or receive traffic from, `ns`. Unknown
    /// namespaces have no relations.
    pub fn related_namespaces(&self, ns: &str) -> HashSet<String> {
        self.traffic_targets.related(ns)
    }

    /// Records that `src` may send traffic to `dst`, as granted by `target`, on both sides of the
    /// namespace graph.
    pub fn add_traffic_target_edge(&mut self, dst: &str, src: &str, target: &Arc<smi::TrafficTarget>) {
        self.traffic_targets.add_edge(dst, src, target);
    }

    /// Adds or replaces a `TrafficTarget`, returning every namespace named by its previous and
    /// current edges.
    pub fn apply_traffic_target(&mut self, target: smi::TrafficTarget) -> HashSet<String> {
        let id = target.id();
        let touched = self.traffic_targets.apply(target);
        tracing::debug!(%id, namespaces = touched.len(), "indexed traffic target");
        touched
    }

    /// Removes a `TrafficTarget` by `namespace/name` id, returning the namespaces its edges named.
    pub fn delete_traffic_target(&mut self, id: &str) -> HashSet<String> {
        let touched = self.traffic_targets.delete(id);
        tracing::debug!(%id, namespaces = touched.len(), "removed traffic target");
        touched
    }

    /// Registers a proxy under its namespace, replacing any proxy with the same common name.
    ///
    /// A proxy that moved to another namespace is removed from its former namespace.
    pub fn apply_proxy(&mut self, namespace: impl Into<String>, proxy: Proxy) -> Option<Proxy> {
        let namespace = namespace.into();
        let previous = self.delete_proxy(&proxy.common_name).map(|(_, p)| p);
        tracing::debug!(proxy = %proxy.common_name, %namespace, "registered proxy");
        self.proxies
            .insert(namespace, proxy.common_name.to_string(), proxy);
        previous
    }

    /// Removes a proxy by common name, returning its namespace.
    pub fn delete_proxy(&mut self, cn: &CommonName) -> Option<(String, Proxy)> {
        self.proxies.remove_where(|p| p.common_name == *cn)
    }

    /// Finds the namespace under which a proxy is registered.
    pub fn proxy_namespace(&self, cn: &CommonName) -> Option<&str> {
        self.proxies
            .iter()
            .find(|(_, _, p)| p.common_name == *cn)
            .map(|(ns, _, _)| ns)
    }

    pub fn proxies_in<'a>(&'a self, ns: &str) -> impl Iterator<Item = &'a Proxy> + 'a {
        self.proxies.in_namespace(ns).map(|(_, p)| p)
    }

    /// Removes a namespace along with every resource, proxy and traffic edge that references it.
    pub fn delete_namespace(&mut self, name: &str) {
        self.namespaces.remove(name);
        let pods = self.pods.remove_namespace(name);
        let services = self.services.remove_namespace(name);
        self.endpoints.remove_namespace(name);
        self.traffic_splits.remove_namespace(name);
        self.route_groups.remove_namespace(name);
        let proxies = self.proxies.remove_namespace(name);
        self.traffic_targets.remove_namespace(name);
        tracing::debug!(namespace = %name, pods, services, proxies, "removed namespace");
    }

    pub fn get_namespace(&self, name: &str) -> Option<&k8s::Namespace> {
        self.namespaces.get(name)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn pods(&self) -> &ByNamespace<k8s::Pod> {
        &self.pods
    }

    pub fn services(&self) -> &ByNamespace<k8s::Service> {
        &self.services
    }

    pub fn endpoints(&self) -> &ByNamespace<k8s::Endpoints> {
        &self.endpoints
    }

    pub fn traffic_splits(&self) -> &ByNamespace<smi::TrafficSplit> {
        &self.traffic_splits
    }

    pub fn route_groups(&self) -> &ByNamespace<smi::HTTPRouteGroup> {
        &self.route_groups
    }

    pub fn proxies(&self) -> &ByNamespace<Proxy> {
        &self.proxies
    }

    pub fn traffic_targets(&self) -> &TrafficTargets {
        &self.traffic_targets
    }
}

impl IndexClusterResource<k8s::Namespace> for Index {
    fn apply(&mut self, ns: k8s::Namespace) {
        let name = ns.name_any();
        tracing::trace!(namespace = %name, "indexing namespace");
        self.namespaces.insert(name, ns);
    }

    fn delete(&mut self, name: String) {
        self.delete_namespace(&name);
    }
}

impl IndexNamespacedResource<k8s::Pod> for Index {
    fn apply(&mut self, pod: k8s::Pod) {
        apply_namespaced(&mut self.pods, pod)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.pods.remove(&namespace, &name);
    }
}

impl IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, svc: k8s::Service) {
        apply_namespaced(&mut self.services, svc)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.services.remove(&namespace, &name);
    }
}

impl IndexNamespacedResource<k8s::Endpoints> for Index {
    fn apply(&mut self, endpoints: k8s::Endpoints) {
        apply_namespaced(&mut self.endpoints, endpoints)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.endpoints.remove(&namespace, &name);
    }
}

impl IndexNamespacedResource<smi::TrafficSplit> for Index {
    fn apply(&mut self, split: smi::TrafficSplit) {
        apply_namespaced(&mut self.traffic_splits, split)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.traffic_splits.remove(&namespace, &name);
    }
}

impl IndexNamespacedResource<smi::HTTPRouteGroup> for Index {
    fn apply(&mut self, group: smi::HTTPRouteGroup) {
        apply_namespaced(&mut self.route_groups, group)
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.route_groups.remove(&namespace, &name);
    }
}

impl IndexNamespacedResource<smi::TrafficTarget> for Index {
    fn apply(&mut self, target: smi::TrafficTarget) {
        self.apply_traffic_target(target);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_traffic_target(&format!("{namespace}/{name}"));
    }
}

fn apply_namespaced<T: ResourceExt>(index: &mut ByNamespace<T>, resource: T) {
    let name = resource.name_any();
    let Some(ns) = resource.namespace() else {
        tracing::warn!(%name, "ignoring resource without a namespace");
        return;
    };
    tracing::trace!(namespace = %ns, %name, "indexing");
    index.insert(ns, name, resource);
}
