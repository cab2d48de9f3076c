use ahash::AHashMap as HashMap;
use mesh_sync_core::{CommonName, Proxy};

/// Proxies announced before the pod or service that backs them was indexed.
///
/// Deferred proxies are keyed by the namespace named in their common name and are retried each
/// time a pod or service in that namespace is applied.
#[derive(Debug, Default)]
pub(crate) struct DeferredProxies {
    by_namespace: HashMap<String, HashMap<CommonName, Proxy>>,
}

// === impl DeferredProxies ===

impl DeferredProxies {
    /// Holds a proxy for a later retry. Proxies without a namespace in their common name can
    /// never resolve and are dropped.
    pub(crate) fn defer(&mut self, proxy: Proxy) {
        let ns = match proxy.common_name.parse_parts() {
            Ok((_, _, ns)) => ns.to_string(),
            Err(error) => {
                tracing::debug!(%error, "Not deferring proxy");
                return;
            }
        };
        self.by_namespace
            .entry(ns)
            .or_default()
            .insert(proxy.common_name.clone(), proxy);
    }

    pub(crate) fn forget(&mut self, cn: &CommonName) {
        let Ok((_, _, ns)) = cn.parse_parts() else {
            return;
        };
        if let Some(proxies) = self.by_namespace.get_mut(ns) {
            proxies.remove(cn);
            if proxies.is_empty() {
                self.by_namespace.remove(ns);
            }
        }
    }

    pub(crate) fn forget_namespace(&mut self, ns: &str) {
        self.by_namespace.remove(ns);
    }

    /// Removes and returns the proxies deferred in a namespace.
    pub(crate) fn take_namespace(&mut self, ns: &str) -> Vec<Proxy> {
        self.by_namespace
            .remove(ns)
            .map(|proxies| proxies.into_iter().map(|(_, proxy)| proxy).collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_namespace.values().map(|proxies| proxies.len()).sum()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, cn: &CommonName) -> bool {
        self.by_namespace.values().any(|proxies| proxies.contains_key(cn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_proxy(uuid: &str, ns: &str) -> Proxy {
        Proxy::new(CommonName::from_parts(uuid, "sa", ns), "1")
    }

    #[test]
    fn takes_only_the_namespace() {
        let mut deferred = DeferredProxies::default();
        deferred.defer(mk_proxy("1", "ns-a"));
        deferred.defer(mk_proxy("2", "ns-a"));
        deferred.defer(mk_proxy("3", "ns-b"));
        assert_eq!(deferred.len(), 3);

        let mut taken = deferred
            .take_namespace("ns-a")
            .into_iter()
            .map(|p| p.common_name.to_string())
            .collect::<Vec<_>>();
        taken.sort();
        assert_eq!(taken, vec!["1.sa.ns-a", "2.sa.ns-a"]);
        assert_eq!(deferred.len(), 1);
        assert!(deferred.take_namespace("ns-a").is_empty());
    }

    #[test]
    fn forget_removes_a_proxy() {
        let mut deferred = DeferredProxies::default();
        let proxy = mk_proxy("1", "ns-a");
        deferred.defer(proxy.clone());
        deferred.defer(proxy.clone());
        assert_eq!(deferred.len(), 1);

        deferred.forget(&proxy.common_name);
        assert!(!deferred.contains(&proxy.common_name));
        assert_eq!(deferred.len(), 0);

        deferred.defer(mk_proxy("2", "ns-b"));
        deferred.forget_namespace("ns-b");
        assert_eq!(deferred.len(), 0);
    }

    #[test]
    fn invalid_common_names_are_not_deferred() {
        let mut deferred = DeferredProxies::default();
        deferred.defer(Proxy::new(CommonName::new("not-a-proxy"), "1"));
        assert_eq!(deferred.len(), 0);
    }
}
