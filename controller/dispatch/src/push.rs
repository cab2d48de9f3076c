use crate::Job;
use ahash::AHashMap as HashMap;
use mesh_sync_core::{CommonName, Proxy};
use parking_lot::RwLock;
use std::sync::Arc;

/// Delivers fresh configuration to a proxy.
#[async_trait::async_trait]
pub trait ConfigPush: Send + Sync + 'static {
    async fn push(&self, proxy: &Proxy);
}

/// Tracks the configuration version each proxy should be serving.
///
/// Every push bumps the proxy's version. The discovery layer compares a proxy's acknowledged
/// version against this one to decide whether a new snapshot must be sent.
#[derive(Clone, Debug, Default)]
pub struct SnapshotVersions(Arc<RwLock<HashMap<CommonName, u64>>>);

/// Pushes configuration to a single proxy.
pub struct PushJob<P> {
    proxy: Proxy,
    push: Arc<P>,
}

// === impl SnapshotVersions ===

impl SnapshotVersions {
    pub fn version(&self, cn: &CommonName) -> Option<u64> {
        self.0.read().get(cn).copied()
    }

    /// Forgets a disconnected proxy.
    pub fn remove(&self, cn: &CommonName) -> Option<u64> {
        self.0.write().remove(cn)
    }
}

#[async_trait::async_trait]
impl ConfigPush for SnapshotVersions {
    async fn push(&self, proxy: &Proxy) {
        let version = {
            let mut versions = self.0.write();
            let version = versions.entry(proxy.common_name.clone()).or_default();
            *version += 1;
            *version
        };
        tracing::debug!(proxy = %proxy.common_name, version, "Bumped config version");
    }
}

// === impl PushJob ===

impl<P> PushJob<P> {
    pub fn new(proxy: Proxy, push: Arc<P>) -> Self {
        Self { proxy, push }
    }
}

#[async_trait::async_trait]
impl<P: ConfigPush> Job for PushJob<P> {
    fn name(&self) -> String {
        format!("push {}", self.proxy.common_name)
    }

    fn hash(&self) -> u64 {
        self.proxy.common_name.hash64()
    }

    async fn run(self: Box<Self>) {
        self.push.push(&self.proxy).await;
    }
}
