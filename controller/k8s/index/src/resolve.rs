use crate::Index;
use mesh_sync_core::{CommonName, InvalidCommonName, ServiceRef, PROXY_UUID_LABEL};
use mesh_sync_k8s_api::{self as k8s, ResourceExt};

/// Resolves the services backing a proxy from its certificate identity.
pub trait ServiceResolver: Send + Sync + 'static {
    fn services_for_proxy(
        &self,
        index: &Index,
        cn: &CommonName,
    ) -> Result<Vec<ServiceRef>, ResolveError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidCommonName(#[from] InvalidCommonName),

    #[error("no pod in namespace {namespace} has proxy uuid {uuid}")]
    PodNotFound { namespace: String, uuid: String },

    #[error("no service in namespace {namespace} selects pod {pod}")]
    ServiceNotFound { namespace: String, pod: String },
}

/// Resolves a proxy to the services whose selectors match the pod running it.
///
/// The pod is found by the proxy UUID label in the namespace named by the common name.
#[derive(Clone, Debug, Default)]
pub struct SelectorResolver(());

impl ServiceResolver for SelectorResolver {
    fn services_for_proxy(
        &self,
        index: &Index,
        cn: &CommonName,
    ) -> Result<Vec<ServiceRef>, ResolveError> {
        let (uuid, _, namespace) = cn.parse_parts()?;

        let pod = index
            .pods()
            .in_namespace(namespace)
            .map(|(_, pod)| pod)
            .find(|pod| pod.labels().get(PROXY_UUID_LABEL).map(String::as_str) == Some(uuid))
            .ok_or_else(|| ResolveError::PodNotFound {
                namespace: namespace.to_string(),
                uuid: uuid.to_string(),
            })?;

        let mut services = index
            .services()
            .in_namespace(namespace)
            .filter(|(_, svc)| k8s::service_selects(svc, pod))
            .map(|(name, _)| ServiceRef::new(namespace, name))
            .collect::<Vec<_>>();
        if services.is_empty() {
            return Err(ResolveError::ServiceNotFound {
                namespace: namespace.to_string(),
                pod: pod.name_any(),
            });
        }
        services.sort();
        Ok(services)
    }
}
