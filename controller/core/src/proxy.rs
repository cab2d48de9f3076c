use crate::PROXY_UUID_LABEL;
use mesh_sync_k8s_api::{self as k8s, ResourceExt};
use std::{fmt, hash::Hasher};

/// The common name of a proxy's certificate, formatted as
/// `<proxy-uuid>.<service-account>.<namespace>[.<trust-domain>]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommonName(String);

/// A connected sidecar proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proxy {
    pub common_name: CommonName,
    pub serial_number: String,
}

/// References a `Service` by namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid proxy common name: {0}")]
pub struct InvalidCommonName(pub CommonName);

#[derive(Clone, Debug, thiserror::Error)]
#[error("pod {namespace}/{name} has no proxy uuid label; not a mesh pod")]
pub struct NotMeshPod {
    pub namespace: String,
    pub name: String,
}

/// Hashes a proxy identity with 64-bit FNV-1a.
///
/// The hash is stable across processes so that all work for one proxy maps to the same worker.
pub fn identity_hash(s: &str) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

// === impl CommonName ===

impl CommonName {
    pub fn new(cn: impl Into<String>) -> Self {
        Self(cn.into())
    }

    /// Builds the common name of a proxy from its parts.
    pub fn from_parts(uuid: &str, service_account: &str, namespace: &str) -> Self {
        Self(format!("{uuid}.{service_account}.{namespace}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the common name into its `(proxy uuid, service account, namespace)` parts.
    pub fn parse_parts(&self) -> Result<(&str, &str, &str), InvalidCommonName> {
        let mut parts = self.0.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(uuid), Some(sa), Some(ns))
                if !uuid.is_empty() && !sa.is_empty() && !ns.is_empty() =>
            {
                Ok((uuid, sa, ns))
            }
            _ => Err(InvalidCommonName(self.clone())),
        }
    }

    pub fn hash64(&self) -> u64 {
        identity_hash(&self.0)
    }
}

impl fmt::Display for CommonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommonName {
    fn from(cn: &str) -> Self {
        Self::new(cn)
    }
}

// === impl Proxy ===

impl Proxy {
    pub fn new(common_name: CommonName, serial_number: impl Into<String>) -> Self {
        Self {
            common_name,
            serial_number: serial_number.into(),
        }
    }

    /// Infers the proxy of a mesh pod from its proxy UUID label, service account and namespace.
    ///
    /// Only the common name is meaningful for proxies built this way.
    pub fn from_pod(pod: &k8s::Pod) -> Result<Self, NotMeshPod> {
        let namespace = pod.namespace().unwrap_or_default();
        let uuid = match pod.labels().get(PROXY_UUID_LABEL) {
            Some(uuid) => uuid,
            None => {
                return Err(NotMeshPod {
                    namespace,
                    name: pod.name_any(),
                })
            }
        };
        let service_account = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.service_account_name.as_deref())
            .unwrap_or("default");
        Ok(Self::new(
            CommonName::from_parts(uuid, service_account, &namespace),
            "",
        ))
    }
}

// === impl ServiceRef ===

impl ServiceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
