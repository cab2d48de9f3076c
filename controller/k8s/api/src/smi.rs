//! Service Mesh Interface resources.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grants a set of source identities access to a destination identity.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "access.smi-spec.io",
    version = "v1alpha3",
    kind = "TrafficTarget",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTargetSpec {
    pub destination: IdentityBindingSubject,
    #[serde(default)]
    pub sources: Vec<IdentityBindingSubject>,
    #[serde(default)]
    pub rules: Vec<TrafficTargetRule>,
}

/// An identity (typically a `ServiceAccount`) bound by a `TrafficTarget`.
#[derive(Clone, Debug, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityBindingSubject {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub port: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTargetRule {
    pub kind: String,
    pub name: String,
    pub matches: Option<Vec<String>>,
}

/// Splits traffic for a root service across weighted backends.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "split.smi-spec.io",
    version = "v1alpha2",
    kind = "TrafficSplit",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSplitSpec {
    pub service: String,
    #[serde(default)]
    pub backends: Vec<TrafficSplitBackend>,
    pub matches: Option<Vec<RouteRef>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSplitBackend {
    pub service: String,
    pub weight: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteRef {
    pub kind: String,
    pub name: String,
}

/// Describes HTTP traffic by method, path and headers.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "specs.smi-spec.io",
    version = "v1alpha4",
    kind = "HTTPRouteGroup",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteGroupSpec {
    #[serde(default)]
    pub matches: Vec<HttpMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatch {
    pub name: String,
    pub methods: Option<Vec<String>>,
    pub path_regex: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

/// Describes TCP traffic by destination port.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "specs.smi-spec.io",
    version = "v1alpha4",
    kind = "TCPRoute",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouteSpec {
    pub matches: Option<TcpMatch>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TcpMatch {
    pub name: Option<String>,
    pub ports: Option<Vec<i32>>,
}

// === impl TrafficTarget ===

impl TrafficTarget {
    /// Identifies the target uniquely across the cluster as `namespace/name`.
    pub fn id(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// The namespace of the destination identity. Defaults to the target's own namespace.
    pub fn destination_namespace(&self) -> String {
        self.spec
            .destination
            .namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_default()
    }

    /// The namespaces of all source identities, in declaration order.
    pub fn source_namespaces(&self) -> impl Iterator<Item = String> + '_ {
        self.spec.sources.iter().map(move |src| {
            src.namespace
                .clone()
                .or_else(|| self.namespace())
                .unwrap_or_default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn subject(namespace: Option<&str>) -> IdentityBindingSubject {
        IdentityBindingSubject {
            kind: "ServiceAccount".to_string(),
            name: "sa".to_string(),
            namespace: namespace.map(Into::into),
            port: None,
        }
    }

    #[test]
    fn traffic_target_namespaces_default_to_own_namespace() {
        let tt = TrafficTarget {
            metadata: ObjectMeta {
                namespace: Some("ns-server".to_string()),
                name: Some("t1".to_string()),
                ..Default::default()
            },
            spec: TrafficTargetSpec {
                destination: subject(None),
                sources: vec![subject(Some("ns-client")), subject(None)],
                rules: vec![],
            },
        };
        assert_eq!(tt.id(), "ns-server/t1");
        assert_eq!(tt.destination_namespace(), "ns-server");
        assert_eq!(
            tt.source_namespaces().collect::<Vec<_>>(),
            vec!["ns-client".to_string(), "ns-server".to_string()]
        );
    }

    #[test]
    fn deserializes_traffic_target() {
        let tt: TrafficTarget = serde_json::from_value(serde_json::json!({
            "apiVersion": "access.smi-spec.io/v1alpha3",
            "kind": "TrafficTarget",
            "metadata": { "name": "t1", "namespace": "ns-server" },
            "spec": {
                "destination": { "kind": "ServiceAccount", "name": "server", "namespace": "ns-server" },
                "sources": [{ "kind": "ServiceAccount", "name": "client", "namespace": "ns-client" }],
                "rules": [{ "kind": "HTTPRouteGroup", "name": "routes", "matches": ["all"] }]
            }
        }))
        .expect("valid TrafficTarget");
        assert_eq!(tt.spec.sources.len(), 1);
        assert_eq!(tt.spec.rules[0].matches, Some(vec!["all".to_string()]));
    }
}
