#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod smi;

pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Endpoints, Namespace, Pod, PodSpec, Service, ServiceSpec},
        networking::v1::Ingress,
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time},
};
pub use kube::{Resource, ResourceExt};

/// Returns true if the service's selector matches the pod's labels.
///
/// Services without a selector (e.g. those backed by manually managed endpoints) select nothing.
pub fn service_selects(service: &Service, pod: &Pod) -> bool {
    let selector = match service.spec.as_ref().and_then(|s| s.selector.as_ref()) {
        Some(selector) if !selector.is_empty() => selector,
        _ => return false,
    };
    let labels = pod.labels();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use std::collections::BTreeMap;

    type Map = BTreeMap<String, String>;

    fn mk_pod(labels: Map) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some("ns-0".to_string()),
                name: Some("pod-0".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn mk_service(selector: Option<Map>) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some("ns-0".to_string()),
                name: Some("svc-0".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn service_selects_matching_pod() {
        let pod = mk_pod(btreemap! {
            "app".to_string() => "web".to_string(),
            "tier".to_string() => "fe".to_string(),
        });
        let svc = mk_service(Some(btreemap! { "app".to_string() => "web".to_string() }));
        assert!(service_selects(&svc, &pod));

        let other = mk_service(Some(btreemap! { "app".to_string() => "db".to_string() }));
        assert!(!service_selects(&other, &pod));

        // Every selector label must be present on the pod.
        let narrower = mk_service(Some(btreemap! {
            "app".to_string() => "web".to_string(),
            "version".to_string() => "v2".to_string(),
        }));
        assert!(!service_selects(&narrower, &pod));
    }

    #[test]
    fn service_without_selector_selects_nothing() {
        let pod = mk_pod(btreemap! { "app".to_string() => "web".to_string() });
        assert!(!service_selects(&mk_service(None), &pod));
        assert!(!service_selects(&mk_service(Some(Default::default())), &pod));
    }
}
