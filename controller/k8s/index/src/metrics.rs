use crate::{ByNamespace, SharedIndex};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedIndex);

pub fn register(reg: &mut Registry, index: SharedIndex) {
    reg.register_collector(Box::new(Instrumented(index)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        self.0.with_read(|this| {
            encode_sizes(
                &mut encoder,
                "pod_index_size",
                "The number of pods in index",
                this.pods(),
            )?;
            encode_sizes(
                &mut encoder,
                "service_index_size",
                "The number of services in index",
                this.services(),
            )?;
            encode_sizes(
                &mut encoder,
                "endpoints_index_size",
                "The number of endpoints in index",
                this.endpoints(),
            )?;
            encode_sizes(
                &mut encoder,
                "proxy_index_size",
                "The number of connected proxies in index",
                this.proxies(),
            )?;

            let mut edges_encoder = encoder.encode_descriptor(
                "traffic_target_edge_index_size",
                "The number of traffic target edges into a namespace",
                None,
                MetricType::Gauge,
            )?;
            let targets = this.traffic_targets();
            for ns in targets.destinations() {
                let labels = [("namespace", ns)];
                let edges = ConstGauge::new(targets.received_len(ns) as i64);
                edges.encode(edges_encoder.encode_family(&labels)?)?;
            }
            Ok(())
        })
    }
}

fn encode_sizes<T>(
    encoder: &mut DescriptorEncoder<'_>,
    name: &str,
    help: &str,
    resources: &ByNamespace<T>,
) -> Result<(), std::fmt::Error> {
    let mut family = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
    for ns in resources.namespaces() {
        let labels = [("namespace", ns)];
        let size = ConstGauge::new(resources.len_in(ns) as i64);
        size.encode(family.encode_family(&labels)?)?;
    }
    Ok(())
}
