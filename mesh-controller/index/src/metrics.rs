use crate::Caches;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(Caches);

pub fn register(reg: &mut Registry, caches: Caches) {
    reg.register_collector(Box::new(Instrumented(caches)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let sizes = [
            (
                "destinations_index_size",
                "The number of explicit destinations in index",
                self.0.destinations.len(),
            ),
            (
                "destination_source_proxies_index_size",
                "The number of proxies with explicit destinations in index",
                self.0.destinations.source_proxies_len(),
            ),
            (
                "proxy_configurations_index_size",
                "The number of proxy configurations in index",
                self.0.proxy_configurations.len(),
            ),
            (
                "identities_index_size",
                "The number of proxies with a known workload identity in index",
                self.0.identities.len(),
            ),
            (
                "computed_routes_index_size",
                "The number of computed routes in index",
                self.0.computed_routes.len(),
            ),
            (
                "implicit_destinations_index_size",
                "The number of implicit destinations in index",
                self.0.implicit_destinations.len(),
            ),
            (
                "workload_selectors_index_size",
                "The number of service workload selectors in index",
                self.0.workload_selection.len(),
            ),
        ];

        for (name, help, size) in sizes {
            let gauge = ConstGauge::new(size as u32);
            let gauge_encoder = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            gauge.encode(gauge_encoder)?;
        }

        Ok(())
    }
}
