use crate::MatchIndex;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Debug)]
struct Instrumented(Arc<MatchIndex>);

pub fn register(reg: &mut Registry, index: Arc<MatchIndex>) {
    reg.register_collector(Box::new(Instrumented(index)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (clusters, policies, pairings) = self.0.sizes();

        for (name, help, value) in [
            (
                "clusters",
                "The number of clusters matched by at least one policy",
                clusters,
            ),
            (
                "policies",
                "The number of policies matching at least one cluster",
                policies,
            ),
            ("pairings", "The number of matched pairings", pairings),
        ] {
            let metric_encoder = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            ConstGauge::new(value as i64).encode(metric_encoder)?;
        }

        Ok(())
    }
}
