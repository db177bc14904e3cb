//! Prometheus counters for the plane's hot paths.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use manifold_core::{Error, Result};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub audit_entries: IntCounter,
    pub proxied_frames: IntCounter,
    pub summary_batches: IntCounter,
    pub pubsub_dropped: IntCounter,
    pub controllers_unavailable: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let audit_entries = IntCounter::new(
            "manifold_audit_entries_total",
            "Audit log entries written",
        )
        .map_err(metric_err)?;
        let proxied_frames = IntCounter::new(
            "manifold_proxied_frames_total",
            "Frames relayed by the model proxy",
        )
        .map_err(metric_err)?;
        let summary_batches = IntCounter::new(
            "manifold_summary_batches_total",
            "Model summary batches received from controllers",
        )
        .map_err(metric_err)?;
        let pubsub_dropped = IntCounter::new(
            "manifold_pubsub_dropped_total",
            "Summaries dropped because a subscriber was slow",
        )
        .map_err(metric_err)?;
        let controllers_unavailable = IntGauge::new(
            "manifold_controllers_unavailable",
            "Controllers currently marked unavailable",
        )
        .map_err(metric_err)?;

        for collector in [&audit_entries, &proxied_frames, &summary_batches, &pubsub_dropped] {
            registry
                .register(Box::new(collector.clone()))
                .map_err(metric_err)?;
        }
        registry
            .register(Box::new(controllers_unavailable.clone()))
            .map_err(metric_err)?;

        Ok(Self {
            registry,
            audit_entries,
            proxied_frames,
            summary_batches,
            pubsub_dropped,
            controllers_unavailable,
        })
    }

    /// Render the registry in the text exposition format.
    pub fn gather(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_err)?;
        String::from_utf8(buffer).map_err(|e| Error::unspecified(format!("metrics encoding: {e}")))
    }
}

fn metric_err(e: impl std::fmt::Display) -> Error {
    Error::unspecified(format!("metrics: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render() {
        let metrics = Metrics::new().unwrap();
        metrics.audit_entries.inc();
        let text = metrics.gather().unwrap();
        assert!(text.contains("manifold_audit_entries_total 1"));
    }
}
