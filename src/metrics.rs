//! Prometheus metrics for client operations

use prometheus::{
    HistogramOpts, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};

/// Client metrics; one instance may be shared by a client and its clones
pub struct ClientMetrics {
    pub registry: Registry,

    // Operation counters, labelled by operation name
    pub operations: IntCounterVec,

    // Hit/miss counters
    pub get_hits: IntCounter,
    pub get_misses: IntCounter,

    // Failure counters, labelled by operation name
    pub soft_failures: IntCounterVec,
    pub hard_failures: IntCounterVec,

    // Compression counters
    pub values_compressed: IntCounter,
    pub compression_saved_bytes: IntCounter,
    pub values_decompressed: IntCounter,

    // Latency histograms
    pub op_latency: HistogramVec,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("valid counter definition")
}

fn counter_vec(name: &str, help: &str) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), &["op"]).expect("valid counter definition")
}

impl ClientMetrics {
    /// Create a new metrics instance with its own registry
    pub fn new() -> Self {
        let registry = Registry::new();

        let operations = counter_vec("mcpipe_operations_total", "Total client operations");

        let get_hits = counter("mcpipe_get_hits_total", "Total keys found by fetches");
        let get_misses = counter("mcpipe_get_misses_total", "Total keys missed by fetches");

        let soft_failures = counter_vec(
            "mcpipe_soft_failures_total",
            "Records the cache declined (not stored, not found, bad key)",
        );
        let hard_failures = counter_vec(
            "mcpipe_hard_failures_total",
            "Operations that raised a cache error",
        );

        let values_compressed =
            counter("mcpipe_values_compressed_total", "Total values stored compressed");
        let compression_saved_bytes = counter(
            "mcpipe_compression_saved_bytes_total",
            "Bytes saved by compressing stored values",
        );
        let values_decompressed =
            counter("mcpipe_values_decompressed_total", "Total values inflated on read");

        let op_latency = HistogramVec::new(
            HistogramOpts::new("mcpipe_op_latency_seconds", "Operation latency in seconds")
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ]),
            &["op"],
        )
        .expect("valid histogram definition");

        // Register all metrics
        for collector in [
            Box::new(operations.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(get_hits.clone()),
            Box::new(get_misses.clone()),
            Box::new(soft_failures.clone()),
            Box::new(hard_failures.clone()),
            Box::new(values_compressed.clone()),
            Box::new(compression_saved_bytes.clone()),
            Box::new(values_decompressed.clone()),
            Box::new(op_latency.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique within the registry");
        }

        Self {
            registry,
            operations,
            get_hits,
            get_misses,
            soft_failures,
            hard_failures,
            values_compressed,
            compression_saved_bytes,
            values_decompressed,
            op_latency,
        }
    }

    /// Count an operation and time it until the returned timer drops
    pub fn start(&self, op: &str) -> HistogramTimer {
        self.operations.with_label_values(&[op]).inc();
        self.op_latency.with_label_values(&[op]).start_timer()
    }

    pub fn soft_failure(&self, op: &str) {
        self.soft_failures.with_label_values(&[op]).inc();
    }

    pub fn hard_failure(&self, op: &str) {
        self.hard_failures.with_label_values(&[op]).inc();
    }

    pub fn compressed(&self, original: usize, stored: usize) {
        self.values_compressed.inc();
        self.compression_saved_bytes
            .inc_by(original.saturating_sub(stored) as u64);
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ClientMetrics::new();
        drop(metrics.start("get"));
        metrics.get_hits.inc();
        metrics.soft_failure("set_multi");

        let output = metrics.gather();
        assert!(output.contains("mcpipe_operations_total{op=\"get\"} 1"));
        assert!(output.contains("mcpipe_get_hits_total 1"));
        assert!(output.contains("mcpipe_soft_failures_total{op=\"set_multi\"} 1"));
        assert!(output.contains("mcpipe_op_latency_seconds"));
    }

    #[test]
    fn test_compression_counters() {
        let metrics = ClientMetrics::new();
        metrics.compressed(1000, 100);
        assert_eq!(metrics.values_compressed.get(), 1);
        assert_eq!(metrics.compression_saved_bytes.get(), 900);
    }
}
