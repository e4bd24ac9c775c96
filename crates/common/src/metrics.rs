use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    messages_sent: CounterVec,
    bytes_sent: CounterVec,
    send_retries: CounterVec,
    messages_received: CounterVec,
    records_routed: CounterVec,
    records_decoded: CounterVec,
    aggregate_merges: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// `kind` is `data` or `signal`.
    pub fn record_message_sent(&self, task: usize, kind: &str, bytes: usize) {
        let task = task.to_string();
        self.inner
            .messages_sent
            .with_label_values(&[task.as_str(), kind])
            .inc();
        self.inner
            .bytes_sent
            .with_label_values(&[task.as_str(), kind])
            .inc_by(bytes as f64);
    }

    pub fn inc_send_retries(&self, task: usize, target: usize) {
        self.inner
            .send_retries
            .with_label_values(&[&task.to_string(), &target.to_string()])
            .inc();
    }

    pub fn record_message_received(&self, task: usize, kind: &str) {
        self.inner
            .messages_received
            .with_label_values(&[&task.to_string(), kind])
            .inc();
    }

    /// `destination` is `local` or `remote`.
    pub fn record_routed(&self, task: usize, destination: &str) {
        self.inner
            .records_routed
            .with_label_values(&[&task.to_string(), destination])
            .inc();
    }

    pub fn record_decoded(&self, task: usize) {
        self.inner
            .records_decoded
            .with_label_values(&[&task.to_string()])
            .inc();
    }

    pub fn record_aggregate_merges(&self, task: usize, kind: &str, merges: u64) {
        self.inner
            .aggregate_merges
            .with_label_values(&[&task.to_string(), kind])
            .inc_by(merges as f64);
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let messages_sent = counter_vec(
            &registry,
            "graphex_messages_sent_total",
            "Messages delivered to peer workers",
            &["task", "kind"],
        );
        let bytes_sent = counter_vec(
            &registry,
            "graphex_message_bytes_sent_total",
            "Payload bytes delivered to peer workers",
            &["task", "kind"],
        );
        let send_retries = counter_vec(
            &registry,
            "graphex_send_retries_total",
            "Failed delivery attempts that were retried",
            &["task", "target"],
        );
        let messages_received = counter_vec(
            &registry,
            "graphex_messages_received_total",
            "Messages pushed into inbound channels",
            &["task", "kind"],
        );
        let records_routed = counter_vec(
            &registry,
            "graphex_records_routed_total",
            "Records routed by send operators",
            &["task", "destination"],
        );
        let records_decoded = counter_vec(
            &registry,
            "graphex_records_decoded_total",
            "Records rebuilt from inbound payloads",
            &["task"],
        );
        let aggregate_merges = counter_vec(
            &registry,
            "graphex_aggregate_merges_total",
            "Partial aggregate states merged on the aggregate target",
            &["task", "kind"],
        );

        Self {
            registry,
            messages_sent,
            bytes_sent,
            send_retries,
            messages_received,
            records_routed,
            records_decoded,
            aggregate_merges,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_exchange_metric_families() {
        let m = MetricsRegistry::new();
        m.record_message_sent(1, "data", 128);
        m.record_message_sent(1, "signal", 8);
        m.inc_send_retries(1, 2);
        m.record_message_received(2, "data");
        m.record_routed(1, "local");
        m.record_routed(1, "remote");
        m.record_decoded(2);
        m.record_aggregate_merges(0, "count", 2);
        let text = m.render_prometheus();

        assert!(text.contains("graphex_messages_sent_total"));
        assert!(text.contains("graphex_message_bytes_sent_total"));
        assert!(text.contains("graphex_send_retries_total"));
        assert!(text.contains("graphex_messages_received_total"));
        assert!(text.contains("graphex_records_routed_total"));
        assert!(text.contains("graphex_records_decoded_total"));
        assert!(text.contains("graphex_aggregate_merges_total"));
        assert!(text.contains("signal"));
    }
}
