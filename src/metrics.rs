use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, TextEncoder, register_counter, register_gauge,
    register_histogram,
};
use tracing::warn;

lazy_static! {
    pub static ref PROMPTS_TOTAL: Counter =
        register_counter!("nekebot_prompts_total", "Prompts submitted to the governor").unwrap();
    pub static ref PROMPTS_DENIED: Counter =
        register_counter!("nekebot_prompts_denied_total", "Prompts refused by the rate limit").unwrap();
    pub static ref BLOCKS_ENTERED: Counter =
        register_counter!("nekebot_blocks_total", "Times the quota was exhausted").unwrap();
    pub static ref UPSTREAM_FAILURES: Counter =
        register_counter!("nekebot_upstream_failures_total", "Failed generateContent calls").unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "nekebot_upstream_latency_seconds",
        "generateContent latency in seconds"
    )
    .unwrap();
    pub static ref BLOCKED: Gauge =
        register_gauge!("nekebot_blocked", "1 while sends are blocked").unwrap();
}

/// Prometheus text exposition of every registered metric.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
