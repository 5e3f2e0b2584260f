//! Prometheus metrics integration

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram, register_int_counter, register_int_gauge, Encoder, Histogram,
    HistogramOpts, IntCounter, IntGauge, TextEncoder,
};

// Define metrics
static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "mesh_messages_sent_total",
        "Total number of messages queued for delivery"
    ))
    .expect("Failed to create messages sent counter")
});

static MESSAGES_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "mesh_messages_received_total",
        "Total number of messages dispatched from peers"
    ))
    .expect("Failed to create messages received counter")
});

static LINK_GONE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "mesh_link_gone_total",
        "Total number of sends to links whose transport was gone"
    ))
    .expect("Failed to create link gone counter")
});

static UNHANDLED_MESSAGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "mesh_unhandled_messages_total",
        "Total number of messages with no registered handler"
    ))
    .expect("Failed to create unhandled messages counter")
});

static TRACKING_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "mesh_tracking_timeouts_total",
        "Total number of tracked requests that timed out"
    ))
    .expect("Failed to create tracking timeouts counter")
});

static TRACKING_CANCELLED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "mesh_tracking_cancelled_total",
        "Total number of tracked requests cancelled by shutdown"
    ))
    .expect("Failed to create tracking cancelled counter")
});

static LINKS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!("mesh_links_active", "Number of links currently up"))
        .expect("Failed to create active links gauge")
});

static PING_RTT_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(HistogramOpts::new(
        "mesh_ping_rtt_milliseconds",
        "Heartbeat round-trip time in milliseconds"
    )
    .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]))
    .expect("Failed to create ping round-trip histogram")
});

/// Initialize all metrics
pub fn init_metrics() {
    // Force lazy initialization
    Lazy::force(&MESSAGES_SENT_TOTAL);
    Lazy::force(&MESSAGES_RECEIVED_TOTAL);
    Lazy::force(&LINK_GONE_TOTAL);
    Lazy::force(&UNHANDLED_MESSAGES_TOTAL);
    Lazy::force(&TRACKING_TIMEOUTS_TOTAL);
    Lazy::force(&TRACKING_CANCELLED_TOTAL);
    Lazy::force(&LINKS_ACTIVE);
    Lazy::force(&PING_RTT_MS);
}

/// Record a message queued on a transport
pub fn record_message_sent() {
    MESSAGES_SENT_TOTAL.inc();
}

/// Record a message dispatched from a peer
pub fn record_message_received() {
    MESSAGES_RECEIVED_TOTAL.inc();
}

/// Record a send to a link whose transport was gone
pub fn record_link_gone() {
    LINK_GONE_TOTAL.inc();
}

/// Record a message dropped by the default handler
pub fn record_unhandled_message() {
    UNHANDLED_MESSAGES_TOTAL.inc();
}

pub fn record_tracking_timeout() {
    TRACKING_TIMEOUTS_TOTAL.inc();
}

pub fn record_tracking_cancelled() {
    TRACKING_CANCELLED_TOTAL.inc();
}

/// Set the number of links currently up
pub fn set_links_active(count: usize) {
    LINKS_ACTIVE.set(count as i64);
}

/// Record a heartbeat round trip
pub fn record_ping_rtt(millis: u64) {
    PING_RTT_MS.observe(millis as f64);
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Failed to encode metrics: {}\n", e);
    }

    String::from_utf8(buffer).unwrap_or_default()
}
