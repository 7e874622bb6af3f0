use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

pub static ACTIVE_WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "active_websocket_connections",
        "Number of live WebSocket connections on this instance"
    ))
    .unwrap()
});

pub static MESSAGES_POSTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "messages_posted_total",
        "Total number of messages accepted and persisted"
    ))
    .unwrap()
});

pub static CONTACT_REVEALS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "contact_reveals_total",
        "Total number of phone numbers revealed"
    ))
    .unwrap()
});

pub static REJECTED_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "rejected_messages_total",
            "Messages rejected by content moderation"
        ),
        &["category"]
    )
    .unwrap()
});

pub static BROADCAST_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "broadcast_failures_total",
        "Broadcast publish or fan-out failures"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
