use std::net::SocketAddr;

use crate::wire::ClientMessage;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: viewer requests handled. Labels: request, status.
pub const REQUESTS_TOTAL: &str = "tabletime_requests_total";

/// Histogram: request handling latency in seconds. Labels: request.
pub const REQUEST_DURATION_SECONDS: &str = "tabletime_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: connected viewers.
pub const CONNECTIONS_ACTIVE: &str = "tabletime_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tabletime_connections_total";

/// Counter: connections rejected due to limit or origin.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tabletime_connections_rejected_total";

/// Gauge: sessions subscribed to pushes, sampled every tick.
pub const VIEWERS_SUBSCRIBED: &str = "tabletime_viewers_subscribed";

/// Counter: viewers that fell behind the push channel and were resynced.
pub const VIEWERS_LAGGED_TOTAL: &str = "tabletime_viewers_lagged_total";

/// Gauge: reservations in the registry.
pub const RESERVATIONS_ACTIVE: &str = "tabletime_reservations_active";

// ── Scheduler ───────────────────────────────────────────────────

/// Counter: alarms fired. Labels: threshold.
pub const ALARMS_TOTAL: &str = "tabletime_alarms_total";

/// Histogram: tick duration in seconds (excluding the flush wait).
pub const TICK_DURATION_SECONDS: &str = "tabletime_tick_duration_seconds";

// ── Persistence ─────────────────────────────────────────────────

/// Histogram: registry file write duration in seconds.
pub const FLUSH_DURATION_SECONDS: &str = "tabletime_flush_duration_seconds";

/// Histogram: flush requests coalesced into one write.
pub const FLUSH_BATCH_SIZE: &str = "tabletime_flush_batch_size";

/// Counter: failed registry writes.
pub const FLUSH_FAILURES_TOTAL: &str = "tabletime_flush_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn request_label(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::Hello { .. } => "hello",
        ClientMessage::Register { .. } => "register",
        ClientMessage::Delete { .. } => "delete",
        ClientMessage::AdjustTime { .. } => "adjust_time",
        ClientMessage::AddTime { .. } => "add_time",
        ClientMessage::SubtractTime { .. } => "subtract_time",
        ClientMessage::Edit { .. } => "edit",
    }
}
