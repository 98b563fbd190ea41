use std::net::SocketAddr;

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings accepted as Pending.
pub const BOOKINGS_SUBMITTED_TOTAL: &str = "carhire_bookings_submitted_total";

/// Counter: committed status changes. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "carhire_status_transitions_total";

/// Counter: requests refused because of overlapping bookings. Labels: gate.
pub const CONFLICTS_TOTAL: &str = "carhire_conflicts_total";

/// Counter: reviews submitted.
pub const REVIEWS_TOTAL: &str = "carhire_reviews_total";

/// Counter: online payments settled. Labels: method.
pub const PAYMENTS_TOTAL: &str = "carhire_payments_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carhire_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "carhire_wal_flush_batch_size";

/// Counter: completed compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "carhire_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
