use tracing::trace;

// Trace-level counters; the Prometheus recorder picks up nothing from these
// until a metrics facade is wired in.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "marketsync.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn sync_cycle(status: &'static str, created: u32, elapsed_ms: u128) {
    trace!(
        target = "marketsync.metrics",
        status = status,
        created = created,
        elapsed_ms = elapsed_ms as u64,
        "sync_cycle"
    );
}
