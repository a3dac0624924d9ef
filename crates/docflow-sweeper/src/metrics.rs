use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;

#[derive(Debug, Default)]
pub struct SharedMetrics {
    pub sweeps_total: AtomicU64,
    pub sweep_errors_total: AtomicU64,
    pub slots_reclaimed_total: AtomicU64,
    /// Org sets seen by the most recent successful sweep (gauge).
    pub org_sets_last: AtomicU64,
    /// Unix seconds of the most recent successful sweep, 0 before the first.
    pub last_success_unix: AtomicU64,
}

impl SharedMetrics {
    pub fn render(&self) -> String {
        format!(
            "# HELP docflow_sweeper_sweeps_total Sweep passes started.\n\
             # TYPE docflow_sweeper_sweeps_total counter\n\
             docflow_sweeper_sweeps_total {}\n\
             # HELP docflow_sweeper_sweep_errors_total Sweep passes that failed.\n\
             # TYPE docflow_sweeper_sweep_errors_total counter\n\
             docflow_sweeper_sweep_errors_total {}\n\
             # HELP docflow_sweeper_slots_reclaimed_total Stale admission slots removed.\n\
             # TYPE docflow_sweeper_slots_reclaimed_total counter\n\
             docflow_sweeper_slots_reclaimed_total {}\n\
             # HELP docflow_sweeper_org_sets Org slot sets seen by the last sweep.\n\
             # TYPE docflow_sweeper_org_sets gauge\n\
             docflow_sweeper_org_sets {}\n\
             # HELP docflow_sweeper_last_success_timestamp_seconds Time of the last successful sweep.\n\
             # TYPE docflow_sweeper_last_success_timestamp_seconds gauge\n\
             docflow_sweeper_last_success_timestamp_seconds {}\n",
            self.sweeps_total.load(Ordering::Relaxed),
            self.sweep_errors_total.load(Ordering::Relaxed),
            self.slots_reclaimed_total.load(Ordering::Relaxed),
            self.org_sets_last.load(Ordering::Relaxed),
            self.last_success_unix.load(Ordering::Relaxed),
        )
    }
}

/// GET /metrics in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<Arc<SharedMetrics>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, metrics.render())
}

pub async fn healthz_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}
