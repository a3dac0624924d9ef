mod args;
mod metrics;
mod sweep;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use clap::Parser;
use tracing::info;

use docflow_admission::{AdmissionConfig, AdmissionController, LimitConfigCache};
use docflow_common::telemetry::{init_tracing, TracingOptions};
use docflow_coord::{CoordinationStore, EtcdCoordStore};
use docflow_store::{MemoryOrgLimitStore, OrgLimitStore, PgStore};

use crate::args::Args;
use crate::metrics::{healthz_handler, metrics_handler, SharedMetrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_tracing(
        &TracingOptions::new("docflow-sweeper")
            .with_otlp(args.otlp_endpoint.clone(), args.otlp_token.clone()),
    );

    let store: Arc<dyn CoordinationStore> =
        Arc::new(EtcdCoordStore::connect(std::slice::from_ref(&args.etcd_endpoint)).await?);
    info!(endpoint = %args.etcd_endpoint, "connected to etcd");

    let limits: Arc<dyn OrgLimitStore> = match &args.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => Arc::new(MemoryOrgLimitStore::new()),
    };

    let config = AdmissionConfig::from_env();
    let cache = Arc::new(LimitConfigCache::new(
        store.clone(),
        limits,
        config.default_org_limit,
        config.limit_cache_ttl,
    ));
    info!(
        retention_secs = config.slot_retention.as_secs(),
        "slots older than the retention horizon will be reclaimed"
    );
    let admission = Arc::new(AdmissionController::new(store, cache, config));

    let metrics = Arc::new(SharedMetrics::default());
    tokio::spawn(sweep::sweep_loop(
        admission,
        metrics.clone(),
        Duration::from_secs(args.interval_secs.max(1)),
    ));

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    info!(addr = %args.listen_addr, "docflow-sweeper listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    telemetry.shutdown();
    Ok(())
}
