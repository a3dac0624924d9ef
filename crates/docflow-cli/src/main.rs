mod args;
mod output;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;

use docflow_admission::{
    AdmissionConfig, AdmissionController, ExecutionStatusTracker, LimitConfigCache, Operator,
    StatusLookup, TrackerConfig,
};
use docflow_common::telemetry::{init_tracing, TracingOptions};
use docflow_coord::{CoordinationStore, EtcdCoordStore};
use docflow_store::{OrgLimitStore, PgStore};

use crate::args::{Args, CacheCommand, Command, LimitCommand};
use crate::output::{render_limits, render_status, render_sweep, render_usage};

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _telemetry = init_tracing(
        &TracingOptions::new("docflow-cli")
            .with_default_filter("warn")
            .log_to_stderr(),
    );

    let store: Arc<dyn CoordinationStore> =
        Arc::new(EtcdCoordStore::connect(std::slice::from_ref(&args.etcd_endpoint)).await?);
    let limits: Arc<dyn OrgLimitStore> = Arc::new(PgStore::connect(&args.database_url).await?);

    let config = AdmissionConfig::from_env();
    let cache = Arc::new(LimitConfigCache::new(
        store.clone(),
        limits.clone(),
        config.default_org_limit,
        config.limit_cache_ttl,
    ));
    let admission = Arc::new(AdmissionController::new(store.clone(), cache.clone(), config));
    let ops = Operator::new(store.clone(), limits.clone(), cache, admission.clone());

    match args.command {
        Command::Cache { subcommand } => match subcommand {
            CacheCommand::Clear(target) => {
                if let Some(org) = target.org {
                    if ops.clear_org_cache(&org).await? {
                        println!("✓ Cleared cached limit for org {}", org);
                    } else {
                        println!("No cached limit for org {}", org);
                    }
                } else if target.all {
                    let n = ops.clear_all_caches().await?;
                    println!("✓ Cleared {} cached limit(s)", n);
                } else if target.custom {
                    let n = ops.clear_custom_limit_caches().await?;
                    println!("✓ Cleared caches for {} org(s) with custom limits", n);
                } else {
                    bail!("one of --org, --all or --custom is required");
                }
            }
        },
        Command::Limit { subcommand } => match subcommand {
            LimitCommand::List => {
                let rows = limits.list().await?;
                if args.json {
                    print_json(&rows)?;
                } else {
                    print!("{}", render_limits(&rows));
                }
            }
            LimitCommand::Set { org, limit } => {
                ops.set_custom_limit(&org, limit).await?;
                println!("✓ Org {} limited to {} concurrent execution(s)", org, limit);
            }
            LimitCommand::Delete { org } => {
                if ops.delete_custom_limit(&org).await? {
                    println!("✓ Removed custom limit for org {}", org);
                } else {
                    println!("Org {} has no custom limit", org);
                }
            }
        },
        Command::Usage { org } => {
            let report = ops.usage_report(&org).await?;
            if args.json {
                print_json(&report)?;
            } else {
                print!("{}", render_usage(&report));
            }
        }
        Command::Status {
            workflow,
            execution,
        } => {
            let tracker = ExecutionStatusTracker::new(store, TrackerConfig::from_env());
            match tracker.get(&workflow, &execution).await {
                StatusLookup::Found(record) if args.json => print_json(&record)?,
                StatusLookup::Found(record) => print!("{}", render_status(&record)),
                StatusLookup::Missing => {
                    eprintln!("✗ No status for execution {} (never created or expired)", execution);
                    std::process::exit(1);
                }
                StatusLookup::Unknown => bail!("status store unavailable"),
            }
        }
        Command::Sweep => {
            let report = admission.sweep_all_stale().await?;
            if args.json {
                print_json(&report)?;
            } else {
                print!("{}", render_sweep(&report));
            }
        }
    }

    Ok(())
}
