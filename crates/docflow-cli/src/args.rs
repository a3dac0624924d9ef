use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "docflow-cli")]
#[command(about = "Operator tool for admission limits and caches", long_about = None)]
pub struct Args {
    #[arg(long, env = "DOCFLOW_ETCD_ENDPOINT", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoint: String,

    #[arg(long, env = "DOCFLOW_DATABASE_URL")]
    pub database_url: String,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Limit cache maintenance
    Cache {
        #[command(subcommand)]
        subcommand: CacheCommand,
    },
    /// Custom per-org concurrency limits
    Limit {
        #[command(subcommand)]
        subcommand: LimitCommand,
    },
    /// Show current org and global usage against limits
    Usage {
        #[arg(long)]
        org: String,
    },
    /// Show the live status of one execution
    Status {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        execution: String,
    },
    /// Reclaim stale admission slots once
    Sweep,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Drop cached limits
    Clear(ClearTarget),
}

#[derive(Debug, ClapArgs)]
#[group(required = true, multiple = false)]
pub struct ClearTarget {
    /// One org
    #[arg(long)]
    pub org: Option<String>,
    /// Every cached org limit
    #[arg(long)]
    pub all: bool,
    /// Every org that has a custom limit
    #[arg(long)]
    pub custom: bool,
}

#[derive(Debug, Subcommand)]
pub enum LimitCommand {
    /// List orgs with a custom limit
    List,
    /// Set or replace an org's limit
    Set {
        #[arg(long)]
        org: String,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        limit: u32,
    },
    /// Remove an org's custom limit; the system default applies afterwards
    Delete {
        #[arg(long)]
        org: String,
    },
}
