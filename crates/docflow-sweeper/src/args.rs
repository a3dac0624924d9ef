use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "docflow-sweeper", about = "Reclaims leaked admission slots")]
pub struct Args {
    #[arg(long, env = "DOCFLOW_ETCD_ENDPOINT", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoint: String,

    /// Only used to build the limit cache; sweeping itself never reads limits.
    #[arg(long, env = "DOCFLOW_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "DOCFLOW_LISTEN_ADDR", default_value = "0.0.0.0:9310")]
    pub listen_addr: String,

    #[arg(long, env = "DOCFLOW_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub interval_secs: u64,

    /// OTLP/HTTP base URL for trace export.
    #[arg(long, env = "DOCFLOW_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "DOCFLOW_OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
