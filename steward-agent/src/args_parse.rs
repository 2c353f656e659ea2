use clap::Parser;

/// Run leadership contenders and expose their state over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "steward-agent", version, about)]
pub(crate) struct Args {
    /// Path to the YAML config file
    #[arg(long)]
    pub(crate) config_file: Option<String>,

    /// Coordination service address, e.g. memory://local (overrides config)
    #[arg(long)]
    pub(crate) coordination_addr: Option<String>,

    /// Election path for this duty type (overrides config)
    #[arg(long)]
    pub(crate) election_path: Option<String>,

    /// Number of contenders to run in this process
    #[arg(long, default_value_t = 1)]
    pub(crate) contenders: usize,

    /// Health and leader HTTP address
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub(crate) http_addr: String,

    /// Prometheus Exporter http address
    #[arg(long)]
    pub(crate) prom_exporter: Option<String>,
}
