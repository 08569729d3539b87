use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "origin-shield",
    version,
    about = "Authenticates relay headers from trusted load balancers before forwarding"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Path to the trusted-peers file (overrides config file setting)
    #[arg(short, long)]
    pub peers: Option<PathBuf>,

    /// Listen address (overrides config file setting)
    #[arg(long)]
    pub listen: Option<String>,

    /// Upstream address (overrides config file setting)
    #[arg(long)]
    pub upstream: Option<String>,

    /// Validate the configuration and peers file, then exit
    #[arg(long)]
    pub check: bool,
}
