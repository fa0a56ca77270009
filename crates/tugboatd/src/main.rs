//! tugboatd — drives the tugboat control-plane core from the command line.
//!
//! # Usage
//!
//! ```text
//! tugboatd check-config --config tugboat.toml
//! tugboatd deploy --config tugboat.toml --workload web.toml --cluster memory
//! tugboatd provision-server --config tugboat.toml --name edge-1
//! ```
//!
//! Results go to stdout as JSON; logs go to stderr.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tugboat=debug";

#[derive(Parser)]
#[command(name = "tugboatd", about = "Tugboat control-plane driver")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ClusterTarget {
    /// In-process cluster; rollouts become ready on their own.
    Memory,
    /// The cluster from the ambient kubeconfig or in-cluster environment.
    Kube,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a configuration file.
    CheckConfig {
        #[arg(long, default_value = "tugboat.toml")]
        config: PathBuf,
    },

    /// Run one deployment pipeline for a workload.
    Deploy {
        #[arg(long, default_value = "tugboat.toml")]
        config: PathBuf,

        /// Workload description (TOML).
        #[arg(long)]
        workload: PathBuf,

        #[arg(long, value_enum, default_value = "memory")]
        cluster: ClusterTarget,

        /// Commit to build; a random one is made up when omitted.
        #[arg(long)]
        commit: Option<String>,

        /// Registry the mock builder tags images under.
        #[arg(long, default_value = "registry.tugboat.local")]
        registry: String,
    },

    /// Provision a legacy server: security group, instance, floating IP, DNS.
    ProvisionServer {
        #[arg(long, default_value = "tugboat.toml")]
        config: PathBuf,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "m1.small")]
        flavor: String,

        #[arg(long, default_value = "ubuntu-24.04")]
        image: String,

        /// Create an A record in this zone.
        #[arg(long)]
        dns_zone: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::CheckConfig { config } => commands::check_config(&config),
        Command::Deploy {
            config,
            workload,
            cluster,
            commit,
            registry,
        } => commands::deploy(&config, &workload, cluster, commit, registry).await,
        Command::ProvisionServer {
            config,
            name,
            flavor,
            image,
            dns_zone,
        } => commands::provision_server(&config, name, flavor, image, dns_zone).await,
    }
}
