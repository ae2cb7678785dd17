//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// upaas-build - build application packages on this worker
#[derive(Parser)]
#[command(name = "upaas-build")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build upaas application packages")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Builder configuration file (default: search UPAAS_CONFIG_DIR, . and /etc/upaas)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log file, `-` for the console
    #[arg(long, global = true, value_name = "PATH", default_value = "-")]
    pub log_output: String,

    /// JSON logs and JSON results
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a package from application metadata
    Build {
        /// Application metadata file (upaas.yml)
        #[arg(short, long, default_value = "upaas.yml")]
        metadata: PathBuf,

        /// Storage key of the previous package to update
        #[arg(long, env = "UPAAS_BASE_PACKAGE")]
        base_package: Option<String>,

        /// Revision id recorded for the previous package
        #[arg(long)]
        previous_revision: Option<String>,
    },

    /// Create the base OS image for this worker
    Bootstrap {
        /// Rebuild even if a valid image is stored
        #[arg(short, long)]
        force: bool,
    },
}
