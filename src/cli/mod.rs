//! CLI command implementations

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

pub mod collect;
pub mod config;
pub mod error;
pub mod validate;

pub use collect::CollectArgs;
pub use config::RunConfig;
pub use error::CliError;
pub use validate::ValidateCommand;

/// Template Collector CLI
#[derive(Parser, Debug)]
#[command(name = "template-collector")]
#[command(about = "Collect crypto market data from exchange REST APIs using declarative templates", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect data as described by a run configuration
    Collect(CollectArgs),

    /// Validate template files
    Validate(ValidateCommand),
}
