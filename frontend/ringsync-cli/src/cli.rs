use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "ringsync", about = "Converges ring service configuration")]
pub struct Cli {
    /// TOML settings file; defaults plus environment overrides when omitted.
    #[arg(long, env = "RINGSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print loaded schemas, or one service's schema.
    Schemas { service: Option<String> },
    /// Print the configuration a service should be running with.
    Resolve { service: String },
    /// Converge one service, or every service when none is given.
    Flush {
        service: Option<String>,
        /// Skip the convergence lock.
        #[arg(long)]
        no_lock: bool,
    },
    /// Print the stored editable overrides of a service.
    Editable { service: String },
    /// Set editable overrides (`section.config=value`) and flush the service.
    Set {
        service: String,
        #[arg(required = true)]
        assignments: Vec<String>,
    },
    /// Print the configuration the ring currently serves.
    Ring { service: String },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
