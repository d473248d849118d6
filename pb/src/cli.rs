//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pvbridge - serve a computational model's variables as process variables
#[derive(Parser)]
#[command(
    name = "pvb",
    about = "Serve a computational model's variables as process variables",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Serve a model over the configured protocols
    Serve {
        /// Model identifier
        #[arg(value_name = "MODEL")]
        model: String,

        /// Path to the variable declarations file
        #[arg(short, long)]
        declarations: Option<PathBuf>,

        /// Protocols to serve
        #[arg(short, long, value_delimiter = ',', default_value = "ca,pva")]
        protocols: Vec<String>,

        /// pvname prefix used when no declarations file is given
        #[arg(long, default_value = "model")]
        prefix: String,
    },

    /// Validate a declarations file against a model and exit
    Check {
        /// Model identifier
        #[arg(value_name = "MODEL")]
        model: String,

        /// Path to the variable declarations file
        #[arg(short, long)]
        declarations: PathBuf,

        /// Protocols the declarations must cover
        #[arg(short, long, value_delimiter = ',', default_value = "ca,pva")]
        protocols: Vec<String>,
    },

    /// List the available models
    Models,
}
