use std::path::PathBuf;

use clap::Parser;

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `sandcore` boots and supervises per-tenant microVM sandboxes
#[derive(Debug, Parser)]
#[command(name = "sandcore", author, version, styles=styles::styles())]
pub struct SandcoreArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<SandcoreSubcommand>,

    /// Enable verbose logging
    #[arg(short = 'V', long, global = true)]
    pub verbose: bool,

    /// Path to a config file. Defaults to `$SANDCORE_HOME/config.toml`
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum SandcoreSubcommand {
    /// Boot a tenant's sandbox and keep it running until interrupted
    #[command(name = "run")]
    Run {
        /// The tenant to boot a sandbox for
        #[arg(short, long, required = true)]
        tenant: String,

        /// Do not upload the disk image when stopping
        #[arg(long)]
        no_save: bool,
    },

    /// Print the effective configuration
    #[command(name = "config")]
    Config,
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------
