use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(version, about = "Generates and uploads YouTube Shorts on a schedule")]
pub struct Args {
    /// Environment file read before configuration is resolved
    #[clap(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the pipeline once and exit (0 on success, 1 otherwise)
    RunOnce {
        #[clap(long)]
        topic: Option<String>,
    },

    /// Keep-alive server, startup verification and scheduler
    Serve {
        #[clap(long)]
        port: Option<u16>,
    },

    /// Print the resolved configuration with secrets redacted
    CheckConfig,

    /// Run startup verification once
    Verify {
        /// Ignore completion and cooldown markers
        #[clap(long)]
        force: bool,
    },
}
