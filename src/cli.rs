use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "releaseforge")]
#[command(author, version, about = "Episode release pipeline coordinator")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the pipeline: poll feeds and process new episodes until interrupted
    Start,

    /// Process a single episode through the pipeline
    Run {
        /// Release title, e.g. "[Group] Series Name - 05 (1080p).mkv"
        #[arg(required = true)]
        title: String,

        /// Source URL or local file path
        #[arg(required = true)]
        locator: String,

        /// Process even if the episode is in progress or failed before
        #[arg(long)]
        force: bool,
    },

    /// Show release records, ongoing items, and failure marks
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Handle a delivery button press
    Deliver {
        /// Button payload, `deliver|<identity>|<quality>`
        payload: String,

        /// Recipient chat id
        #[arg(allow_hyphen_values = true)]
        recipient: i64,
    },

    /// Allow a recipient to receive a quality again
    ResetDelivery {
        identity: String,

        quality: String,

        #[arg(allow_hyphen_values = true)]
        recipient: i64,
    },

    /// Delete every stored trace of an episode so it can be processed again
    Forget {
        identity: String,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
