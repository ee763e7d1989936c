use clap::{Parser, Subcommand};

/// Option-chain open-interest tracker: polls index option chains, keeps
/// only materially changed snapshots, and serves them over HTTP.
#[derive(Parser)]
#[command(name = "oi-tracker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP API with background polling
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(long, default_value = "5000")]
        port: u16,

        /// Serve stored data only; do not poll
        #[arg(long)]
        no_poll: bool,
    },

    /// Poll the configured symbols without serving
    Poll {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Acquire one symbol now and print the outcome
    Fetch {
        /// Index symbol, e.g. NIFTY or BANKNIFTY
        symbol: String,
    },

    /// Remove stored records that repeat an earlier snapshot identity
    Dedup {
        /// Report duplicates without deleting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarise the most recent stored records for a symbol
    Inspect {
        symbol: String,

        /// Number of records to show
        #[arg(long, default_value = "3")]
        limit: usize,
    },
}
