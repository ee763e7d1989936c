use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Serve {
            host,
            port,
            no_poll,
        } => commands::serve(&host, port, no_poll),
        cli::Command::Poll { once } => commands::poll(once),
        cli::Command::Fetch { symbol } => commands::fetch(&symbol),
        cli::Command::Dedup { dry_run } => commands::dedup(dry_run),
        cli::Command::Inspect { symbol, limit } => commands::inspect(&symbol, limit),
    }
}
