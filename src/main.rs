use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batchgen::cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batchgen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Generate(args) => batchgen::cli::generate(args),
        Commands::Pull { repo, file, output } => batchgen::cli::pull(repo, file, output),
    };

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}
