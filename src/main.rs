mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, CrdAction};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check => commands::check::run().await?,
        Commands::List => commands::list::run().await?,
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
        Commands::Reconcile {
            metrics_addr,
            deploy_image,
        } => commands::reconcile::run(&metrics_addr, deploy_image).await?,
    }

    Ok(())
}
