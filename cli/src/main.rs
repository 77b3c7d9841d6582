mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_tracing(default_filter: &str) -> Result<()> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
  let subscriber = FmtSubscriber::builder()
    .with_env_filter(env_filter)
    .with_target(false)
    .finish();
  tracing::subscriber::set_global_default(subscriber)?;
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli_args = Cli::parse();
  init_tracing(&cli_args.log_level)?;

  match cli_args.command {
    Commands::Simulate(args) => commands::simulate::run(args).await,
    Commands::Types(args) => commands::types::list(args),
  }
}
