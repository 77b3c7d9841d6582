use clap::{builder::TypedValueParser, Parser};

#[derive(Parser, Debug)]
#[clap(name = "halbus", version, about = "halbus Command Line Utility")]
pub struct Cli {
  /// Log filter used when RUST_LOG is not set (e.g. "info", "halbus=debug")
  #[clap(long, global = true, default_value = "info")]
  pub log_level: String,

  #[clap(subcommand)]
  pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
  /// Run a simulated acquisition session on the bus
  Simulate(SimulateArgs),
  /// List the message types the simulation registers
  Types(TypesArgs),
}

#[derive(Parser, Debug)]
pub struct SimulateArgs {
  /// Number of camera frames to publish
  #[clap(long, default_value_t = 100)]
  pub frames: u32,

  /// Delay between camera frames, in milliseconds
  #[clap(long, default_value_t = 5)]
  pub frame_interval_ms: u64,

  /// Number of stage moves the controller performs
  #[clap(long, default_value_t = 5)]
  pub moves: u32,

  /// How long a simulated stage move blocks its worker thread, in milliseconds
  #[clap(long, default_value_t = 20)]
  pub move_ms: u64,

  /// Probability that a stage move jams
  #[clap(long, default_value_t = 0.0)]
  pub jam_probability: f64,

  /// Seed for the simulated hardware
  #[clap(long, default_value_t = 4000)]
  pub seed: u64,

  /// Print every bus monitor event
  #[clap(long, action)]
  pub events: bool,
}

#[derive(Parser, Debug)]
pub struct TypesArgs {
  /// Output format
  #[clap(long, value_parser = clap::builder::PossibleValuesParser::new(["table", "names"]).map(|s| s.to_lowercase()), default_value = "table")]
  pub format: String,
}
