use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Completion,
    Workflow,
}

#[derive(Parser, Debug)]
#[command(name = "genbatch", version, about = "Run parameter-bound generation requests, one at a time or as a batch")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file; defaults to ~/.genbatch/config.toml, then ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Override the app mode from config.
    #[arg(long, value_enum, global = true)]
    pub mode: Option<ModeArg>,

    /// Play back a recorded JSONL stream instead of calling the API.
    #[arg(long, global = true)]
    pub replay: Option<String>,

    /// Per-task generation timeout.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Variable value as KEY=VALUE. Can be specified multiple times.
    #[arg(long = "input", short = 'i', action = clap::ArgAction::Append)]
    pub input: Vec<String>,

    /// JSON array of prompt variables.
    #[arg(long)]
    pub schema: Option<String>,

    /// Print the full completion record as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BatchArgs {
    /// JSON array of rows; the first row is the header.
    #[arg(long)]
    pub grid: String,

    /// JSON array of prompt variables.
    #[arg(long)]
    pub schema: String,

    /// Write export rows here as JSON (stdout when omitted).
    #[arg(long)]
    pub out: Option<String>,

    /// Re-send failed tasks once after the first pass.
    #[arg(long)]
    pub retry_failed: bool,

    #[arg(long)]
    pub concurrency: Option<usize>,

    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Run(RunArgs),
    Batch(BatchArgs),
}
