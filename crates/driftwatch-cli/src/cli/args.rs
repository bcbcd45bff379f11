use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "driftwatch",
    version,
    about = "Scheduled quality and performance monitor for an LLM endpoint"
)]
pub struct Cli {
    /// Path to the monitor config file
    #[arg(
        long,
        global = true,
        default_value = "driftwatch.yaml",
        env = "DRIFTWATCH_CONFIG"
    )]
    pub config: PathBuf,

    /// Reject unknown keys in the config file instead of warning
    #[arg(long, global = true)]
    pub strict: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample config and create the database
    Init(InitArgs),
    /// Execute the suite once and record the run
    Run(RunArgs),
    /// Run the suite at the configured schedule times until interrupted
    Daemon(DaemonArgs),
    /// Status of the most recent run
    Status(StatusArgs),
    /// Recent runs, newest first
    History(HistoryArgs),
    /// One run with its test cases
    Show(ShowArgs),
    /// Operator settings stored alongside the runs
    Config(ConfigArgs),
    /// Validate and store a run submission, then rank it
    Submit(SubmitArgs),
    /// Build a submission payload from a recorded run
    ExportSubmission(ExportArgs),
}

#[derive(Parser, Clone)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Answer every prompt with a canned reply instead of calling the endpoint
    #[arg(long)]
    pub dry_run: bool,

    /// Print the recorded run as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Exit with code 3 instead of waiting when another run is in progress
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Parser, Clone)]
pub struct DaemonArgs {
    /// Execute one run immediately before waiting for the schedule
    #[arg(long)]
    pub run_now: bool,
}

#[derive(Parser, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct ShowArgs {
    pub run_id: i64,

    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigSub,
}

#[derive(Subcommand, Clone)]
pub enum ConfigSub {
    /// Print every setting with its current value
    List,
    /// Print one setting
    Get { key: String },
    /// Validate and store one setting
    Set { key: String, value: String },
}

#[derive(Parser, Clone)]
pub struct SubmitArgs {
    /// Submission JSON file, or `-` for stdin
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Parser, Clone)]
pub struct ExportArgs {
    pub run_id: i64,

    #[arg(long, env = "DRIFTWATCH_USER_ID", default_value = "anonymous")]
    pub user_id: String,

    /// Write the payload here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}
