use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "tagwise", about = "Tag classification for ML project descriptions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the projects and tags datasets into the data dir.
    DownloadData,
    /// Train a model and promote it as the serving default.
    Train(TrainArgs),
    /// Random-search hyperparameters and persist the best set.
    Optimize(OptimizeArgs),
    /// Predict the tag for a single text.
    Predict(PredictArgs),
    /// List recent runs from the registry.
    Runs(RunsArgs),
    /// Serve the prediction API over HTTP.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct TrainArgs {
    /// JSON params file; defaults to the persisted best params when present.
    #[arg(long)]
    pub params_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct OptimizeArgs {
    #[arg(long, default_value_t = 20)]
    pub num_trials: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// JSON params file used as base for unsampled params.
    #[arg(long)]
    pub params_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct PredictArgs {
    /// Text to classify.
    pub text: String,
    /// Run to load instead of the promoted default.
    #[arg(long)]
    pub run_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunsArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: i64,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    /// Run to serve instead of the promoted default.
    #[arg(long)]
    pub run_id: Option<String>,
}
