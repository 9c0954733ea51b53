pub mod commands;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::application::optimization::OptimizationService;
use crate::application::prediction::PredictionService;
use crate::application::training::{read_default_run_id, TrainingService};
use crate::domain::error::{AppError, Result};
use crate::domain::params::TrainParams;
use crate::infrastructure::artifact_store::ensure_dir;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::dataset::download_datasets;
use crate::infrastructure::db::registry::{RegistryDb, RunRepository};
use crate::interfaces::http::start_server;

use self::commands::{Command, OptimizeArgs, PredictArgs, RunsArgs, ServeArgs, TrainArgs};

pub async fn dispatch(config: AppConfig, command: Command) -> Result<()> {
    match command {
        Command::DownloadData => download_data(config).await,
        Command::Train(args) => train(config, args).await,
        Command::Optimize(args) => optimize(config, args).await,
        Command::Predict(args) => predict(config, args).await,
        Command::Runs(args) => runs(config, args).await,
        Command::Serve(args) => serve(config, args).await,
    }
}

async fn download_data(config: AppConfig) -> Result<()> {
    ensure_dir(&config.data_dir)?;
    download_datasets(
        &config.projects_url,
        &config.tags_url,
        &config.projects_csv_path(),
        &config.tags_csv_path(),
    )
    .await
}

/// Explicit file wins, then the persisted best params, then defaults.
fn resolve_params(config: &AppConfig, params_file: Option<&Path>) -> Result<TrainParams> {
    let path = match params_file {
        Some(path) => path.to_path_buf(),
        None => config.params_path(),
    };
    if path.exists() {
        let json = fs::read_to_string(&path).map_err(|e| {
            AppError::IoError(format!("Failed to read {}: {e}", path.display()))
        })?;
        TrainParams::from_json(&json)
    } else if params_file.is_some() {
        Err(AppError::NotFound(format!(
            "Params file not found: {}",
            path.display()
        )))
    } else {
        Ok(TrainParams::default())
    }
}

async fn connect(config: &AppConfig) -> Result<RegistryDb> {
    ensure_dir(&config.data_dir)?;
    RegistryDb::connect(&config.registry_db_path()).await
}

async fn train(config: AppConfig, args: TrainArgs) -> Result<()> {
    let params = resolve_params(&config, args.params_file.as_deref())?;
    let db = connect(&config).await?;
    let outcome = TrainingService::new(config, db).train(params).await?;

    info!(
        run_id = %outcome.run_id,
        f1 = outcome.performance.overall.f1,
        threshold = outcome.threshold,
        "Training finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome.performance)?);
    println!("run_id: {}", outcome.run_id);
    Ok(())
}

async fn optimize(config: AppConfig, args: OptimizeArgs) -> Result<()> {
    let base = resolve_params(&config, args.params_file.as_deref())?;
    let db = connect(&config).await?;
    let outcome = OptimizationService::new(config, db)
        .optimize(args.num_trials, args.seed, base)
        .await?;

    info!(
        run_id = %outcome.best.run_id,
        trial = outcome.best.number,
        val_f1 = outcome.best.val_f1,
        "Search finished"
    );
    println!("best trial: {} (val f1 {:.4})", outcome.best.number, outcome.best.val_f1);
    println!("{}", outcome.best.params.to_json()?);
    Ok(())
}

async fn predict(config: AppConfig, args: PredictArgs) -> Result<()> {
    let db = connect(&config).await?;
    let run_id = match args.run_id {
        Some(run_id) => run_id,
        None => read_default_run_id(&config)?,
    };
    let service = PredictionService::load(&config, &db, &run_id).await?;
    let predictions = service.predict(&[args.text])?;
    println!("{}", serde_json::to_string_pretty(&predictions)?);
    Ok(())
}

async fn runs(config: AppConfig, args: RunsArgs) -> Result<()> {
    let db = connect(&config).await?;
    let listed = RunRepository::new(&db).list_recent(args.limit).await?;
    println!("{}", serde_json::to_string_pretty(&listed)?);
    Ok(())
}

async fn serve(mut config: AppConfig, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        config.server_host = host;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }

    let db = connect(&config).await?;
    let run_id = match args.run_id {
        Some(run_id) => run_id,
        None => read_default_run_id(&config)?,
    };
    let predictor = Arc::new(PredictionService::load(&config, &db, &run_id).await?);

    info!(
        host = %config.server_host,
        port = config.server_port,
        run_id = %run_id,
        "Serving predictions"
    );
    let server = start_server(config, db, predictor)
        .map_err(|e| AppError::HttpError(format!("Failed to bind server: {e}")))?;
    server
        .await
        .map_err(|e| AppError::HttpError(format!("Server error: {e}")))
}
