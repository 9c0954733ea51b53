// ============================================================
// TRAINING ORCHESTRATION
// ============================================================
// Runs the full pipeline (preprocess -> vectorize -> fit -> threshold
// -> evaluate) as a tracked registry run with persisted artifacts.

use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::{AppError, Result};
use crate::domain::params::TrainParams;
use crate::domain::performance::Performance;
use crate::domain::project::{Project, OTHER_TAG};
use crate::infrastructure::artifact_store::{
    atomic_write_bytes, cleanup_old_runs, ArtifactLayout, RunRetentionPolicy,
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::dataset::{load_accepted_tags, load_projects};
use crate::infrastructure::db::registry::{
    RegistryDb, RunArtifactInput, RunArtifactsRepository, RunInput, RunKind, RunMetricInput,
    RunMetricsRepository, RunRepository, RunStatus,
};

use super::pipeline::classifier::{
    EpochRecord, EpochVerdict, LogisticClassifier, SgdConfig,
};
use super::pipeline::evaluation::evaluate;
use super::pipeline::preprocess::{prepare_data, stopword_set, LabelEncoder, PreparedSample};
use super::pipeline::vectorizer::{SparseVector, TfIdfVectorizer};
use super::run_bundle::RunBundle;

/// Output of one fitted pipeline, before anything is persisted.
pub struct FitResult {
    pub encoder: LabelEncoder,
    pub vectorizer: TfIdfVectorizer,
    pub model: LogisticClassifier,
    pub history: Vec<EpochRecord>,
    /// Threshold actually used (given or derived from the val split).
    pub threshold: f64,
    pub val_performance: Performance,
    pub test_performance: Performance,
}

fn vectorize_split(
    vectorizer: &TfIdfVectorizer,
    samples: &[PreparedSample],
) -> Vec<(SparseVector, usize)> {
    samples
        .iter()
        .map(|s| (vectorizer.transform(&s.text), s.label))
        .collect()
}

/// Winning-class prediction with the out-of-scope fallback: below the
/// threshold the prediction collapses to "other".
pub fn predict_label(
    model: &LogisticClassifier,
    encoder: &LabelEncoder,
    vector: &SparseVector,
    threshold: f64,
) -> Result<usize> {
    let (best, prob) = model.predict_best(vector);
    if prob < threshold {
        encoder.encode(OTHER_TAG)
    } else {
        Ok(best)
    }
}

/// Default threshold: the 25th percentile of winning-class probabilities
/// on the val split, so most in-distribution inputs clear it.
fn derive_threshold(model: &LogisticClassifier, split: &[(SparseVector, usize)]) -> f64 {
    if split.is_empty() {
        return 0.0;
    }
    let mut probs: Vec<f64> = split
        .iter()
        .map(|(vector, _)| model.predict_best(vector).1)
        .collect();
    probs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((probs.len() - 1) as f64 * 0.25).round() as usize;
    probs[idx]
}

/// Fit the full pipeline on already-loaded data. `on_epoch` receives the
/// per-epoch losses and may stop the fit (trial pruning).
pub fn fit_pipeline(
    projects: Vec<Project>,
    accepted_tags: &HashSet<String>,
    params: &TrainParams,
    extra_stopwords: &[String],
    short_text_cutoff: usize,
    on_epoch: impl FnMut(&EpochRecord) -> EpochVerdict,
) -> Result<FitResult> {
    let stopwords = stopword_set(extra_stopwords);
    let (splits, encoder) = prepare_data(projects, accepted_tags, params, &stopwords)?;

    let train_texts: Vec<&str> = splits.train.iter().map(|s| s.text.as_str()).collect();
    let vectorizer = TfIdfVectorizer::fit(&train_texts, 2, params.ngram_max_range)?;

    let train = vectorize_split(&vectorizer, &splits.train);
    let val = vectorize_split(&vectorizer, &splits.val);
    let test = vectorize_split(&vectorizer, &splits.test);

    let mut model = LogisticClassifier::new(vectorizer.num_features(), encoder.num_classes())?;
    let sgd = SgdConfig {
        alpha: params.alpha,
        learning_rate: params.learning_rate,
        power_t: params.power_t,
        num_epochs: params.num_epochs,
        seed: params.seed,
    };
    let history = model.fit(&train, &val, &sgd, on_epoch)?;

    let threshold = params.threshold.unwrap_or_else(|| derive_threshold(&model, &val));

    let val_pred: Vec<usize> = val
        .iter()
        .map(|(vector, _)| predict_label(&model, &encoder, vector, threshold))
        .collect::<Result<_>>()?;
    let val_true: Vec<usize> = splits.val.iter().map(|s| s.label).collect();
    let val_texts: Vec<String> = splits.val.iter().map(|s| s.text.clone()).collect();
    let val_performance = evaluate(&val_true, &val_pred, &val_texts, &encoder, short_text_cutoff)?;

    let test_pred: Vec<usize> = test
        .iter()
        .map(|(vector, _)| predict_label(&model, &encoder, vector, threshold))
        .collect::<Result<_>>()?;
    let test_true: Vec<usize> = splits.test.iter().map(|s| s.label).collect();
    let test_texts: Vec<String> = splits.test.iter().map(|s| s.text.clone()).collect();
    let test_performance = evaluate(
        &test_true,
        &test_pred,
        &test_texts,
        &encoder,
        short_text_cutoff,
    )?;

    Ok(FitResult {
        encoder,
        vectorizer,
        model,
        history,
        threshold,
        val_performance,
        test_performance,
    })
}

/// Outcome of a tracked training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub run_id: String,
    pub performance: Performance,
    pub threshold: f64,
}

pub struct TrainingService {
    config: AppConfig,
    db: RegistryDb,
    layout: ArtifactLayout,
}

impl TrainingService {
    pub fn new(config: AppConfig, db: RegistryDb) -> Self {
        let layout = ArtifactLayout::new(&config.data_dir);
        Self { config, db, layout }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn db(&self) -> &RegistryDb {
        &self.db
    }

    /// Run a tracked training run and promote it as the serving default.
    pub async fn train(&self, params: TrainParams) -> Result<TrainOutcome> {
        let params = params.validated()?;
        let run_id = Uuid::new_v4().to_string();
        self.layout.ensure()?;

        let runs = RunRepository::new(&self.db);
        runs.insert(&RunInput {
            run_id: run_id.clone(),
            kind: RunKind::Train,
            params_json: params.to_json()?,
            seed: Some(params.seed as i64),
            trial_number: None,
        })
        .await?;
        runs.set_status(&run_id, RunStatus::Running, None, None).await?;

        match self.execute_run(&run_id, &params).await {
            Ok(outcome) => {
                runs.set_status(
                    &run_id,
                    RunStatus::Completed,
                    Some(Utc::now().to_rfc3339()),
                    None,
                )
                .await?;

                // Promote only after the run is fully recorded.
                atomic_write_bytes(&self.config.run_id_path(), run_id.as_bytes())?;
                info!(run_id, f1 = outcome.performance.overall.f1, "Training run completed");

                self.apply_retention(&run_id);
                Ok(outcome)
            }
            Err(err) => {
                runs.set_status(
                    &run_id,
                    RunStatus::Failed,
                    Some(Utc::now().to_rfc3339()),
                    Some(err.to_string()),
                )
                .await?;
                Err(err)
            }
        }
    }

    async fn execute_run(&self, run_id: &str, params: &TrainParams) -> Result<TrainOutcome> {
        let projects = load_projects(&self.config.projects_csv_path())?;
        let accepted = load_accepted_tags(&self.config.tags_csv_path())?;
        info!(run_id, samples = projects.len(), "Starting training run");

        let mut params = params.clone();
        let fit = fit_pipeline(
            projects,
            &accepted,
            &params,
            &self.config.extra_stopwords,
            self.config.short_text_cutoff,
            |_| EpochVerdict::Continue,
        )?;
        params.threshold = Some(fit.threshold);

        self.record_metrics(run_id, &fit).await?;

        let bundle = RunBundle {
            run_id: run_id.to_string(),
            params: params.clone(),
            encoder: fit.encoder,
            vectorizer: fit.vectorizer,
            model: fit.model,
            performance: fit.test_performance.clone(),
        };
        let written = bundle.save(&self.layout)?;

        let artifacts = RunArtifactsRepository::new(&self.db);
        for artifact in &written {
            artifacts
                .insert(&RunArtifactInput {
                    artifact_id: Uuid::new_v4().to_string(),
                    run_id: run_id.to_string(),
                    kind: artifact.kind.clone(),
                    path: artifact.path.clone(),
                    sha256: Some(artifact.sha256.clone()),
                    size_bytes: Some(artifact.size_bytes),
                })
                .await?;
        }

        Ok(TrainOutcome {
            run_id: run_id.to_string(),
            performance: fit.test_performance,
            threshold: fit.threshold,
        })
    }

    async fn record_metrics(&self, run_id: &str, fit: &FitResult) -> Result<()> {
        let metrics = RunMetricsRepository::new(&self.db);

        let mut rows = Vec::new();
        for record in &fit.history {
            rows.push(RunMetricInput {
                run_id: run_id.to_string(),
                split: "train".to_string(),
                metric_name: "loss".to_string(),
                metric_value: record.train_loss,
                epoch: Some(record.epoch as i64),
            });
            rows.push(RunMetricInput {
                run_id: run_id.to_string(),
                split: "val".to_string(),
                metric_name: "loss".to_string(),
                metric_value: record.val_loss,
                epoch: Some(record.epoch as i64),
            });
        }

        for (split, performance) in [
            ("val", &fit.val_performance),
            ("test", &fit.test_performance),
        ] {
            rows.push(RunMetricInput {
                run_id: run_id.to_string(),
                split: split.to_string(),
                metric_name: "precision".to_string(),
                metric_value: performance.overall.precision,
                epoch: None,
            });
            rows.push(RunMetricInput {
                run_id: run_id.to_string(),
                split: split.to_string(),
                metric_name: "recall".to_string(),
                metric_value: performance.overall.recall,
                epoch: None,
            });
            rows.push(RunMetricInput {
                run_id: run_id.to_string(),
                split: split.to_string(),
                metric_name: "f1".to_string(),
                metric_value: performance.overall.f1,
                epoch: None,
            });
        }

        metrics.insert_many(&rows).await
    }

    fn apply_retention(&self, current_run_id: &str) {
        let mut protected: HashSet<String> = HashSet::new();
        protected.insert(current_run_id.to_string());
        if let Ok(existing) = std::fs::read_to_string(self.config.run_id_path()) {
            protected.insert(existing.trim().to_string());
        }

        let policy = RunRetentionPolicy {
            max_age_days: self.config.retention_max_age_days,
            max_runs: self.config.retention_max_runs,
        };
        match cleanup_old_runs(&self.layout, &policy, &protected) {
            Ok(report) if !report.deleted_run_ids.is_empty() => {
                info!(
                    deleted = report.deleted_run_ids.len(),
                    freed_bytes = report.freed_bytes,
                    "Cleaned up old run artifacts"
                );
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Run artifact cleanup failed"),
        }
    }
}

/// The default serving run, if one has been promoted.
pub fn read_default_run_id(config: &AppConfig) -> Result<String> {
    let raw = std::fs::read_to_string(config.run_id_path()).map_err(|e| {
        AppError::NotFound(format!(
            "No default run marker at {}: {e}",
            config.run_id_path().display()
        ))
    })?;
    let run_id = raw.trim().to_string();
    if run_id.is_empty() {
        return Err(AppError::NotFound("Default run marker is empty".to_string()));
    }
    Ok(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_projects() -> (Vec<Project>, HashSet<String>) {
        let mut projects = Vec::new();
        for i in 0..60 {
            let (title, description, tag) = if i % 2 == 0 {
                (
                    "Object detection pipeline",
                    "detect bounding boxes in images with convolutional networks",
                    "computer-vision",
                )
            } else {
                (
                    "Text classification service",
                    "classify documents with transformers and attention tokens",
                    "natural-language-processing",
                )
            };
            projects.push(Project {
                id: i,
                created_on: "2020-01-01".to_string(),
                title: title.to_string(),
                description: description.to_string(),
                tag: tag.to_string(),
            });
        }
        let accepted = [
            "computer-vision".to_string(),
            "natural-language-processing".to_string(),
        ]
        .into_iter()
        .collect();
        (projects, accepted)
    }

    fn small_params() -> TrainParams {
        TrainParams {
            min_freq: 1,
            num_epochs: 10,
            ngram_max_range: 4,
            ..TrainParams::default()
        }
    }

    #[test]
    fn test_fit_pipeline_learns_synthetic_tags() {
        let (projects, accepted) = synthetic_projects();
        let fit = fit_pipeline(
            projects,
            &accepted,
            &small_params(),
            &[],
            5,
            |_| EpochVerdict::Continue,
        )
        .unwrap();

        assert!(fit.test_performance.overall.f1 > 0.7);
        assert!(fit.threshold > 0.0);
        assert!(!fit.history.is_empty());
    }

    #[test]
    fn test_threshold_fallback_predicts_other() {
        let (projects, accepted) = synthetic_projects();
        let fit = fit_pipeline(
            projects,
            &accepted,
            &small_params(),
            &[],
            5,
            |_| EpochVerdict::Continue,
        )
        .unwrap();

        // A threshold of 1.0 is unreachable, so everything falls back.
        let vector = fit.vectorizer.transform("detect bounding boxes");
        let label = predict_label(&fit.model, &fit.encoder, &vector, 1.0).unwrap();
        assert_eq!(fit.encoder.decode(label).unwrap(), OTHER_TAG);
    }

    fn write_datasets(dir: &std::path::Path) {
        let mut projects = String::from("id,created_on,title,description,tag\n");
        for i in 0..40 {
            let (title, tag) = if i % 2 == 0 {
                ("Image segmentation with convolutions", "computer-vision")
            } else {
                ("Token classification with transformers", "natural-language-processing")
            };
            projects.push_str(&format!("{i},2020-01-01,{title},{title} details,{tag}\n"));
        }
        std::fs::write(dir.join("projects.csv"), projects).unwrap();
        std::fs::write(
            dir.join("tags.csv"),
            "tag\ncomputer-vision\nnatural-language-processing\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_train_records_metrics_artifacts_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        write_datasets(dir.path());
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let db = RegistryDb::connect_in_memory().await.unwrap();
        let service = TrainingService::new(config.clone(), db.clone());

        let params = TrainParams {
            min_freq: 1,
            num_epochs: 5,
            ngram_max_range: 3,
            ..TrainParams::default()
        };
        let outcome = service.train(params).await.unwrap();

        let runs = RunRepository::new(&db);
        let run = runs.get(&outcome.run_id).await.unwrap();
        assert_eq!(run.status, "completed");
        assert!(run.end_time.is_some());

        let metrics = RunMetricsRepository::new(&db)
            .list_for_run(&outcome.run_id)
            .await
            .unwrap();
        assert!(metrics.iter().any(|m| m.metric_name == "loss" && m.epoch.is_some()));
        assert!(metrics
            .iter()
            .any(|m| m.metric_name == "f1" && m.split == "test"));

        let artifacts = RunArtifactsRepository::new(&db)
            .list_for_run(&outcome.run_id)
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 5);

        let marker = std::fs::read_to_string(config.run_id_path()).unwrap();
        assert_eq!(marker.trim(), outcome.run_id);
    }

    #[tokio::test]
    async fn test_failed_run_is_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        // No dataset files exist, so the run must fail.
        let db = RegistryDb::connect_in_memory().await.unwrap();
        let service = TrainingService::new(config.clone(), db.clone());

        let result = service.train(TrainParams::default()).await;
        assert!(result.is_err());

        let runs = RunRepository::new(&db);
        let listed = runs.list_recent(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, "failed");
        assert!(listed[0].failure_reason.is_some());
        // The serving marker was never written.
        assert!(!config.run_id_path().exists());
    }
}
