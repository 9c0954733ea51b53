// ============================================================
// PREDICTION
// ============================================================
// Loads a run's artifacts and serves thresholded tag predictions
// through the same cleaning pipeline the run was trained with.

use std::collections::HashSet;
use tracing::info;

use crate::domain::error::{AppError, Result};
use crate::domain::project::Prediction;
use crate::infrastructure::artifact_store::{sha256_hex_file, ArtifactLayout};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::registry::{RegistryDb, RunArtifactsRepository};

use super::pipeline::preprocess::{clean_text, stopword_set};
use super::run_bundle::RunBundle;
use super::training::predict_label;

pub struct PredictionService {
    bundle: RunBundle,
    stopwords: HashSet<String>,
    threshold: f64,
}

impl PredictionService {
    /// Load a run's artifacts, checking file hashes against the registry.
    pub async fn load(config: &AppConfig, db: &RegistryDb, run_id: &str) -> Result<Self> {
        let layout = ArtifactLayout::new(&config.data_dir);
        let artifacts = RunArtifactsRepository::new(db);

        for artifact in artifacts.list_for_run(run_id).await? {
            if let Some(expected) = &artifact.sha256 {
                let actual = sha256_hex_file(std::path::Path::new(&artifact.path))?;
                if &actual != expected {
                    return Err(AppError::ValidationError(format!(
                        "Artifact {} of run {run_id} failed its hash check",
                        artifact.kind
                    )));
                }
            }
        }

        let bundle = RunBundle::load(&layout, run_id)?;
        let threshold = bundle.params.threshold.unwrap_or(0.0);
        let stopwords = stopword_set(&config.extra_stopwords);
        info!(run_id, threshold, "Loaded run artifacts, ready for inference");

        Ok(Self {
            bundle,
            stopwords,
            threshold,
        })
    }

    /// Load without registry verification (tests, offline tools).
    pub fn load_unverified(config: &AppConfig, run_id: &str) -> Result<Self> {
        let layout = ArtifactLayout::new(&config.data_dir);
        let bundle = RunBundle::load(&layout, run_id)?;
        let threshold = bundle.params.threshold.unwrap_or(0.0);
        let stopwords = stopword_set(&config.extra_stopwords);
        Ok(Self {
            bundle,
            stopwords,
            threshold,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.bundle.run_id
    }

    pub fn params(&self) -> &crate::domain::params::TrainParams {
        &self.bundle.params
    }

    pub fn performance(&self) -> &crate::domain::performance::Performance {
        &self.bundle.performance
    }

    /// Predict one tag per input text.
    pub fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>> {
        texts
            .iter()
            .map(|text| {
                let cleaned = clean_text(
                    text,
                    self.bundle.params.lower,
                    self.bundle.params.stem,
                    &self.stopwords,
                );
                let vector = self.bundle.vectorizer.transform(&cleaned);
                let label = predict_label(
                    &self.bundle.model,
                    &self.bundle.encoder,
                    &vector,
                    self.threshold,
                )?;
                Ok(Prediction {
                    input_text: text.clone(),
                    predicted_tag: self.bundle.encoder.decode(label)?.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::classifier::EpochVerdict;
    use crate::application::training::fit_pipeline;
    use crate::domain::params::TrainParams;
    use crate::domain::project::{Project, OTHER_TAG};

    fn trained_config() -> (tempfile::TempDir, AppConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        (dir, config)
    }

    fn train_and_save(config: &AppConfig) -> String {
        let mut projects = Vec::new();
        for i in 0..60 {
            let (title, tag) = if i % 2 == 0 {
                ("Image segmentation convolutional network masks", "computer-vision")
            } else {
                ("Transformer token embeddings language corpus", "natural-language-processing")
            };
            projects.push(Project {
                id: i,
                created_on: "2020-01-01".to_string(),
                title: title.to_string(),
                description: title.to_string(),
                tag: tag.to_string(),
            });
        }
        let accepted = [
            "computer-vision".to_string(),
            "natural-language-processing".to_string(),
        ]
        .into_iter()
        .collect();
        let mut params = TrainParams {
            min_freq: 1,
            num_epochs: 10,
            ngram_max_range: 4,
            ..TrainParams::default()
        };

        let fit = fit_pipeline(projects, &accepted, &params, &[], 5, |_| {
            EpochVerdict::Continue
        })
        .unwrap();
        params.threshold = Some(fit.threshold);

        let layout = ArtifactLayout::new(&config.data_dir);
        layout.ensure().unwrap();
        let bundle = RunBundle {
            run_id: "test-run".to_string(),
            params,
            encoder: fit.encoder,
            vectorizer: fit.vectorizer,
            model: fit.model,
            performance: fit.test_performance,
        };
        bundle.save(&layout).unwrap();
        bundle.run_id
    }

    #[test]
    fn test_predict_after_reload() {
        let (_dir, config) = trained_config();
        let run_id = train_and_save(&config);

        let service = PredictionService::load_unverified(&config, &run_id).unwrap();
        let predictions = service
            .predict(&["Transformer token embeddings for a language corpus".to_string()])
            .unwrap();

        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].predicted_tag, "natural-language-processing");
    }

    #[test]
    fn test_out_of_scope_text_predicts_other() {
        let (_dir, config) = trained_config();
        let run_id = train_and_save(&config);

        let service = PredictionService::load_unverified(&config, &run_id).unwrap();
        let predictions = service
            .predict(&["zqxw vvkp qqqq".to_string()])
            .unwrap();

        assert_eq!(predictions[0].predicted_tag, OTHER_TAG);
    }

    #[test]
    fn test_missing_run_fails_to_load() {
        let (_dir, config) = trained_config();
        assert!(PredictionService::load_unverified(&config, "missing").is_err());
    }
}
