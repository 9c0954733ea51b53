// ============================================================
// HYPERPARAMETER OPTIMIZATION
// ============================================================
// Seeded random search over the SGD/feature knobs, maximizing val f1.
// Each trial is a tracked registry run; hopeless trials are pruned
// against the best trial's validation-loss curve.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tracing::info;
use uuid::Uuid;

use crate::domain::error::{AppError, Result};
use crate::domain::params::TrainParams;
use crate::infrastructure::artifact_store::atomic_write_bytes;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::dataset::{load_accepted_tags, load_projects};
use crate::infrastructure::db::registry::{
    RegistryDb, RunInput, RunKind, RunMetricInput, RunMetricsRepository, RunRepository, RunStatus,
};

use super::pipeline::classifier::EpochVerdict;
use super::training::fit_pipeline;

/// Epochs a trial must survive before it can be pruned.
const PRUNE_WARMUP_EPOCHS: usize = 5;
/// Val-loss ratio over the best trial's curve that triggers pruning.
const PRUNE_LOSS_RATIO: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct TrialReport {
    pub run_id: String,
    pub number: usize,
    pub params: TrainParams,
    pub val_f1: f64,
    pub pruned: bool,
}

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub best: TrialReport,
    pub num_trials: usize,
}

pub struct OptimizationService {
    config: AppConfig,
    db: RegistryDb,
}

impl OptimizationService {
    pub fn new(config: AppConfig, db: RegistryDb) -> Self {
        Self { config, db }
    }

    /// Sample one candidate from the search space.
    fn sample_params(rng: &mut StdRng, base: &TrainParams, seed: u64) -> TrainParams {
        let log_uniform = |rng: &mut StdRng, low: f64, high: f64| -> f64 {
            (rng.gen_range(low.ln()..high.ln())).exp()
        };
        TrainParams {
            ngram_max_range: rng.gen_range(3..=10),
            alpha: log_uniform(rng, 1e-5, 1e-2),
            learning_rate: log_uniform(rng, 1e-2, 1e0),
            power_t: rng.gen_range(0.1..0.5),
            threshold: None,
            seed,
            ..base.clone()
        }
    }

    /// Run the search and persist the best params to the params file.
    pub async fn optimize(
        &self,
        num_trials: usize,
        seed: u64,
        base: TrainParams,
    ) -> Result<OptimizeOutcome> {
        if num_trials == 0 {
            return Err(AppError::ValidationError(
                "num_trials must be at least 1".to_string(),
            ));
        }

        let projects = load_projects(&self.config.projects_csv_path())?;
        let accepted = load_accepted_tags(&self.config.tags_csv_path())?;

        let runs = RunRepository::new(&self.db);
        let metrics = RunMetricsRepository::new(&self.db);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut best: Option<TrialReport> = None;
        let mut best_loss_curve: Vec<f64> = Vec::new();

        for number in 0..num_trials {
            let params = Self::sample_params(&mut rng, &base, seed).validated()?;
            let run_id = Uuid::new_v4().to_string();

            runs.insert(&RunInput {
                run_id: run_id.clone(),
                kind: RunKind::Trial,
                params_json: params.to_json()?,
                seed: Some(seed as i64),
                trial_number: Some(number as i64),
            })
            .await?;
            runs.set_status(&run_id, RunStatus::Running, None, None).await?;

            let reference_curve = best_loss_curve.clone();
            let mut pruned = false;
            let fit = fit_pipeline(
                projects.clone(),
                &accepted,
                &params,
                &self.config.extra_stopwords,
                self.config.short_text_cutoff,
                |record| {
                    if record.epoch >= PRUNE_WARMUP_EPOCHS {
                        if let Some(&reference) = reference_curve.get(record.epoch) {
                            if record.val_loss > reference * PRUNE_LOSS_RATIO {
                                pruned = true;
                                return EpochVerdict::Stop;
                            }
                        }
                    }
                    EpochVerdict::Continue
                },
            );

            let fit = match fit {
                Ok(fit) => fit,
                Err(err) => {
                    runs.set_status(
                        &run_id,
                        RunStatus::Failed,
                        Some(Utc::now().to_rfc3339()),
                        Some(err.to_string()),
                    )
                    .await?;
                    return Err(err);
                }
            };

            let val_f1 = fit.val_performance.overall.f1;
            metrics
                .insert(&RunMetricInput {
                    run_id: run_id.clone(),
                    split: "val".to_string(),
                    metric_name: "f1".to_string(),
                    metric_value: val_f1,
                    epoch: None,
                })
                .await?;

            if pruned {
                runs.set_status(
                    &run_id,
                    RunStatus::Failed,
                    Some(Utc::now().to_rfc3339()),
                    Some(format!("pruned after {} epochs", fit.history.len())),
                )
                .await?;
            } else {
                runs.set_status(
                    &run_id,
                    RunStatus::Completed,
                    Some(Utc::now().to_rfc3339()),
                    None,
                )
                .await?;
            }

            let report = TrialReport {
                run_id: run_id.clone(),
                number,
                params,
                val_f1,
                pruned,
            };
            info!(
                trial = number,
                run_id,
                val_f1,
                pruned,
                "Optimization trial finished"
            );

            let improved = best.as_ref().map(|b| val_f1 > b.val_f1).unwrap_or(true);
            if !pruned && improved {
                best_loss_curve = fit.history.iter().map(|r| r.val_loss).collect();
                best = Some(report);
            } else if best.is_none() {
                best = Some(report);
            }
        }

        let best = best.ok_or_else(|| AppError::Internal("No trials completed".to_string()))?;

        let best_json = best.params.to_json()?;
        atomic_write_bytes(&self.config.params_path(), best_json.as_bytes())?;
        info!(
            run_id = best.run_id,
            val_f1 = best.val_f1,
            params_path = %self.config.params_path().display(),
            "Best trial params persisted"
        );

        Ok(OptimizeOutcome {
            best,
            num_trials,
        })
    }
}
