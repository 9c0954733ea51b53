// ============================================================
// ONE-VS-REST LOGISTIC REGRESSION (SGD)
// ============================================================
// One binary logistic head per tag, trained with stochastic gradient
// descent over sparse TF-IDF vectors. Per-epoch validation loss feeds
// early stopping and trial pruning.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::domain::error::{AppError, Result};

use super::vectorizer::SparseVector;

/// Epochs without validation improvement before stopping.
const EARLY_STOPPING_PATIENCE: usize = 5;

/// Knobs for one SGD fit. A subset of `TrainParams`, so the classifier
/// does not depend on the full pipeline configuration.
#[derive(Debug, Clone)]
pub struct SgdConfig {
    pub alpha: f64,
    pub learning_rate: f64,
    pub power_t: f64,
    pub num_epochs: usize,
    pub seed: u64,
}

/// Observed losses for one epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
}

/// Signal returned by the per-epoch callback. `Stop` aborts the fit and
/// keeps the best weights so far (used for trial pruning).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochVerdict {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    /// Per-class weight vectors, dense over the feature space.
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    num_features: usize,
    num_classes: usize,
}

impl LogisticClassifier {
    pub fn new(num_features: usize, num_classes: usize) -> Result<Self> {
        if num_classes < 2 {
            return Err(AppError::ValidationError(format!(
                "Need at least 2 classes, got {num_classes}"
            )));
        }
        Ok(Self {
            weights: vec![vec![0.0; num_features]; num_classes],
            biases: vec![0.0; num_classes],
            num_features,
            num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Fit on the train split, tracking validation loss each epoch.
    /// `on_epoch` may request a stop (pruned trials); early stopping
    /// kicks in after `EARLY_STOPPING_PATIENCE` stale epochs either way.
    pub fn fit(
        &mut self,
        train: &[(SparseVector, usize)],
        val: &[(SparseVector, usize)],
        config: &SgdConfig,
        mut on_epoch: impl FnMut(&EpochRecord) -> EpochVerdict,
    ) -> Result<Vec<EpochRecord>> {
        if train.is_empty() || val.is_empty() {
            return Err(AppError::ValidationError(
                "Cannot fit classifier on empty splits".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();

        let mut history = Vec::new();
        let mut best_val = f64::INFINITY;
        let mut best_weights = self.weights.clone();
        let mut best_biases = self.biases.clone();
        let mut stale_epochs = 0usize;

        for epoch in 0..config.num_epochs {
            order.shuffle(&mut rng);
            let eta = config.learning_rate / ((epoch + 1) as f64).powf(config.power_t);

            let mut train_loss = 0.0;
            for &i in &order {
                let (vector, label) = &train[i];
                for class in 0..self.num_classes {
                    let target = if *label == class { 1.0 } else { 0.0 };
                    let z = self.raw_score(class, vector);
                    let p = sigmoid(z);
                    train_loss += binary_log_loss(target, p);

                    let grad = p - target;
                    self.biases[class] -= eta * grad;
                    let weights = &mut self.weights[class];
                    for &(idx, value) in vector {
                        // L2 applied over the touched coordinates only.
                        weights[idx] -= eta * (grad * value + config.alpha * weights[idx]);
                    }
                }
            }
            train_loss /= (train.len() * self.num_classes) as f64;

            let val_loss = self.mean_log_loss(val);
            let record = EpochRecord {
                epoch,
                train_loss,
                val_loss,
            };
            history.push(record.clone());

            if val_loss < best_val {
                best_val = val_loss;
                best_weights = self.weights.clone();
                best_biases = self.biases.clone();
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
            }

            if on_epoch(&record) == EpochVerdict::Stop {
                break;
            }
            if stale_epochs >= EARLY_STOPPING_PATIENCE {
                break;
            }
        }

        self.weights = best_weights;
        self.biases = best_biases;
        Ok(history)
    }

    fn raw_score(&self, class: usize, vector: &SparseVector) -> f64 {
        let weights = &self.weights[class];
        let mut z = self.biases[class];
        for &(idx, value) in vector {
            if idx < weights.len() {
                z += weights[idx] * value;
            }
        }
        z
    }

    /// Per-class probabilities, normalized to sum to one.
    pub fn predict_proba(&self, vector: &SparseVector) -> Vec<f64> {
        let mut probs: Vec<f64> = (0..self.num_classes)
            .map(|class| sigmoid(self.raw_score(class, vector)))
            .collect();
        let total: f64 = probs.iter().sum();
        if total > 0.0 {
            for p in probs.iter_mut() {
                *p /= total;
            }
        }
        probs
    }

    /// Winning class and its probability.
    pub fn predict_best(&self, vector: &SparseVector) -> (usize, f64) {
        let probs = self.predict_proba(vector);
        probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, &p)| (idx, p))
            .unwrap_or((0, 0.0))
    }

    /// Mean binary log loss across all heads of a split.
    pub fn mean_log_loss(&self, samples: &[(SparseVector, usize)]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let mut loss = 0.0;
        for (vector, label) in samples {
            for class in 0..self.num_classes {
                let target = if *label == class { 1.0 } else { 0.0 };
                let p = sigmoid(self.raw_score(class, vector));
                loss += binary_log_loss(target, p);
            }
        }
        loss / (samples.len() * self.num_classes) as f64
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn binary_log_loss(target: f64, p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_data() -> (Vec<(SparseVector, usize)>, Vec<(SparseVector, usize)>) {
        // Two linearly separable classes on two features.
        let make = |n: usize| -> Vec<(SparseVector, usize)> {
            (0..n)
                .map(|i| {
                    if i % 2 == 0 {
                        (vec![(0, 1.0)], 0)
                    } else {
                        (vec![(1, 1.0)], 1)
                    }
                })
                .collect()
        };
        (make(40), make(10))
    }

    fn config() -> SgdConfig {
        SgdConfig {
            alpha: 1e-4,
            learning_rate: 0.5,
            power_t: 0.1,
            num_epochs: 30,
            seed: 7,
        }
    }

    #[test]
    fn test_fit_separates_toy_classes() {
        let (train, val) = toy_data();
        let mut model = LogisticClassifier::new(2, 2).unwrap();
        let history = model
            .fit(&train, &val, &config(), |_| EpochVerdict::Continue)
            .unwrap();
        assert!(!history.is_empty());

        let (class_a, p_a) = model.predict_best(&vec![(0, 1.0)]);
        let (class_b, _) = model.predict_best(&vec![(1, 1.0)]);
        assert_eq!(class_a, 0);
        assert_eq!(class_b, 1);
        assert!(p_a > 0.5);
    }

    #[test]
    fn test_val_loss_decreases() {
        let (train, val) = toy_data();
        let mut model = LogisticClassifier::new(2, 2).unwrap();
        let history = model
            .fit(&train, &val, &config(), |_| EpochVerdict::Continue)
            .unwrap();
        let first = history.first().unwrap().val_loss;
        let last = history.last().unwrap().val_loss;
        assert!(last <= first);
    }

    #[test]
    fn test_epoch_callback_can_stop_fit() {
        let (train, val) = toy_data();
        let mut model = LogisticClassifier::new(2, 2).unwrap();
        let history = model
            .fit(&train, &val, &config(), |record| {
                if record.epoch >= 2 {
                    EpochVerdict::Stop
                } else {
                    EpochVerdict::Continue
                }
            })
            .unwrap();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (train, val) = toy_data();
        let mut model = LogisticClassifier::new(2, 2).unwrap();
        model
            .fit(&train, &val, &config(), |_| EpochVerdict::Continue)
            .unwrap();
        let probs = model.predict_proba(&vec![(0, 1.0)]);
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_single_class() {
        assert!(LogisticClassifier::new(4, 1).is_err());
    }
}
