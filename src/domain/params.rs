use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::error::{AppError, Result};

/// Hyperparameters for one training run.
///
/// Defaults mirror the baseline configuration shipped with the dataset;
/// `optimize` overwrites the searchable fields with the best trial's values.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct TrainParams {
    /// Shuffle the dataset before splitting.
    pub shuffle: bool,
    /// Optional cap on the number of samples (smoke runs).
    pub subset: Option<usize>,
    /// Tags with fewer samples than this collapse into "other".
    #[validate(range(min = 1))]
    pub min_freq: usize,
    /// Lowercase text during cleaning.
    pub lower: bool,
    /// Apply suffix stemming during cleaning.
    pub stem: bool,
    /// Upper bound of the character n-gram range (lower bound is 2).
    #[validate(range(min = 2, max = 12))]
    pub ngram_max_range: usize,
    /// L2 regularization strength.
    #[validate(range(min = 1e-8))]
    pub alpha: f64,
    /// Constant SGD learning rate (eta0).
    #[validate(range(min = 1e-6))]
    pub learning_rate: f64,
    /// Learning-rate decay exponent.
    pub power_t: f64,
    /// Number of SGD passes over the training split.
    #[validate(range(min = 1))]
    pub num_epochs: usize,
    /// Decision threshold for the winning class; derived from the
    /// validation split when absent.
    pub threshold: Option<f64>,
    /// RNG seed for splits, shuffling, and weight init.
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            shuffle: true,
            subset: None,
            min_freq: 75,
            lower: true,
            stem: false,
            ngram_max_range: 7,
            alpha: 1e-4,
            learning_rate: 1e-1,
            power_t: 0.1,
            num_epochs: 100,
            threshold: None,
            seed: 1234,
        }
    }
}

impl TrainParams {
    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|e| AppError::ValidationError(format!("Invalid params: {e}")))?;
        Ok(self)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let params: TrainParams = serde_json::from_str(json)
            .map_err(|e| AppError::ParseError(format!("Failed to parse params JSON: {e}")))?;
        params.validated()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialize params: {e}")))
    }

    /// Flat string map for the `/params` endpoints.
    pub fn as_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}
