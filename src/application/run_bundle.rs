// ============================================================
// RUN BUNDLE
// ============================================================
// The set of artifacts one run produces and the prediction path
// loads back: params, label encoder, vectorizer, model, performance.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::error::{AppError, Result};
use crate::domain::params::TrainParams;
use crate::domain::performance::Performance;
use crate::infrastructure::artifact_store::{atomic_write_bytes, sha256_hex_file, ArtifactLayout};

use super::pipeline::classifier::LogisticClassifier;
use super::pipeline::preprocess::LabelEncoder;
use super::pipeline::vectorizer::TfIdfVectorizer;

pub const PARAMS_FILE: &str = "params.json";
pub const LABEL_ENCODER_FILE: &str = "label_encoder.json";
pub const VECTORIZER_FILE: &str = "vectorizer.json";
pub const MODEL_FILE: &str = "model.json";
pub const PERFORMANCE_FILE: &str = "performance.json";

/// Artifact kind names as registered in the registry DB.
pub const ARTIFACT_KINDS: &[(&str, &str)] = &[
    ("params", PARAMS_FILE),
    ("label_encoder", LABEL_ENCODER_FILE),
    ("vectorizer", VECTORIZER_FILE),
    ("model", MODEL_FILE),
    ("performance", PERFORMANCE_FILE),
];

#[derive(Debug, Clone)]
pub struct RunBundle {
    pub run_id: String,
    pub params: TrainParams,
    pub encoder: LabelEncoder,
    pub vectorizer: TfIdfVectorizer,
    pub model: LogisticClassifier,
    pub performance: Performance,
}

/// A written artifact file, ready to register.
#[derive(Debug, Clone)]
pub struct WrittenArtifact {
    pub kind: String,
    pub file_name: String,
    pub path: String,
    pub sha256: String,
    pub size_bytes: i64,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize artifact: {e}")))?;
    atomic_write_bytes(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::IoError(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::ParseError(format!("Failed to parse {}: {e}", path.display())))
}

impl RunBundle {
    /// Write every artifact file into the run's directory and return the
    /// list for registry registration. Files land atomically before any
    /// registry row is written.
    pub fn save(&self, layout: &ArtifactLayout) -> Result<Vec<WrittenArtifact>> {
        let run_dir = layout.run_dir(&self.run_id);

        write_json(&run_dir.join(PARAMS_FILE), &self.params)?;
        write_json(&run_dir.join(LABEL_ENCODER_FILE), &self.encoder)?;
        write_json(&run_dir.join(VECTORIZER_FILE), &self.vectorizer)?;
        write_json(&run_dir.join(MODEL_FILE), &self.model)?;
        write_json(&run_dir.join(PERFORMANCE_FILE), &self.performance)?;

        let mut written = Vec::new();
        for (kind, file_name) in ARTIFACT_KINDS {
            let path = run_dir.join(file_name);
            let sha256 = sha256_hex_file(&path)?;
            let size_bytes = fs::metadata(&path)
                .map_err(|e| AppError::IoError(format!("Failed to stat {}: {e}", path.display())))?
                .len() as i64;
            written.push(WrittenArtifact {
                kind: kind.to_string(),
                file_name: file_name.to_string(),
                path: path.to_string_lossy().to_string(),
                sha256,
                size_bytes,
            });
        }
        Ok(written)
    }

    /// Load a run's artifacts back from its directory.
    pub fn load(layout: &ArtifactLayout, run_id: &str) -> Result<Self> {
        let run_dir = layout.run_dir(run_id);
        if !run_dir.exists() {
            return Err(AppError::NotFound(format!(
                "No artifacts for run {run_id} at {}",
                run_dir.display()
            )));
        }

        let params: TrainParams = read_json(&run_dir.join(PARAMS_FILE))?;
        let mut encoder: LabelEncoder = read_json(&run_dir.join(LABEL_ENCODER_FILE))?;
        encoder.rebuild_index();
        let vectorizer: TfIdfVectorizer = read_json(&run_dir.join(VECTORIZER_FILE))?;
        let model: LogisticClassifier = read_json(&run_dir.join(MODEL_FILE))?;
        let performance: Performance = read_json(&run_dir.join(PERFORMANCE_FILE))?;

        Ok(Self {
            run_id: run_id.to_string(),
            params,
            encoder,
            vectorizer,
            model,
            performance,
        })
    }
}
