use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::error::{AppError, Result};

/// Service configuration: defaults, then `tagwise.toml`, then
/// `TAGWISE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for datasets, artifacts, and the registry database.
    pub data_dir: PathBuf,
    pub projects_url: String,
    pub tags_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Registry database filename inside `data_dir`.
    pub registry_db: String,
    /// Stopwords appended to the built-in list.
    pub extra_stopwords: Vec<String>,
    /// Token count below which a sample lands in the short-text slice.
    pub short_text_cutoff: usize,
    pub retention_max_runs: usize,
    pub retention_max_age_days: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            projects_url:
                "https://raw.githubusercontent.com/GokuMohandas/Made-With-ML/main/datasets/projects.csv"
                    .to_string(),
            tags_url:
                "https://raw.githubusercontent.com/GokuMohandas/Made-With-ML/main/datasets/tags.csv"
                    .to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: 8000,
            registry_db: "registry.db".to_string(),
            extra_stopwords: Vec::new(),
            short_text_cutoff: 5,
            retention_max_runs: 100,
            retention_max_age_days: 30,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file("tagwise.toml"))
            .merge(Env::prefixed("TAGWISE_"))
            .extract()
            .map_err(|e| AppError::ParseError(format!("Failed to load config: {e}")))
    }

    pub fn registry_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.registry_db)
    }

    pub fn projects_csv_path(&self) -> PathBuf {
        self.data_dir.join("projects.csv")
    }

    pub fn tags_csv_path(&self) -> PathBuf {
        self.data_dir.join("tags.csv")
    }

    /// Marker file naming the run the API serves by default.
    pub fn run_id_path(&self) -> PathBuf {
        self.data_dir.join("run_id.txt")
    }

    pub fn params_path(&self) -> PathBuf {
        self.data_dir.join("params.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_point_into_data_dir() {
        let config = AppConfig::default();
        assert_eq!(config.registry_db_path(), PathBuf::from("data/registry.db"));
        assert_eq!(config.run_id_path(), PathBuf::from("data/run_id.txt"));
    }
}
