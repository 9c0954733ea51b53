use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::domain::error::{AppError, Result};

use super::RegistryDb;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetricInput {
    pub run_id: String,
    pub split: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetric {
    pub metric_id: i64,
    pub run_id: String,
    pub split: String,
    pub metric_name: String,
    pub metric_value: f64,
    pub epoch: Option<i64>,
    pub recorded_at: Option<String>,
}

pub struct RunMetricsRepository {
    pool: SqlitePool,
}

impl RunMetricsRepository {
    pub fn new(db: &RegistryDb) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn insert(&self, metric: &RunMetricInput) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_metrics (run_id, split, metric_name, metric_value, epoch) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&metric.run_id)
        .bind(&metric.split)
        .bind(&metric.metric_name)
        .bind(metric.metric_value)
        .bind(metric.epoch)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert run metric: {e}")))?;
        Ok(())
    }

    pub async fn insert_many(&self, metrics: &[RunMetricInput]) -> Result<()> {
        for metric in metrics {
            self.insert(metric).await?;
        }
        Ok(())
    }

    pub async fn list_for_run(&self, run_id: &str) -> Result<Vec<RunMetric>> {
        let rows = sqlx::query_as::<_, RunMetricEntity>(
            "SELECT metric_id, run_id, split, metric_name, metric_value, epoch, recorded_at \
             FROM run_metrics WHERE run_id = ? ORDER BY metric_id",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list run metrics: {e}")))?;

        Ok(rows.into_iter().map(|e| e.into()).collect())
    }
}

#[derive(sqlx::FromRow)]
struct RunMetricEntity {
    metric_id: i64,
    run_id: String,
    split: String,
    metric_name: String,
    metric_value: f64,
    epoch: Option<i64>,
    recorded_at: String,
}

impl From<RunMetricEntity> for RunMetric {
    fn from(entity: RunMetricEntity) -> Self {
        Self {
            metric_id: entity.metric_id,
            run_id: entity.run_id,
            split: entity.split,
            metric_name: entity.metric_name,
            metric_value: entity.metric_value,
            epoch: entity.epoch,
            recorded_at: Some(entity.recorded_at),
        }
    }
}
