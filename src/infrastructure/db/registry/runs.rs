use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::domain::error::{AppError, Result};

use super::RegistryDb;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Train,
    Trial,
}

impl RunKind {
    pub(super) fn as_db(&self) -> &'static str {
        match self {
            RunKind::Train => "train",
            RunKind::Trial => "trial",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub(super) fn as_db(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: String,
    pub kind: String,
    pub status: String,
    pub params_json: String,
    pub seed: Option<i64>,
    pub trial_number: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInput {
    pub run_id: String,
    pub kind: RunKind,
    pub params_json: String,
    pub seed: Option<i64>,
    pub trial_number: Option<i64>,
}

pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(db: &RegistryDb) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn insert(&self, run: &RunInput) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (run_id, kind, status, params_json, seed, trial_number) \
             VALUES (?, ?, 'queued', ?, ?, ?)",
        )
        .bind(&run.run_id)
        .bind(run.kind.as_db())
        .bind(&run.params_json)
        .bind(run.seed)
        .bind(run.trial_number)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert run: {e}")))?;
        Ok(())
    }

    pub async fn set_status(
        &self,
        run_id: &str,
        status: RunStatus,
        end_time: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = ?, end_time = COALESCE(?, end_time), failure_reason = ? \
             WHERE run_id = ?",
        )
        .bind(status.as_db())
        .bind(end_time)
        .bind(failure_reason)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update run: {e}")))?;
        Ok(())
    }

    pub async fn get(&self, run_id: &str) -> Result<Run> {
        let run = sqlx::query_as::<_, RunEntity>(
            "SELECT run_id, kind, status, params_json, seed, trial_number, start_time, end_time, failure_reason \
             FROM runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch run: {e}")))?;

        match run {
            Some(entity) => Ok(entity.into()),
            None => Err(AppError::NotFound(format!("Run not found: {run_id}"))),
        }
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunEntity>(
            "SELECT run_id, kind, status, params_json, seed, trial_number, start_time, end_time, failure_reason \
             FROM runs ORDER BY start_time DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list runs: {e}")))?;

        Ok(rows.into_iter().map(|e| e.into()).collect())
    }
}

#[derive(sqlx::FromRow)]
struct RunEntity {
    run_id: String,
    kind: String,
    status: String,
    params_json: String,
    seed: Option<i64>,
    trial_number: Option<i64>,
    start_time: String,
    end_time: Option<String>,
    failure_reason: Option<String>,
}

impl From<RunEntity> for Run {
    fn from(entity: RunEntity) -> Self {
        Self {
            run_id: entity.run_id,
            kind: entity.kind,
            status: entity.status,
            params_json: entity.params_json,
            seed: entity.seed,
            trial_number: entity.trial_number,
            start_time: Some(entity.start_time),
            end_time: entity.end_time,
            failure_reason: entity.failure_reason,
        }
    }
}
