use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use docflow_common::{ExecutionStatus, FileExecutionRecord, NewFileExecution, OrgLimit};

use crate::error::{Result, StoreError};
use crate::types::{FileExecutionStore, OrgLimitStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS org_concurrency_limits (
        org_id TEXT PRIMARY KEY,
        concurrent_request_limit INTEGER NOT NULL CHECK (concurrent_request_limit > 0),
        modified_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_executions (
        id TEXT PRIMARY KEY,
        execution_id TEXT NOT NULL,
        file_name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        file_size BIGINT NOT NULL DEFAULT 0,
        mime_type TEXT,
        status TEXT NOT NULL,
        execution_time DOUBLE PRECISION,
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (execution_id, file_hash, file_path)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS file_executions_execution_id_idx ON file_executions (execution_id)",
];

const FILE_COLUMNS: &str = "id, execution_id, file_name, file_path, file_hash, file_size, \
     mime_type, status, execution_time, error, created_at, updated_at";

/// PostgreSQL implementation of both durable stores.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        tracing::info!("database schema ensured");
        Ok(())
    }
}

fn org_limit_from_row(row: &PgRow) -> Result<OrgLimit> {
    let limit: i32 = row.try_get("concurrent_request_limit")?;
    Ok(OrgLimit {
        org_id: row.try_get("org_id")?,
        concurrent_request_limit: u32::try_from(limit)
            .map_err(|_| StoreError::Corrupt(format!("negative limit {limit}")))?,
        modified_at: row.try_get("modified_at")?,
    })
}

fn file_from_row(row: &PgRow) -> Result<FileExecutionRecord> {
    let status_raw: String = row.try_get("status")?;
    let status = ExecutionStatus::from_str(&status_raw)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let file_size: i64 = row.try_get("file_size")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(FileExecutionRecord {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        file_name: row.try_get("file_name")?,
        file_path: row.try_get("file_path")?,
        file_hash: row.try_get("file_hash")?,
        file_size: file_size.max(0) as u64,
        mime_type: row.try_get("mime_type")?,
        status,
        execution_time: row.try_get("execution_time")?,
        error: row.try_get("error")?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl OrgLimitStore for PgStore {
    async fn get(&self, org_id: &str) -> Result<Option<OrgLimit>> {
        let row = sqlx::query(
            "SELECT org_id, concurrent_request_limit, modified_at \
             FROM org_concurrency_limits WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(org_limit_from_row).transpose()
    }

    async fn upsert(&self, org_id: &str, limit: u32) -> Result<OrgLimit> {
        if limit == 0 {
            return Err(StoreError::InvalidLimit(limit));
        }
        let limit_i32 = i32::try_from(limit).map_err(|_| StoreError::InvalidLimit(limit))?;
        let row = sqlx::query(
            r#"
            INSERT INTO org_concurrency_limits (org_id, concurrent_request_limit, modified_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (org_id)
            DO UPDATE SET concurrent_request_limit = EXCLUDED.concurrent_request_limit,
                          modified_at = NOW()
            RETURNING org_id, concurrent_request_limit, modified_at
            "#,
        )
        .bind(org_id)
        .bind(limit_i32)
        .fetch_one(&self.pool)
        .await?;
        org_limit_from_row(&row)
    }

    async fn delete(&self, org_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM org_concurrency_limits WHERE org_id = $1")
            .bind(org_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<OrgLimit>> {
        let rows = sqlx::query(
            "SELECT org_id, concurrent_request_limit, modified_at \
             FROM org_concurrency_limits ORDER BY org_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(org_limit_from_row).collect()
    }
}

#[async_trait]
impl FileExecutionStore for PgStore {
    async fn create_or_get(&self, new: NewFileExecution) -> Result<(FileExecutionRecord, bool)> {
        let id = uuid::Uuid::new_v4().to_string();
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO file_executions
                (id, execution_id, file_name, file_path, file_hash, file_size, mime_type, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (execution_id, file_hash, file_path) DO NOTHING
            RETURNING {FILE_COLUMNS}
            "#
        ))
        .bind(&id)
        .bind(&new.execution_id)
        .bind(&new.file_name)
        .bind(&new.file_path)
        .bind(&new.file_hash)
        .bind(i64::try_from(new.file_size).unwrap_or(i64::MAX))
        .bind(&new.mime_type)
        .bind(ExecutionStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((file_from_row(&row)?, true));
        }

        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM file_executions \
             WHERE execution_id = $1 AND file_hash = $2 AND file_path = $3"
        ))
        .bind(&new.execution_id)
        .bind(&new.file_hash)
        .bind(&new.file_path)
        .fetch_one(&self.pool)
        .await?;
        Ok((file_from_row(&row)?, false))
    }

    async fn get(&self, id: &str) -> Result<Option<FileExecutionRecord>> {
        let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM file_executions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(file_from_row).transpose()
    }

    async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<FileExecutionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM file_executions \
             WHERE execution_id = $1 ORDER BY created_at, id"
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_from_row).collect()
    }

    async fn transition(
        &self,
        id: &str,
        to: ExecutionStatus,
        error: Option<String>,
        execution_time: Option<f64>,
    ) -> Result<(FileExecutionRecord, bool)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {FILE_COLUMNS} FROM file_executions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };

        let mut record = file_from_row(&row)?;
        if !record.transition(to, error, execution_time, Utc::now())? {
            tx.rollback().await?;
            return Ok((record, false));
        }

        sqlx::query(
            r#"
            UPDATE file_executions
            SET status = $2, error = $3, execution_time = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.execution_time)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(file_execution_id = %record.id, status = %record.status, "file execution transitioned");
        Ok((record, true))
    }

    async fn count_by_status(&self, execution_id: &str) -> Result<HashMap<ExecutionStatus, u64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM file_executions \
             WHERE execution_id = $1 GROUP BY status",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let raw: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status =
                ExecutionStatus::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            counts.insert(status, n.max(0) as u64);
        }
        Ok(counts)
    }
}
