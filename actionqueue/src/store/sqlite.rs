// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Row, SqlitePool, query, query_scalar,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};
use tracing::debug;

use crate::{
    error::StoreError,
    task::{NewTask, QueueStats, Task, TaskId, TaskStatus},
};

use super::TaskStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_COLUMNS: &str = "id, task_type, context, task_key, status, retry_count, max_retries,
    next_retry_at, processing_started_at, processed_at, created_at, error";

/// Task store backed by a SQLite database.
///
/// Several processes may open the same database file and act as independent writers.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Opens (or creates) the database at `path` and applies the migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn add_task(&self, task: &NewTask) -> Result<TaskId, StoreError> {
        debug!(task_type = %task.task_type, key = %task.key, "Persisting task");
        let context = serde_json::to_string(&task.context)?;
        let created_at = task.created_at.timestamp_millis();
        let id: i64 = query_scalar(
            "INSERT INTO action_queue
                (task_type, context, task_key, status, retry_count, max_retries,
                 next_retry_at, created_at)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)
            RETURNING id",
        )
        .bind(&task.task_type)
        .bind(context)
        .bind(&task.key)
        .bind(TaskStatus::Pending)
        .bind(i64::from(task.max_retries))
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(TaskId::new(id))
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let context = serde_json::to_string(&task.context)?;
        query(
            "UPDATE action_queue SET
                task_type = ?2,
                context = ?3,
                task_key = ?4,
                status = ?5,
                retry_count = ?6,
                max_retries = ?7,
                next_retry_at = ?8,
                processing_started_at = ?9,
                processed_at = ?10,
                created_at = ?11,
                error = ?12
            WHERE id = ?1",
        )
        .bind(task.id.as_i64())
        .bind(&task.task_type)
        .bind(context)
        .bind(&task.key)
        .bind(task.status)
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(task.next_retry_at.timestamp_millis())
        .bind(task.processing_started_at.map(|at| at.timestamp_millis()))
        .bind(task.processed_at.map(|at| at.timestamp_millis()))
        .bind(task.created_at.timestamp_millis())
        .bind(task.error.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        query("DELETE FROM action_queue WHERE id = ?")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM action_queue WHERE id = ?");
        query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| task_from_row(&row))
            .transpose()
    }

    async fn get_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: u32,
    ) -> Result<Vec<Task>, StoreError> {
        let sql =
            format!("SELECT {TASK_COLUMNS} FROM action_queue WHERE status = ? ORDER BY id LIMIT ?");
        query(&sql)
            .bind(status)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(task_from_row)
            .collect()
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM action_queue
            WHERE status = ? AND next_retry_at <= ?
            ORDER BY id LIMIT ?"
        );
        query(&sql)
            .bind(TaskStatus::Pending)
            .bind(now.timestamp_millis())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(task_from_row)
            .collect()
    }

    async fn get_stale_processing_tasks(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM action_queue
            WHERE status = ?
                AND (processing_started_at IS NULL OR processing_started_at < ?)
            ORDER BY id LIMIT ?"
        );
        query(&sql)
            .bind(TaskStatus::Processing)
            .bind(claimed_before.timestamp_millis())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(task_from_row)
            .collect()
    }

    async fn get_pending_tasks_by_key(&self, key: &str) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM action_queue WHERE task_key = ? AND status = ? ORDER BY id"
        );
        query(&sql)
            .bind(key)
            .bind(TaskStatus::Pending)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(task_from_row)
            .collect()
    }

    async fn has_processing_task_with_key(&self, key: &str) -> Result<bool, StoreError> {
        let exists: i64 = query_scalar(
            "SELECT EXISTS (SELECT 1 FROM action_queue WHERE task_key = ? AND status = ?)",
        )
        .bind(key)
        .bind(TaskStatus::Processing)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    async fn get_stats(&self) -> Result<QueueStats, StoreError> {
        let rows = query("SELECT status, COUNT(*) AS count FROM action_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let status: TaskStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            stats.count(status, to_u64(count, "count")?);
        }
        Ok(stats)
    }

    async fn reset_stuck_processing_tasks(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut txn = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let result = query(
            "UPDATE action_queue
            SET status = ?1, processing_started_at = NULL
            WHERE status = ?2
                AND (processing_started_at IS NULL OR processing_started_at < ?3)",
        )
        .bind(TaskStatus::Pending)
        .bind(TaskStatus::Processing)
        .bind(claimed_before.timestamp_millis())
        .execute(txn.as_mut())
        .await?;
        txn.commit().await?;
        Ok(result.rows_affected())
    }

    async fn prune_completed_tasks(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = query("DELETE FROM action_queue WHERE status = ? AND created_at < ?")
            .bind(TaskStatus::Completed)
            .bind(created_before.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let context: String = row.try_get("context")?;
    Ok(Task {
        id: TaskId::new(row.try_get("id")?),
        task_type: row.try_get("task_type")?,
        context: serde_json::from_str(&context)?,
        key: row.try_get("task_key")?,
        status: row.try_get("status")?,
        retry_count: to_u32(row.try_get("retry_count")?, "retry_count")?,
        max_retries: to_u32(row.try_get("max_retries")?, "max_retries")?,
        next_retry_at: from_millis(row.try_get("next_retry_at")?, "next_retry_at")?,
        processing_started_at: row
            .try_get::<Option<i64>, _>("processing_started_at")?
            .map(|millis| from_millis(millis, "processing_started_at"))
            .transpose()?,
        processed_at: row
            .try_get::<Option<i64>, _>("processed_at")?
            .map(|millis| from_millis(millis, "processed_at"))
            .transpose()?,
        created_at: from_millis(row.try_get("created_at")?, "created_at")?,
        error: row.try_get("error")?,
    })
}

fn from_millis(millis: i64, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or(StoreError::InvalidTimestamp { column, millis })
}

fn to_u32(value: i64, column: &'static str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::OutOfRange { column })
}

fn to_u64(value: i64, column: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::OutOfRange { column })
}
