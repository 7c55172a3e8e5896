// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{
    Database, Decode, Encode, Sqlite, Type, encode::IsNull, error::BoxDynError,
    sqlite::SqliteTypeInfo,
};

/// Identifier of a persisted task, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Failed,
    /// Only held by stores that archive successful work. The queue deletes tasks on success.
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = UnknownTaskStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "failed" => Ok(TaskStatus::Failed),
            "completed" => Ok(TaskStatus::Completed),
            _ => Err(UnknownTaskStatus(s.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown TaskStatus variant: {0}")]
pub struct UnknownTaskStatus(String);

impl Type<Sqlite> for TaskStatus {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'r> Decode<'r, Sqlite> for TaskStatus {
    fn decode(value: <Sqlite as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
        let s: &str = Decode::<Sqlite>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl<'q> Encode<'q, Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        <&str as Encode<Sqlite>>::encode(self.as_str(), buf)
    }
}

/// A task which has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: String,
    pub context: Value,
    pub key: String,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

impl NewTask {
    /// Fresh pending task which is due immediately.
    pub(crate) fn into_task(self, id: TaskId) -> Task {
        Task {
            id,
            task_type: self.task_type,
            context: self.context,
            key: self.key,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            next_retry_at: self.created_at,
            processing_started_at: None,
            processed_at: None,
            created_at: self.created_at,
            error: None,
        }
    }
}

/// The unit of durable work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    /// Handler specific payload, passed to the handler as is.
    pub context: Value,
    /// Deduplication key
    pub key: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Set when the task reached a terminal state.
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last failure message, diagnostic only.
    pub error: Option<String>,
}

impl Task {
    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }

    /// Whether another writer claimed this task less than `grace` ago.
    pub(crate) fn is_claimed_within(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        self.processing_started_at
            .is_some_and(|started_at| now - started_at < grace)
    }

    pub(crate) fn is_stale_claim(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        self.status == TaskStatus::Processing && !self.is_claimed_within(now, grace)
    }
}

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub completed: u64,
    pub total: u64,
}

impl QueueStats {
    pub(crate) fn count(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Processing => self.processing += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Completed => self.completed += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    fn task(status: TaskStatus, processing_started_at: Option<DateTime<Utc>>) -> Task {
        let now = Utc::now();
        Task {
            status,
            processing_started_at,
            ..NewTask {
                task_type: "send-message".to_owned(),
                context: Value::Null,
                key: "space:channel:send".to_owned(),
                max_retries: 3,
                created_at: now,
            }
            .into_task(TaskId::new(1))
        }
    }

    #[test]
    fn status_from_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Failed,
            TaskStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn claim_window() {
        let now = Utc::now();
        let grace = Duration::seconds(30);

        let unclaimed = task(TaskStatus::Pending, None);
        assert!(!unclaimed.is_claimed_within(now, grace));
        assert!(!unclaimed.is_stale_claim(now, grace));

        let fresh = task(TaskStatus::Processing, Some(now - Duration::seconds(5)));
        assert!(fresh.is_claimed_within(now, grace));
        assert!(!fresh.is_stale_claim(now, grace));

        let stale = task(TaskStatus::Processing, Some(now - Duration::seconds(35)));
        assert!(!stale.is_claimed_within(now, grace));
        assert!(stale.is_stale_claim(now, grace));
    }

    #[test]
    fn stats_count_total() {
        let mut stats = QueueStats::default();
        stats.count(TaskStatus::Pending, 3);
        stats.count(TaskStatus::Failed, 2);
        stats.count(TaskStatus::Completed, 1);
        assert_eq!(
            stats,
            QueueStats {
                pending: 3,
                processing: 0,
                failed: 2,
                completed: 1,
                total: 6,
            }
        );
    }
}
