// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    task::{NewTask, QueueStats, Task, TaskId, TaskStatus},
};

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Durable storage of queued tasks shared by all writers.
///
/// The store does not coordinate writers. Coordination happens through the task status and
/// timestamps read and written by the queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persists a new pending task and returns its id.
    async fn add_task(&self, task: &NewTask) -> Result<TaskId, StoreError>;

    /// Overwrites the task with the same id. Missing tasks are ignored.
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Tasks with the given status, oldest first.
    async fn get_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: u32,
    ) -> Result<Vec<Task>, StoreError>;

    /// Pending tasks whose next attempt is due at `now`, oldest first.
    async fn get_due_tasks(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Task>, StoreError>;

    /// Processing tasks claimed before `claimed_before`, oldest first.
    async fn get_stale_processing_tasks(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Task>, StoreError>;

    async fn get_pending_tasks_by_key(&self, key: &str) -> Result<Vec<Task>, StoreError>;

    async fn has_processing_task_with_key(&self, key: &str) -> Result<bool, StoreError>;

    async fn get_stats(&self) -> Result<QueueStats, StoreError>;

    /// Resets processing tasks claimed before `claimed_before` back to pending.
    ///
    /// Returns the number of reset tasks.
    async fn reset_stuck_processing_tasks(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Deletes completed tasks created before `created_before`.
    ///
    /// Returns the number of deleted tasks.
    async fn prune_completed_tasks(&self, created_before: DateTime<Utc>)
    -> Result<u64, StoreError>;
}
