// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    error::StoreError,
    task::{NewTask, QueueStats, Task, TaskId, TaskStatus},
};

use super::TaskStore;

/// Process local task store.
///
/// Clones share the same tasks, so several queues in one process can act as independent writers.
#[derive(Debug, Default, Clone)]
pub struct MemoryTaskStore {
    inner: Arc<Mutex<MemoryTasks>>,
}

#[derive(Debug, Default)]
struct MemoryTasks {
    next_id: i64,
    tasks: BTreeMap<TaskId, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the task as is, keeping its id.
    ///
    /// Allows seeding the store with tasks in arbitrary states.
    pub fn insert(&self, task: Task) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(task.id.as_i64());
        inner.tasks.insert(task.id, task);
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.inner.lock().tasks.values().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn add_task(&self, task: &NewTask) -> Result<TaskId, StoreError> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = TaskId::new(inner.next_id);
        inner.tasks.insert(id, task.clone().into_task(id));
        Ok(id)
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        if let Some(stored) = self.inner.lock().tasks.get_mut(&task.id) {
            *stored = task.clone();
        }
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        self.inner.lock().tasks.remove(&id);
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.inner.lock().tasks.get(&id).cloned())
    }

    async fn get_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: u32,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .inner
            .lock()
            .tasks
            .values()
            .filter(|task| task.status == status)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .inner
            .lock()
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending && task.is_due(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_stale_processing_tasks(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .inner
            .lock()
            .tasks
            .values()
            .filter(|task| {
                task.status == TaskStatus::Processing
                    && task
                        .processing_started_at
                        .is_none_or(|started_at| started_at < claimed_before)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_pending_tasks_by_key(&self, key: &str) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .inner
            .lock()
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Pending && task.key == key)
            .cloned()
            .collect())
    }

    async fn has_processing_task_with_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .tasks
            .values()
            .any(|task| task.status == TaskStatus::Processing && task.key == key))
    }

    async fn get_stats(&self) -> Result<QueueStats, StoreError> {
        let mut stats = QueueStats::default();
        for task in self.inner.lock().tasks.values() {
            stats.count(task.status, 1);
        }
        Ok(stats)
    }

    async fn reset_stuck_processing_tasks(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut reset = 0;
        for task in self.inner.lock().tasks.values_mut() {
            let stuck = task.status == TaskStatus::Processing
                && task
                    .processing_started_at
                    .is_none_or(|started_at| started_at < claimed_before);
            if stuck {
                task.status = TaskStatus::Pending;
                task.processing_started_at = None;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn prune_completed_tasks(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|_, task| {
            !(task.status == TaskStatus::Completed && task.created_at < created_before)
        });
        Ok((before - inner.tasks.len()) as u64)
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn new_task(key: &str) -> NewTask {
        NewTask {
            task_type: "reaction".to_owned(),
            context: json!({ "emoji": "+1" }),
            key: key.to_owned(),
            max_retries: 3,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ids_increase_in_insertion_order() {
        let store = MemoryTaskStore::new();
        let a = store.add_task(&new_task("a")).await.unwrap();
        let b = store.add_task(&new_task("b")).await.unwrap();
        assert!(a < b);

        store.delete_task(b).await.unwrap();
        let c = store.add_task(&new_task("c")).await.unwrap();
        assert!(b < c, "ids are never reused");

        let pending = store
            .get_tasks_by_status(TaskStatus::Pending, 10)
            .await
            .unwrap();
        let keys: Vec<_> = pending.iter().map(|task| task.key.as_str()).collect();
        assert_eq!(keys, ["a", "c"]);
    }

    #[tokio::test]
    async fn key_queries_respect_status() {
        let store = MemoryTaskStore::new();
        let id = store.add_task(&new_task("k")).await.unwrap();
        assert_eq!(store.get_pending_tasks_by_key("k").await.unwrap().len(), 1);
        assert!(!store.has_processing_task_with_key("k").await.unwrap());

        let mut task = store.get_task(id).await.unwrap().unwrap();
        task.status = TaskStatus::Processing;
        task.processing_started_at = Some(Utc::now());
        store.update_task(&task).await.unwrap();

        assert!(store.get_pending_tasks_by_key("k").await.unwrap().is_empty());
        assert!(store.has_processing_task_with_key("k").await.unwrap());
    }

    #[tokio::test]
    async fn due_and_stale_queries() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();
        let ids = [
            store.add_task(&new_task("waiting")).await.unwrap(),
            store.add_task(&new_task("due")).await.unwrap(),
            store.add_task(&new_task("stale")).await.unwrap(),
            store.add_task(&new_task("claimed")).await.unwrap(),
        ];
        let mut waiting = store.get_task(ids[0]).await.unwrap().unwrap();
        waiting.next_retry_at = now + Duration::minutes(2);
        store.update_task(&waiting).await.unwrap();
        for (id, started_at) in [
            (ids[2], now - Duration::minutes(1)),
            (ids[3], now - Duration::seconds(2)),
        ] {
            let mut task = store.get_task(id).await.unwrap().unwrap();
            task.status = TaskStatus::Processing;
            task.processing_started_at = Some(started_at);
            store.update_task(&task).await.unwrap();
        }

        let due = store.get_due_tasks(Utc::now(), 10).await.unwrap();
        let keys: Vec<_> = due.iter().map(|task| task.key.as_str()).collect();
        assert_eq!(keys, ["due"]);

        let stale = store
            .get_stale_processing_tasks(now - Duration::seconds(30), 10)
            .await
            .unwrap();
        let keys: Vec<_> = stale.iter().map(|task| task.key.as_str()).collect();
        assert_eq!(keys, ["stale"]);
        assert!(
            store
                .get_stale_processing_tasks(now - Duration::seconds(30), 0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn reset_and_prune() {
        let store = MemoryTaskStore::new();
        let now = Utc::now();

        let stuck = store.add_task(&new_task("stuck")).await.unwrap();
        let fresh = store.add_task(&new_task("fresh")).await.unwrap();
        for (id, started_at) in [
            (stuck, now - Duration::minutes(5)),
            (fresh, now - Duration::seconds(1)),
        ] {
            let mut task = store.get_task(id).await.unwrap().unwrap();
            task.status = TaskStatus::Processing;
            task.processing_started_at = Some(started_at);
            store.update_task(&task).await.unwrap();
        }

        let reset = store
            .reset_stuck_processing_tasks(now - Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(reset, 1);
        let task = store.get_task(stuck).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.processing_started_at, None);

        let mut archived = store.get_task(fresh).await.unwrap().unwrap();
        archived.status = TaskStatus::Completed;
        archived.created_at = now - Duration::days(8);
        store.update_task(&archived).await.unwrap();

        let pruned = store
            .prune_completed_tasks(now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(
            store.get_stats().await.unwrap(),
            QueueStats {
                pending: 1,
                total: 1,
                ..Default::default()
            }
        );
    }
}
