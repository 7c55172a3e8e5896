// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::{
    runtime::Handle,
    sync::{broadcast, watch},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthGate, AuthMaterial},
    config::QueueConfig,
    context::find_secret_field,
    error::{QueueError, StoreError},
    events::{QueueEvent, QueueNotifier},
    handler::HandlerRegistry,
    retry::RetryPolicy,
    store::TaskStore,
    task::{NewTask, QueueStats, Task, TaskId, TaskStatus},
    utils::time_before,
};

mod process;
#[cfg(test)]
mod test_utils;

/// Number of failed tasks inspected per pruning run.
const FAILED_PRUNE_BATCH: u32 = 1000;

/// Minimum period of the processing timer.
const MIN_PROCESS_INTERVAL: Duration = Duration::from_millis(1);

type OnlineCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// Durable queue of actions which must eventually be performed.
///
/// Tasks are persisted in a [`TaskStore`] and executed by the handler registered for their task
/// type. Processing is suspended while the client is offline, no handlers are set, or no
/// [`AuthMaterial`] is available. Failed executions are retried with exponential backoff.
///
/// Several queues (writers) may share the same store, e.g. one per process or tab. A task claimed
/// by one writer is left alone by all others for the configured grace period.
///
/// The queue is cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<ActionQueueInner>,
}

struct ActionQueueInner {
    store: Arc<dyn TaskStore>,
    config: QueueConfig,
    retry_policy: RetryPolicy,
    writer_id: Uuid,
    auth: AuthGate,
    handlers: RwLock<Option<Arc<HandlerRegistry>>>,
    online: AtomicBool,
    is_online: RwLock<Option<OnlineCallback>>,
    /// Held for the duration of a processing pass
    processing: tokio::sync::Mutex<()>,
    /// Cancels the processing timer; `Some` while started
    timer: Mutex<Option<CancellationToken>>,
    notifier: QueueNotifier,
}

impl fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue")
            .field("writer_id", &self.inner.writer_id)
            .field("config", &self.inner.config)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl ActionQueue {
    pub fn new(store: Arc<dyn TaskStore>, config: QueueConfig) -> Self {
        let retry_policy = config.retry_policy();
        let inner = ActionQueueInner {
            store,
            config,
            retry_policy,
            writer_id: Uuid::new_v4(),
            auth: AuthGate::default(),
            handlers: RwLock::new(None),
            online: AtomicBool::new(true),
            is_online: RwLock::new(None),
            processing: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
            notifier: QueueNotifier::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Persists a new task and triggers a processing pass in the background.
    ///
    /// Pending tasks with the same `key` are superseded by the new task. Tasks with the same key
    /// which are currently processing are not affected; the new task runs after them.
    pub async fn enqueue(
        &self,
        task_type: impl AsRef<str>,
        context: Value,
        key: impl Into<String>,
    ) -> Result<TaskId, QueueError> {
        let task_type = task_type.as_ref();
        let key = key.into();

        if self.inner.config.reject_secret_fields
            && let Some(field) = find_secret_field(&context)
        {
            warn!(task_type, %key, %field, "Rejecting task context with secret material");
            return Err(QueueError::SecretInContext { field });
        }

        self.ensure_capacity().await?;

        let store = &self.inner.store;
        let superseded = store.get_pending_tasks_by_key(&key).await?;
        for task in &superseded {
            store.delete_task(task.id).await?;
        }
        if !superseded.is_empty() {
            debug!(%key, count = superseded.len(), "Superseded pending tasks");
        }
        if store.has_processing_task_with_key(&key).await? {
            debug!(%key, "Task with the same key is processing; enqueueing anyway");
        }

        let task = NewTask {
            task_type: task_type.to_owned(),
            context,
            key,
            max_retries: self.inner.config.max_retries,
            created_at: Utc::now(),
        };
        let id = store.add_task(&task).await?;
        debug!(task_id = %id, task_type, key = %task.key, "Enqueued task");

        self.inner.notifier.updated();
        self.notify_work();
        Ok(id)
    }

    async fn ensure_capacity(&self) -> Result<(), QueueError> {
        let config = &self.inner.config;
        let stats = self.inner.store.get_stats().await?;
        if stats.total < config.max_queue_size {
            return Ok(());
        }

        warn!(total = stats.total, "Action queue at capacity; pruning old tasks");
        self.prune_old_tasks().await?;

        let stats = self.inner.store.get_stats().await?;
        if stats.pending >= config.full_threshold() {
            warn!(pending = stats.pending, "Action queue is full");
            return Err(QueueError::QueueFull);
        }
        Ok(())
    }

    /// Deletes completed and failed tasks older than the configured maximum task age.
    ///
    /// Returns the number of deleted tasks.
    pub async fn prune_old_tasks(&self) -> Result<u64, StoreError> {
        let store = &self.inner.store;
        let cutoff = time_before(Utc::now(), self.inner.config.max_task_age);

        let mut pruned = store.prune_completed_tasks(cutoff).await?;
        let failed = store
            .get_tasks_by_status(TaskStatus::Failed, FAILED_PRUNE_BATCH)
            .await?;
        for task in failed {
            if task.processed_at.is_some_and(|at| at < cutoff) {
                store.delete_task(task.id).await?;
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(pruned, "Pruned old tasks");
            self.inner.notifier.updated();
        }
        Ok(pruned)
    }

    /// Starts the processing timer.
    ///
    /// The first start resets tasks stuck in processing beyond the grace period. Starting an
    /// already started queue does nothing.
    pub async fn start(&self) -> Result<(), StoreError> {
        let cancel = {
            let mut timer = self.inner.timer.lock();
            if timer.is_some() {
                debug!("Action queue already started");
                return Ok(());
            }
            let cancel = CancellationToken::new();
            *timer = Some(cancel.clone());
            cancel
        };

        if let Err(error) = self.reset_stuck_tasks().await {
            self.inner.timer.lock().take();
            return Err(error);
        }
        if cancel.is_cancelled() {
            // stopped in the meantime
            return Ok(());
        }

        info!(writer_id = %self.inner.writer_id, "Starting action queue");
        tokio::spawn(
            self.clone()
                .run_timer(cancel)
                .instrument(self.writer_span()),
        );
        Ok(())
    }

    /// Stops the processing timer.
    ///
    /// A processing pass which is currently running is not interrupted.
    pub fn stop(&self) {
        if let Some(cancel) = self.inner.timer.lock().take() {
            info!(writer_id = %self.inner.writer_id, "Stopping action queue");
            cancel.cancel();
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    async fn run_timer(self, cancel: CancellationToken) {
        let period = self.inner.config.process_interval.max(MIN_PROCESS_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.process_queue().await;
        }
        debug!("Processing timer stopped");
    }

    /// Resets tasks stuck in processing beyond the grace period back to pending.
    pub async fn reset_stuck_tasks(&self) -> Result<u64, StoreError> {
        let claimed_before = time_before(Utc::now(), self.inner.config.multi_writer_grace);
        let reset = self
            .inner
            .store
            .reset_stuck_processing_tasks(claimed_before)
            .await?;
        if reset > 0 {
            info!(reset, "Reset stuck tasks");
            self.inner.notifier.updated();
        }
        Ok(reset)
    }

    /// Runs a processing pass in the background, if there is a runtime.
    fn notify_work(&self) {
        let Ok(runtime) = Handle::try_current() else {
            debug!("No runtime; skipping processing pass");
            return;
        };
        let queue = self.clone();
        runtime.spawn(async move { queue.process_queue().await }.instrument(self.writer_span()));
    }

    fn writer_span(&self) -> Span {
        info_span!("action_queue", writer_id = %self.inner.writer_id)
    }

    pub async fn get_stats(&self) -> Result<QueueStats, StoreError> {
        self.inner.store.get_stats().await
    }

    /// Tasks with the given status, oldest first.
    pub async fn list_tasks(&self, status: TaskStatus, limit: u32) -> Result<Vec<Task>, StoreError> {
        self.inner.store.get_tasks_by_status(status, limit).await
    }

    /// Replaces a failed task by a fresh pending task with the same type, context and key.
    pub async fn requeue_failed(&self, id: TaskId) -> Result<TaskId, QueueError> {
        let task = self
            .inner
            .store
            .get_task(id)
            .await?
            .ok_or(QueueError::TaskNotFound(id))?;
        if task.status != TaskStatus::Failed {
            return Err(QueueError::NotFailed {
                id,
                status: task.status,
            });
        }
        info!(task_id = %id, task_type = %task.task_type, "Requeueing failed task");
        // The failed task is only removed once its replacement is stored.
        let new_id = self.enqueue(&task.task_type, task.context, task.key).await?;
        self.inner.store.delete_task(id).await?;
        self.inner.notifier.updated();
        Ok(new_id)
    }

    /// Opens the auth gate and triggers a processing pass.
    pub fn set_auth_material(&self, material: AuthMaterial) {
        self.inner.auth.set(material);
        debug!("Auth material set");
        self.notify_work();
    }

    pub fn get_auth_material(&self) -> Option<Arc<AuthMaterial>> {
        self.inner.auth.get()
    }

    /// Closes the auth gate. Processing is suspended until new material is set.
    pub fn clear_auth_material(&self) {
        self.inner.auth.clear();
        debug!("Auth material cleared");
    }

    /// Sets the default online signal. The queue starts out online.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::Release);
    }

    /// Overrides the default online signal.
    pub fn set_is_online_callback(&self, is_online: impl Fn() -> bool + Send + Sync + 'static) {
        *self.inner.is_online.write() = Some(Arc::new(is_online));
    }

    pub fn is_online(&self) -> bool {
        let callback = self.inner.is_online.read().clone();
        match callback {
            Some(is_online) => is_online(),
            None => self.inner.online.load(Ordering::Acquire),
        }
    }

    pub fn set_handlers(&self, handlers: HandlerRegistry) {
        debug!(?handlers, "Handlers set");
        *self.inner.handlers.write() = Some(Arc::new(handlers));
    }

    /// Session expiry and task failure notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.notifier.subscribe()
    }

    /// Revision of the queue, increased on every change made by this queue.
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.inner.notifier.subscribe_updates()
    }
}
