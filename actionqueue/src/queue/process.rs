// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    auth::AuthMaterial,
    error::{StoreError, is_auth_error},
    events::QueueEvent,
    handler::{HandlerRegistry, TaskHandler},
    retry::RetryPolicy,
    task::{Task, TaskId, TaskStatus},
    utils::{time_after, time_before, to_chrono},
};

use super::ActionQueue;

pub(crate) const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";

/// What happened to a task whose execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureOutcome {
    SessionExpired,
    Failed,
    Retry { delay: Duration },
}

impl ActionQueue {
    /// Processes a batch of tasks which are due.
    ///
    /// Does nothing while offline, without handlers, or without auth material, and when another
    /// pass of this queue is running. Failures of single tasks are recorded in the store.
    pub async fn process_queue(&self) {
        let Ok(_guard) = self.inner.processing.try_lock() else {
            debug!("Processing pass already running");
            return;
        };
        if !self.is_online() {
            debug!("Offline; skipping processing pass");
            return;
        }
        let Some(handlers) = self.inner.handlers.read().clone() else {
            debug!("No handlers set; skipping processing pass");
            return;
        };
        if !self.inner.auth.is_open() {
            debug!("No auth material; skipping processing pass");
            return;
        }

        if let Err(error) = self.process_batch(&handlers).await {
            error!(%error, "Failed to process action queue");
        }
    }

    async fn process_batch(&self, handlers: &HandlerRegistry) -> Result<(), StoreError> {
        let store = &self.inner.store;
        let batch_size = self.inner.config.batch_size;
        let grace = self.inner.config.multi_writer_grace;

        // Tasks which are backing off do not take up room in the batch.
        let now = Utc::now();
        let mut batch = store.get_due_tasks(now, batch_size).await?;
        let room = batch_size.saturating_sub(u32::try_from(batch.len()).unwrap_or(u32::MAX));
        if room > 0 {
            let abandoned = store
                .get_stale_processing_tasks(time_before(now, grace), room)
                .await?;
            batch.extend(abandoned);
        }

        for task in batch {
            if !task.is_due(Utc::now()) {
                continue;
            }
            let Some(auth) = self.inner.auth.get() else {
                debug!("Auth material cleared; suspending processing pass");
                break;
            };
            self.process_task(task.id, handlers, &auth).await?;
        }
        Ok(())
    }

    async fn process_task(
        &self,
        task_id: TaskId,
        handlers: &HandlerRegistry,
        auth: &AuthMaterial,
    ) -> Result<(), StoreError> {
        let store = &self.inner.store;
        let notifier = &self.inner.notifier;
        let grace = to_chrono(self.inner.config.multi_writer_grace);

        // Another writer might have claimed or finished the task since the batch was loaded.
        let Some(mut task) = store.get_task(task_id).await? else {
            debug!(%task_id, "Task is gone; skipping");
            return Ok(());
        };
        let now = Utc::now();
        let claimable = match task.status {
            TaskStatus::Pending => !task.is_claimed_within(now, grace),
            TaskStatus::Processing => task.is_stale_claim(now, grace),
            TaskStatus::Failed | TaskStatus::Completed => false,
        };
        if !claimable || !task.is_due(now) {
            debug!(%task_id, status = %task.status, "Task is owned by another writer; skipping");
            return Ok(());
        }

        task.status = TaskStatus::Processing;
        task.processing_started_at = Some(now);
        store.update_task(&task).await?;
        notifier.updated();

        let Some(handler) = handlers.get(&task.task_type).cloned() else {
            warn!(%task_id, task_type = %task.task_type, "No handler registered");
            task.status = TaskStatus::Failed;
            task.error = Some(format!(
                "No handler registered for task type: {}",
                task.task_type
            ));
            task.processing_started_at = None;
            task.processed_at = Some(Utc::now());
            store.update_task(&task).await?;
            notifier.updated();
            return Ok(());
        };

        debug!(
            %task_id,
            task_type = %task.task_type,
            attempt = task.retry_count.saturating_add(1),
            "Executing task"
        );
        let error = match handler.execute(&task.context, auth).await {
            Ok(()) => {
                store.delete_task(task_id).await?;
                debug!(%task_id, "Task done");
                notifier.updated();
                return Ok(());
            }
            Err(error) => error,
        };

        let outcome = record_failure(
            &mut task,
            handler.as_ref(),
            &error,
            Utc::now(),
            &self.inner.retry_policy,
        );
        store.update_task(&task).await?;
        notifier.updated();

        match outcome {
            FailureOutcome::SessionExpired => {
                warn!(%task_id, %error, "Session expired; failing task");
                notifier.emit(QueueEvent::SessionExpired);
                handler.on_failure(&task.context, &error);
            }
            FailureOutcome::Failed => {
                error!(%task_id, task_type = %task.task_type, %error, "Task failed; dropping");
                handler.on_failure(&task.context, &error);
                if let Some(message) = handler.failure_message() {
                    notifier.emit(QueueEvent::TaskFailed {
                        task_id,
                        task_type: task.task_type.clone(),
                        message: message.to_owned(),
                    });
                }
            }
            FailureOutcome::Retry { delay } => {
                info!(
                    %task_id,
                    retry_count = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "Task failed; will retry later"
                );
            }
        }
        Ok(())
    }
}

/// Moves a task whose execution failed into its next state.
fn record_failure(
    task: &mut Task,
    handler: &dyn TaskHandler,
    error: &anyhow::Error,
    now: DateTime<Utc>,
    retry_policy: &RetryPolicy,
) -> FailureOutcome {
    task.processing_started_at = None;

    if is_auth_error(error) {
        task.status = TaskStatus::Failed;
        task.error = Some(SESSION_EXPIRED_MESSAGE.to_owned());
        task.processed_at = Some(now);
        return FailureOutcome::SessionExpired;
    }

    if handler.is_permanent_error(error) {
        task.status = TaskStatus::Failed;
        task.error = Some(format!("{error:#}"));
        task.processed_at = Some(now);
        return FailureOutcome::Failed;
    }

    task.retry_count = task.retry_count.saturating_add(1);
    if task.retry_count >= task.max_retries {
        task.status = TaskStatus::Failed;
        task.error = Some(format!("Max retries exceeded: {error:#}"));
        task.processed_at = Some(now);
        return FailureOutcome::Failed;
    }

    let delay = retry_policy.backoff(task.retry_count);
    task.status = TaskStatus::Pending;
    task.next_retry_at = time_after(now, delay);
    task.error = Some(format!("{error:#}"));
    FailureOutcome::Retry { delay }
}
