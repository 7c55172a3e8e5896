// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{mem, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

use crate::{
    auth::AuthMaterial,
    config::QueueConfig,
    handler::TaskHandler,
    store::MemoryTaskStore,
    task::{NewTask, Task, TaskId},
};

use super::ActionQueue;

pub(super) fn queue_with(store: &MemoryTaskStore, config: QueueConfig) -> ActionQueue {
    ActionQueue::new(Arc::new(store.clone()), config)
}

pub(super) fn auth_material() -> AuthMaterial {
    AuthMaterial::new("alice@example.com", vec![7; 32], vec![9; 32])
}

pub(super) fn test_context() -> Value {
    json!({ "spaceId": "space-1", "channelId": "channel-1", "text": "hello" })
}

/// Inserts a pending task which is due now, modified by `f`.
pub(super) fn seed(
    store: &MemoryTaskStore,
    task_type: &str,
    key: &str,
    f: impl FnOnce(&mut Task),
) -> TaskId {
    let next_id = store
        .tasks()
        .iter()
        .map(|task| task.id.as_i64())
        .max()
        .unwrap_or(0)
        + 1;
    let mut task = NewTask {
        task_type: task_type.to_owned(),
        context: test_context(),
        key: key.to_owned(),
        max_retries: 3,
        created_at: Utc::now(),
    }
    .into_task(TaskId::new(next_id));
    f(&mut task);
    let id = task.id;
    store.insert(task);
    id
}

pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Handler recording its calls.
///
/// Fails every execution with `error` if set.
#[derive(Clone, Default)]
pub(super) struct TestHandler {
    error: Option<&'static str>,
    permanent: bool,
    failure_message: Option<&'static str>,
    executed: Arc<Mutex<Vec<Value>>>,
    failures: Arc<Mutex<Vec<(Value, String)>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl TestHandler {
    pub(super) fn failing(error: &'static str) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub(super) fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub(super) fn with_failure_message(mut self, message: &'static str) -> Self {
        self.failure_message = Some(message);
        self
    }

    pub(super) fn executed(&self) -> Vec<Value> {
        self.executed.lock().clone()
    }

    pub(super) fn failures(&self) -> Vec<(Value, String)> {
        self.failures.lock().clone()
    }

    pub(super) fn take_log(&self) -> Vec<String> {
        mem::take(&mut *self.log.lock())
    }
}

#[async_trait]
impl TaskHandler for TestHandler {
    async fn execute(&self, context: &Value, auth: &AuthMaterial) -> anyhow::Result<()> {
        assert_eq!(auth.user_address(), "alice@example.com");
        let label = context["label"].as_str().unwrap_or_default().to_owned();
        self.log.lock().push(format!("start {label}"));
        tokio::task::yield_now().await;
        self.executed.lock().push(context.clone());
        self.log.lock().push(format!("end {label}"));
        match self.error {
            Some(error) => Err(anyhow::anyhow!(error)),
            None => Ok(()),
        }
    }

    fn is_permanent_error(&self, _error: &anyhow::Error) -> bool {
        self.permanent
    }

    fn on_failure(&self, context: &Value, error: &anyhow::Error) {
        self.failures.lock().push((context.clone(), format!("{error:#}")));
    }

    fn failure_message(&self) -> Option<&str> {
        self.failure_message
    }
}
