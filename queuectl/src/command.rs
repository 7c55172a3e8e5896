// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::io::Write;

use airactionqueue::{ActionQueue, TaskId};
use tracing::info;

use crate::args::Command;

pub async fn run_command(
    command: Command,
    queue: &ActionQueue,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Stats => {
            let stats = queue.get_stats().await?;
            writeln!(out, "pending:    {}", stats.pending)?;
            writeln!(out, "processing: {}", stats.processing)?;
            writeln!(out, "failed:     {}", stats.failed)?;
            writeln!(out, "completed:  {}", stats.completed)?;
            writeln!(out, "total:      {}", stats.total)?;
        }
        Command::List { status, limit } => {
            let tasks = queue.list_tasks(status.into(), limit).await?;
            for task in tasks {
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{}/{}\t{}\t{}",
                    task.id,
                    task.task_type,
                    task.key,
                    task.status,
                    task.retry_count,
                    task.max_retries,
                    task.created_at.to_rfc3339(),
                    task.error.as_deref().unwrap_or("-"),
                )?;
            }
        }
        Command::Requeue { id } => {
            let new_id = queue.requeue_failed(TaskId::new(id)).await?;
            info!(%new_id, "Requeued task {id}");
            writeln!(out, "{new_id}")?;
        }
        Command::ResetStuck => {
            let reset = queue.reset_stuck_tasks().await?;
            writeln!(out, "reset {reset} tasks")?;
        }
        Command::Prune => {
            let pruned = queue.prune_old_tasks().await?;
            writeln!(out, "pruned {pruned} tasks")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use airactionqueue::{
        QueueConfig, QueueError, TaskStatus,
        store::{MemoryTaskStore, TaskStore},
    };
    use serde_json::json;

    use crate::args::StatusArg;

    use super::*;

    async fn run(queue: &ActionQueue, command: Command) -> anyhow::Result<String> {
        let mut out = Vec::new();
        run_command(command, queue, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    async fn failed_task(store: &MemoryTaskStore, queue: &ActionQueue, key: &str) -> TaskId {
        let id = queue
            .enqueue("sendMessage", json!({ "text": "hi" }), key)
            .await
            .unwrap();
        let mut task = store.get_task(id).await.unwrap().unwrap();
        task.status = TaskStatus::Failed;
        task.error = Some("Max retries exceeded: timeout".to_owned());
        store.update_task(&task).await.unwrap();
        id
    }

    #[tokio::test]
    async fn stats_and_list() {
        let store = MemoryTaskStore::new();
        let queue = ActionQueue::new(Arc::new(store.clone()), QueueConfig::default());
        queue
            .enqueue("reaction", json!({ "emoji": "+1" }), "m:1:reaction")
            .await
            .unwrap();
        let failed = failed_task(&store, &queue, "m:2:send").await;

        let stats = run(&queue, Command::Stats).await.unwrap();
        assert!(stats.contains("pending:    1"));
        assert!(stats.contains("failed:     1"));
        assert!(stats.contains("total:      2"));

        let listed = run(
            &queue,
            Command::List {
                status: StatusArg::Failed,
                limit: 10,
            },
        )
        .await
        .unwrap();
        let lines: Vec<_> = listed.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&format!("{failed}\tsendMessage\tm:2:send\tfailed\t0/3")));
        assert!(lines[0].ends_with("Max retries exceeded: timeout"));
    }

    #[tokio::test]
    async fn requeue_replaces_failed_task() {
        let store = MemoryTaskStore::new();
        let queue = ActionQueue::new(Arc::new(store.clone()), QueueConfig::default());
        let failed = failed_task(&store, &queue, "m:2:send").await;

        let output = run(&queue, Command::Requeue { id: failed.as_i64() })
            .await
            .unwrap();
        let new_id: i64 = output.trim().parse().unwrap();
        assert_ne!(new_id, failed.as_i64());

        assert!(store.get_task(failed).await.unwrap().is_none());
        let task = store.get_task(TaskId::new(new_id)).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.key, "m:2:send");
        assert_eq!(task.context, json!({ "text": "hi" }));
    }

    #[tokio::test]
    async fn requeue_rejects_pending_task() {
        let store = MemoryTaskStore::new();
        let queue = ActionQueue::new(Arc::new(store.clone()), QueueConfig::default());
        let id = queue
            .enqueue("reaction", json!({}), "m:1:reaction")
            .await
            .unwrap();

        let error = run(&queue, Command::Requeue { id: id.as_i64() })
            .await
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<QueueError>(),
            Some(QueueError::NotFailed { .. })
        ));
    }
}
