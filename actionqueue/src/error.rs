// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::task::{TaskId, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Invalid task context: {0}")]
    Context(#[from] serde_json::Error),
    #[error("Invalid timestamp in column {column}: {millis}")]
    InvalidTimestamp { column: &'static str, millis: i64 },
    #[error("Value out of range in column {column}")]
    OutOfRange { column: &'static str },
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Action queue is full. Please try again later.")]
    QueueFull,
    #[error("Task context contains secret material in field `{field}`")]
    SecretInContext { field: String },
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),
    #[error("Task {id} is {status}, expected failed")]
    NotFailed { id: TaskId, status: TaskStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Marker error for an expired or rejected session.
///
/// A handler returning this error (anywhere in the error chain) fails the task immediately and
/// emits [`crate::QueueEvent::SessionExpired`].
#[derive(Debug, Clone, Copy, Default, thiserror::Error)]
#[error("401 Unauthorized")]
pub struct Unauthorized;

/// Returns whether the error signals an authentication or session failure.
pub(crate) fn is_auth_error(error: &anyhow::Error) -> bool {
    if error.chain().any(|cause| cause.is::<Unauthorized>()) {
        return true;
    }
    let message = format!("{error:#}");
    message.contains("401") || message.to_lowercase().contains("unauthorized")
}

/// Returns whether the rendered error chain contains any of the markers (case-insensitive).
///
/// Helper for classifying errors in [`crate::TaskHandler::is_permanent_error`] by status code
/// markers like `"404"` or phrases like `"not found"`.
pub fn error_mentions_any(error: &anyhow::Error, markers: &[&str]) -> bool {
    let message = format!("{error:#}").to_lowercase();
    markers
        .iter()
        .any(|marker| message.contains(&marker.to_lowercase()))
}
