// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable queue of outbound client actions.
//!
//! Actions like sending a message or saving the user config are enqueued as tasks and executed
//! by a [`TaskHandler`] once the client is online and authenticated. Failed executions are
//! retried with exponential backoff, and repeated submissions with the same key supersede each
//! other while they are still pending.

mod auth;
mod config;
mod context;
mod error;
mod events;
mod handler;
mod queue;
mod retry;
pub mod store;
mod task;
mod utils;

pub use auth::AuthMaterial;
pub use config::QueueConfig;
pub use error::{QueueError, StoreError, Unauthorized, error_mentions_any};
pub use events::QueueEvent;
pub use handler::{ActionType, HandlerRegistry, TaskHandler};
pub use queue::ActionQueue;
pub use retry::RetryPolicy;
pub use task::{NewTask, QueueStats, Task, TaskId, TaskStatus, UnknownTaskStatus};
