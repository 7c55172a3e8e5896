// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::AuthMaterial;

/// Executes tasks of one task type.
///
/// Execution is at-least-once: a task may be executed again after a crash or when two writers
/// race for it, so implementations must tolerate duplicates.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, context: &Value, auth: &AuthMaterial) -> anyhow::Result<()>;

    /// Errors for which retrying is pointless.
    fn is_permanent_error(&self, error: &anyhow::Error) -> bool;

    /// Called once when the task fails terminally.
    fn on_failure(&self, _context: &Value, _error: &anyhow::Error) {}

    /// User facing message shown when the task fails terminally.
    fn failure_message(&self) -> Option<&str> {
        None
    }
}

/// Task types of the chat client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    SendMessage,
    SaveUserConfig,
    UpdateSpace,
    KickUser,
    MuteUser,
    UnmuteUser,
    Reaction,
    PinMessage,
    UnpinMessage,
    EditMessage,
    DeleteMessage,
}

impl ActionType {
    pub const ALL: [ActionType; 11] = [
        ActionType::SendMessage,
        ActionType::SaveUserConfig,
        ActionType::UpdateSpace,
        ActionType::KickUser,
        ActionType::MuteUser,
        ActionType::UnmuteUser,
        ActionType::Reaction,
        ActionType::PinMessage,
        ActionType::UnpinMessage,
        ActionType::EditMessage,
        ActionType::DeleteMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendMessage => "send-message",
            ActionType::SaveUserConfig => "save-user-config",
            ActionType::UpdateSpace => "update-space",
            ActionType::KickUser => "kick-user",
            ActionType::MuteUser => "mute-user",
            ActionType::UnmuteUser => "unmute-user",
            ActionType::Reaction => "reaction",
            ActionType::PinMessage => "pin-message",
            ActionType::UnpinMessage => "unpin-message",
            ActionType::EditMessage => "edit-message",
            ActionType::DeleteMessage => "delete-message",
        }
    }

    pub fn from_task_type(task_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == task_type)
    }
}

impl AsRef<str> for ActionType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps task types to their handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous handler of the same task type.
    pub fn register(
        &mut self,
        task_type: impl AsRef<str>,
        handler: impl TaskHandler + 'static,
    ) -> &mut Self {
        self.handlers
            .insert(task_type.as_ref().to_owned(), Arc::new(handler));
        self
    }

    pub fn with(mut self, task_type: impl AsRef<str>, handler: impl TaskHandler + 'static) -> Self {
        self.register(task_type, handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
