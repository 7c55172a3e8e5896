// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use tokio::sync::{broadcast, watch};

use crate::task::TaskId;

/// Notifications emitted by the queue outside of return values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A handler reported an authentication failure. The user has to log in again.
    SessionExpired,
    /// A task failed terminally and its handler has a user facing failure message.
    TaskFailed {
        task_id: TaskId,
        task_type: String,
        message: String,
    },
}

const EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub(crate) struct QueueNotifier {
    events_tx: broadcast::Sender<QueueEvent>,
    revision_tx: watch::Sender<u64>,
}

impl Default for QueueNotifier {
    fn default() -> Self {
        let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);
        let (revision_tx, _) = watch::channel(0);
        Self {
            events_tx,
            revision_tx,
        }
    }
}

impl QueueNotifier {
    pub(crate) fn emit(&self, event: QueueEvent) {
        // no receivers is fine
        let _ = self.events_tx.send(event);
    }

    /// Bumps the queue revision.
    ///
    /// Subscribers only observe the latest revision, so a burst of updates wakes them once.
    pub(crate) fn updated(&self) {
        self.revision_tx.send_modify(|revision| *revision += 1);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }
}
