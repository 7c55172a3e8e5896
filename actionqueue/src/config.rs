// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Tuning of the action queue.
///
/// All durations are given in milliseconds when deserialized.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of transient failures after which a task is failed permanently
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, doubled with each further attempt
    #[serde(with = "duration_millis", default = "default_base_retry_delay")]
    pub base_retry_delay: Duration,
    /// Upper bound of the retry delay
    #[serde(with = "duration_millis", default = "default_max_retry_delay")]
    pub max_retry_delay: Duration,
    /// Period of the processing timer
    #[serde(with = "duration_millis", default = "default_process_interval")]
    pub process_interval: Duration,
    /// Maximum number of tasks processed in one pass
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Time during which a task claimed by one writer is left alone by all other writers
    #[serde(with = "duration_millis", default = "default_multi_writer_grace")]
    pub multi_writer_grace: Duration,
    /// Number of stored tasks at which enqueueing starts pruning
    ///
    /// New tasks are rejected when the number of pending tasks reaches half of this value.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u64,
    /// Age after which terminal tasks are pruned
    #[serde(with = "duration_millis", default = "default_max_task_age")]
    pub max_task_age: Duration,
    /// Reject contexts containing secret-shaped fields
    #[serde(default = "default_reject_secret_fields")]
    pub reject_secret_fields: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_retry_delay: default_base_retry_delay(),
            max_retry_delay: default_max_retry_delay(),
            process_interval: default_process_interval(),
            batch_size: default_batch_size(),
            multi_writer_grace: default_multi_writer_grace(),
            max_queue_size: default_max_queue_size(),
            max_task_age: default_max_task_age(),
            reject_secret_fields: default_reject_secret_fields(),
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_retry_delay, self.max_retry_delay)
    }

    /// Number of pending tasks at which enqueueing is rejected.
    pub(crate) fn full_threshold(&self) -> u64 {
        self.max_queue_size / 2
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay() -> Duration {
    Duration::from_millis(2000)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_process_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_batch_size() -> u32 {
    10
}

fn default_multi_writer_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_max_queue_size() -> u64 {
    1000
}

fn default_max_task_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_reject_secret_fields() -> bool {
    true
}

mod duration_millis {
    use serde::de;

    use std::time::Duration;

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let millis: u64 = serde::Deserialize::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_from_empty_input() {
        let config: QueueConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.full_threshold(), 500);
    }

    #[test]
    fn durations_in_millis() {
        let config: QueueConfig = serde_json::from_value(json!({
            "base_retry_delay": 100,
            "multi_writer_grace": 5000,
            "batch_size": 2,
        }))
        .unwrap();
        assert_eq!(config.base_retry_delay, Duration::from_millis(100));
        assert_eq!(config.multi_writer_grace, Duration::from_secs(5));
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.max_retries, 3);
    }
}
