// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

/// Exponential backoff with a hard ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// `min(base_delay * 2^retry_count, max_delay)`
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn doubles_until_ceiling() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..=10).map(|n| policy.backoff(n)).collect();

        assert_eq!(delays[0], Duration::from_millis(2000));
        assert_eq!(delays[1], Duration::from_millis(4000));
        assert_eq!(delays[7], Duration::from_millis(256_000));

        let ceiling = Duration::from_secs(300);
        for pair in delays.windows(2) {
            if pair[0] < ceiling {
                assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
            } else {
                assert_eq!(pair[1], ceiling);
            }
        }
        assert_eq!(delays[10], ceiling);
    }

    #[test]
    fn saturates_on_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(31), Duration::from_secs(300));
        assert_eq!(policy.backoff(64), Duration::from_secs(300));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(300));
    }
}
