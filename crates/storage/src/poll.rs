//! Bounded polling for provider-side pending operations
//!
//! Yandex Disk reports some mutations (move, copy, delete of large trees)
//! as accepted-but-not-complete, handing back an operation href to poll.
//! The loop here has a hard attempt ceiling; exhausting it is a
//! `Timeout`, never a silent success.

use std::future::Future;
use std::time::Duration;

use crate::error::{RemoteError, RemoteResult};

/// Provider-issued handle for an asynchronous mutation.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    /// Status URL to poll, as returned by the provider.
    pub href: String,
}

/// One observation of a pending operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    InProgress,
    Success,
    Failed(String),
}

/// Fixed-delay retry policy with a hard attempt ceiling.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

impl PollPolicy {
    /// Drive `probe` until it reports success, failure, or the attempt
    /// ceiling is reached.
    pub async fn run<F, Fut>(&self, mut probe: F) -> RemoteResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<PollStatus>>,
    {
        for attempt in 1..=self.max_attempts {
            match probe().await? {
                PollStatus::Success => return Ok(()),
                PollStatus::Failed(reason) => {
                    return Err(RemoteError::Transient(format!(
                        "operation reported failure: {reason}"
                    )));
                }
                PollStatus::InProgress => {
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }
        Err(RemoteError::Timeout {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            max_attempts,
            interval: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn resolves_once_operation_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = instant_policy(10);

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Ok(if n < 3 {
                        PollStatus::InProgress
                    } else {
                        PollStatus::Success
                    })
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_hangs_past_the_ceiling() {
        let calls = AtomicU32::new(0);
        let policy = instant_policy(4);

        let result = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(PollStatus::InProgress) }
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Timeout { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn provider_reported_failure_is_not_a_timeout() {
        let policy = instant_policy(10);
        let result = policy
            .run(|| async { Ok(PollStatus::Failed("disk error".to_string())) })
            .await;

        assert!(matches!(result, Err(RemoteError::Transient(_))));
    }
}
