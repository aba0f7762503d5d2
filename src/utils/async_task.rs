use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Exponential backoff delay for the given zero-based attempt, capped at
/// `max_delay_ms`, with up to 10% random jitter to spread retry storms.
pub(crate) fn backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
) -> Duration {
    let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(32));
    let capped = exp.min(max_delay_ms).max(1);
    let jitter = rand::thread_rng().gen_range(0..=capped / 10);
    Duration::from_millis(capped + jitter)
}

/// General one: runs `task` until it succeeds, retrying with exponential
/// backoff between attempts and a per-attempt timeout. Returns the last
/// error once `max_retries` attempts are exhausted (0 means a single try).
pub(crate) async fn retry_with_backoff<F, T, P>(
    task: F,
    policy: &BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<P>>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_err = Error::Fatal("Task failed after max retries".to_string());

    for attempt in 0..attempts {
        match timeout(Duration::from_millis(policy.timeout_ms), task()).await {
            Ok(Ok(r)) => {
                return Ok(r);
            }
            Ok(Err(error)) => {
                warn!("attempt {} failed with error: {:?}", attempt, &error);
                last_err = error;
            }
            Err(elapsed) => {
                warn!("attempt {} timed out: {:?}", attempt, &elapsed);
                last_err = Error::Fatal(format!(
                    "Task timed out after {}ms",
                    policy.timeout_ms
                ));
            }
        }

        if attempt + 1 < attempts {
            sleep(backoff_delay(
                attempt as u32,
                policy.base_delay_ms,
                policy.max_delay_ms,
            ))
            .await;
        }
    }

    Err(last_err)
}

// Helper function to spawn tasks and track their JoinHandles
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<tokio::task::JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    // Clone the name so it can be safely moved into the async block
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
