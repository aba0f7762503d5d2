use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::utils::backoff_delay;
use crate::utils::retry_with_backoff;
use crate::BackoffPolicy;
use crate::Error;

fn quick_policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 100,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

#[test]
fn test_backoff_delay_is_capped() {
    for attempt in 0..40 {
        let d = backoff_delay(attempt, 50, 1000);
        // cap plus 10% jitter headroom
        assert!(d <= Duration::from_millis(1100));
        assert!(d >= Duration::from_millis(1));
    }
}

#[test]
fn test_backoff_delay_grows() {
    // Without jitter the sequence doubles; jitter is at most 10%, so the
    // fourth attempt must exceed the first.
    let first = backoff_delay(0, 100, 60_000);
    let fourth = backoff_delay(3, 100, 60_000);
    assert!(fourth > first);
}

#[tokio::test]
async fn test_retry_succeeds_first_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let result = retry_with_backoff(
        move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(42u64)
            }
        },
        &quick_policy(3),
    )
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_recovers_after_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let result = retry_with_backoff(
        move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Fatal("transient".to_string()))
                } else {
                    Ok("ok")
                }
            }
        },
        &quick_policy(5),
    )
    .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_exhausts_and_returns_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();

    let result: crate::Result<()> = retry_with_backoff(
        move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Fatal("always down".to_string()))
            }
        },
        &quick_policy(3),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
