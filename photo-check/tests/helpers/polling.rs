// Polling assertions for daemon tests
//
// Prompt timers and socket start-up are asynchronous; these helpers retry a
// condition until it holds instead of sleeping for a guessed duration.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry `f` every `interval` until it returns `Ok`, panicking after `timeout`.
///
/// The last error is included in the panic message.
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }

                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Boolean variant of [`assert_eventually`].
pub async fn assert_eventually_bool<F, Fut>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        if f().await {
            return;
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            panic!(
                "Timeout waiting for {}\n\
                 Duration: {:?}\n\
                 Attempts: {}\n\
                 Condition never became true",
                desc, elapsed, attempt
            );
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_value_once_condition_holds() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = assert_eventually(
            "counter to reach 3",
            Duration::from_secs(2),
            Duration::from_millis(10),
            move || {
                let c = Arc::clone(&counter_clone);
                async move {
                    let val = c.fetch_add(1, Ordering::SeqCst);
                    if val >= 2 {
                        Ok(val)
                    } else {
                        Err(format!("counter only at {}", val))
                    }
                }
            },
        )
        .await;

        assert!(result >= 2);
    }

    #[tokio::test]
    #[should_panic(expected = "Timeout waiting for slot timer")]
    async fn panics_with_description_after_timeout() {
        assert_eventually(
            "slot timer",
            Duration::from_millis(100),
            Duration::from_millis(20),
            || async { Err::<(), _>("not fired") },
        )
        .await;
    }

    #[tokio::test]
    async fn bool_variant_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        assert_eventually_bool(
            "counter reaches 2",
            Duration::from_secs(2),
            Duration::from_millis(10),
            move || {
                let c = Arc::clone(&counter_clone);
                async move { c.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
        )
        .await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    #[should_panic(expected = "Condition never became true")]
    async fn bool_variant_times_out() {
        assert_eventually_bool(
            "never true",
            Duration::from_millis(100),
            Duration::from_millis(20),
            || async { false },
        )
        .await;
    }
}
