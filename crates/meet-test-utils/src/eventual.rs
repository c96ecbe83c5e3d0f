//! Polling assertions for actor state that converges asynchronously.

use std::future::Future;
use std::time::Duration;

/// Default bound for [`assert_eventually`].
pub const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `check` until it returns true; panic after [`EVENTUALLY_TIMEOUT`].
pub async fn assert_eventually<F, Fut>(description: &str, check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert_eventually_within(EVENTUALLY_TIMEOUT, description, check).await;
}

/// Poll `check` until it returns true; panic after `timeout`.
pub async fn assert_eventually_within<F, Fut>(timeout: Duration, description: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}: {description}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Let spawned tasks run for a moment; used before asserting that
/// something did NOT happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
