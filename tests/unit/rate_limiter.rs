//! Rate limiter timing under paused time

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use template_collector::collector::{AcquireError, RateLimiter};
use template_collector::shutdown::ShutdownCoordinator;
use template_collector::template::RateLimitSpec;

fn spec(requests: u32, window_ms: u64, burst: u32) -> RateLimitSpec {
    RateLimitSpec {
        requests,
        window: Duration::from_millis(window_ms),
        burst,
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_never_exceed_rate() {
    let limiter = Arc::new(RateLimiter::new(None));
    let shutdown = ShutdownCoordinator::shared();
    limiter.register("binance", &spec(4, 1000, 1));

    let start = Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..6 {
        let limiter = limiter.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            limiter.acquire("binance", &shutdown).await.unwrap();
            Instant::now()
        }));
    }

    let mut granted = Vec::new();
    for task in tasks {
        granted.push(task.await.unwrap());
    }
    granted.sort();

    for pair in granted.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }
    assert!(granted[5] - start >= Duration::from_millis(1250));
}

#[tokio::test(start_paused = true)]
async fn test_sustained_rate_after_burst() {
    let limiter = RateLimiter::new(None);
    let shutdown = ShutdownCoordinator::new();
    limiter.register("kraken", &spec(5, 1000, 5));

    let start = Instant::now();
    for _ in 0..5 {
        limiter.acquire("kraken", &shutdown).await.unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(5));

    for _ in 0..15 {
        limiter.acquire("kraken", &shutdown).await.unwrap();
    }
    // Fifteen tokens beyond the burst at 200ms each
    assert!(start.elapsed() >= Duration::from_millis(3000));
    assert!(start.elapsed() < Duration::from_millis(3300));
}

#[tokio::test(start_paused = true)]
async fn test_idle_bucket_refills() {
    let limiter = RateLimiter::new(None);
    let shutdown = ShutdownCoordinator::new();
    limiter.register("okx", &spec(2, 1000, 2));

    limiter.acquire("okx", &shutdown).await.unwrap();
    limiter.acquire("okx", &shutdown).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    // A long idle period refills at most the burst
    let start = Instant::now();
    limiter.acquire("okx", &shutdown).await.unwrap();
    limiter.acquire("okx", &shutdown).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(5));
    let third = limiter.acquire("okx", &shutdown).await.unwrap();
    assert!(third.waited() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_global_cap_spans_exchanges() {
    let limiter = Arc::new(RateLimiter::new(Some(1)));
    let shutdown = ShutdownCoordinator::shared();
    limiter.register("A", &spec(100, 1000, 10));
    limiter.register("B", &spec(100, 1000, 10));

    let held = limiter.acquire("A", &shutdown).await.unwrap();
    let waiter = {
        let limiter = limiter.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { limiter.acquire("B", &shutdown).await.map(|p| p.waited()) })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!waiter.is_finished());
    drop(held);

    let waited = waiter.await.unwrap().unwrap();
    assert!(waited >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait_keeps_token() {
    let limiter = Arc::new(RateLimiter::new(None));
    let shutdown = ShutdownCoordinator::shared();
    limiter.register("X", &spec(1, 10_000, 1));

    limiter.acquire("X", &shutdown).await.unwrap();
    let pending = {
        let limiter = limiter.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { limiter.acquire("X", &shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.request_shutdown();

    assert_eq!(pending.await.unwrap().unwrap_err(), AcquireError::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_slot_wait_leaves_token() {
    let limiter = Arc::new(RateLimiter::new(Some(1)));
    limiter.register("A", &spec(1, 10_000, 1));
    limiter.register("B", &spec(100, 1000, 10));

    let other = ShutdownCoordinator::new();
    let held = limiter.acquire("B", &other).await.unwrap();

    // A's token is free but the only global slot is taken
    let cancelled = ShutdownCoordinator::shared();
    let pending = {
        let limiter = limiter.clone();
        let cancelled = cancelled.clone();
        tokio::spawn(async move { limiter.acquire("A", &cancelled).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancelled.request_shutdown();
    assert_eq!(pending.await.unwrap().unwrap_err(), AcquireError::Cancelled);
    drop(held);

    let start = Instant::now();
    let permit = limiter.acquire("A", &other).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(5));
    assert!(permit.waited() < Duration::from_millis(5));
}
