use std::time::Duration;

use template_collector::shutdown::{self, ShutdownCoordinator};

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// A waiter arriving after the request returns immediately
#[tokio::test]
async fn shutdown_requested_before_wait_does_not_block() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() blocked although shutdown was already requested");
}

/// Every concurrent waiter is released by one request
#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "a waiter was not notified");
    }
    assert!(shutdown.is_shutdown_requested());
}

#[test]
fn global_shutdown_handle_is_shared() {
    let coordinator = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(coordinator.clone());

    // First registration wins; later calls keep the original handle
    shutdown::set_global_shutdown(ShutdownCoordinator::shared());
    let global = shutdown::get_global_shutdown().unwrap();
    global.request_shutdown();
    assert!(coordinator.is_shutdown_requested());
}
