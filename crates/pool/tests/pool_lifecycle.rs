//! Integration tests for starting and stopping pools.

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

use berth::testing::{FactoryCall, ScriptedFactory, Step};
use berth::{CommandKind, Event, Pool, PoolConfig, PoolError, PoolState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn codes(events: &mut broadcast::Receiver<Event>) -> Vec<&'static str> {
    let mut codes = Vec::new();
    while let Ok(event) = events.try_recv() {
        codes.push(event.code());
    }
    codes
}

fn count(codes: &[&str], code: &str) -> usize {
    codes.iter().filter(|c| **c == code).count()
}

fn pool(factory: &ScriptedFactory, config: PoolConfig) -> Pool<ScriptedFactory> {
    Pool::new(factory.clone(), config).expect("valid config")
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn start_provisions_min_size() {
    let factory = ScriptedFactory::new();
    let pool = pool(&factory, PoolConfig {
        min_size: 3,
        ..PoolConfig::default()
    });
    let mut events = pool.subscribe();

    pool.start().await.unwrap();

    let stats = pool.stats();
    assert_eq!((stats.idle, stats.size, stats.queued, stats.acquiring), (3, 3, 0, 0));
    assert_eq!(pool.state(), PoolState::Started);

    let codes = codes(&mut events);
    assert_eq!(codes.first(), Some(&"POOL_STARTING"));
    assert_eq!(codes.last(), Some(&"POOL_STARTED"));
    assert_eq!(count(&codes, "REQUEST_QUEUED"), 3);
    assert_eq!(count(&codes, "RESOURCE_CREATED"), 3);
    assert_eq!(count(&codes, "REQUEST_FULFILLED"), 3);
}

#[tokio::test(start_paused = true)]
async fn start_survives_provisioning_failures() {
    let factory = ScriptedFactory::new().script(CommandKind::Create, [Step::failing("Oh Noes!")]);
    let pool = pool(&factory, PoolConfig {
        min_size: 2,
        ..PoolConfig::default()
    });

    pool.start().await.unwrap();
    // The retried request may reuse the other request's resource; the
    // shortfall is replenished once started.
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(pool.stats().idle, 2);
    assert_eq!(factory.calls(CommandKind::Create), 3);
}

#[tokio::test(start_paused = true)]
async fn start_times_out_and_can_be_retried() {
    let factory = ScriptedFactory::new().script(
        CommandKind::Create,
        [Step::delayed(Duration::from_secs(5))],
    );
    let pool = pool(&factory, PoolConfig {
        min_size: 1,
        start_timeout: Duration::from_secs(1),
        ..PoolConfig::default()
    });

    let mut events = pool.subscribe();

    let err = pool.start().await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::OperationTimedOut {
            operation: "start",
            timeout_ms: 1000
        }
    ));
    assert_eq!(pool.state(), PoolState::NotStarted);
    let stats = pool.stats();
    assert_eq!((stats.timedout, stats.size), (1, 0));

    let mut aborted = 0;
    while let Ok(event) = events.try_recv() {
        if let Event::RequestAborted { reason, .. } = event {
            assert!(matches!(
                reason,
                PoolError::OperationAborted {
                    operation: "initialise"
                }
            ));
            aborted += 1;
        }
    }
    assert_eq!(aborted, 1);

    // The abandoned slot doesn't hold up the retry.
    pool.start().await.unwrap();
    assert_eq!(factory.calls(CommandKind::Create), 2);
    tokio::time::sleep(Duration::from_secs(5)).await;
    let stats = pool.stats();
    assert_eq!((stats.idle, stats.timedout), (1, 0));
    assert!(
        factory
            .call_history()
            .contains(&FactoryCall::Destroy("R1".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn start_timeout_skips_creates_still_waiting_their_turn() {
    let slow = Step::delayed(Duration::from_millis(500));
    let factory = ScriptedFactory::new().script(CommandKind::Create, [slow.clone(), slow]);
    let pool = pool(&factory, PoolConfig {
        min_size: 2,
        start_timeout: Duration::from_millis(300),
        ..PoolConfig::default()
    });
    let mut events = pool.subscribe();

    assert!(pool.start().await.is_err());
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(factory.calls(CommandKind::Create), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(factory.calls(CommandKind::Create), 1);
    assert_eq!(
        factory.call_history(),
        vec![
            FactoryCall::Create("R1".to_string()),
            FactoryCall::Destroy("R1".to_string()),
        ]
    );
    let codes = codes(&mut events);
    assert_eq!(count(&codes, "RESOURCE_SEGREGATED"), 2);
    assert_eq!(count(&codes, "RESOURCE_CREATION_ERROR"), 0);
    assert_eq!(count(&codes, "RESOURCE_DESTROYED"), 1);
    let stats = pool.stats();
    assert_eq!((stats.size, stats.timedout), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn concurrent_starts_share_one_outcome() {
    let factory = ScriptedFactory::new();
    let pool = pool(&factory, PoolConfig {
        min_size: 2,
        ..PoolConfig::default()
    });

    let (first, second) = tokio::join!(pool.start(), pool.start());
    first.unwrap();
    second.unwrap();
    assert_eq!(factory.calls(CommandKind::Create), 2);
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stop_destroys_every_idle_resource() {
    let factory = ScriptedFactory::new();
    let pool = pool(&factory, PoolConfig {
        min_size: 3,
        ..PoolConfig::default()
    });
    pool.start().await.unwrap();
    let mut events = pool.subscribe();

    pool.stop().await.unwrap();

    let stats = pool.stats();
    assert_eq!((stats.idle, stats.size), (0, 0));
    assert_eq!(
        codes(&mut events),
        vec![
            "POOL_STOPPING",
            "RESOURCE_DESTROYED",
            "RESOURCE_DESTROYED",
            "RESOURCE_DESTROYED",
            "POOL_STOPPED",
        ]
    );
    assert_eq!(factory.calls(CommandKind::Destroy), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_leases_to_come_back() {
    let factory = ScriptedFactory::new();
    let pool = pool(&factory, PoolConfig::default());
    let lease = pool.acquire().await.unwrap();

    let stopping = tokio::spawn({
        let pool = pool.clone();
        async move { pool.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!stopping.is_finished());
    assert_eq!(pool.state(), PoolState::Stopping);

    drop(lease);
    stopping.await.unwrap().unwrap();
    assert_eq!(pool.state(), PoolState::Stopped);
    assert!(
        factory
            .call_history()
            .contains(&FactoryCall::Destroy("R1".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn stop_gives_up_after_stop_timeout() {
    let factory = ScriptedFactory::new().script(
        CommandKind::Destroy,
        [Step::delayed(Duration::from_secs(60))],
    );
    let pool = pool(&factory, PoolConfig {
        min_size: 1,
        stop_timeout: Duration::from_secs(1),
        destroy_timeout: Duration::from_secs(120),
        ..PoolConfig::default()
    });
    pool.start().await.unwrap();

    let err = pool.stop().await.unwrap_err();
    assert!(matches!(
        err,
        PoolError::OperationTimedOut {
            operation: "stop",
            ..
        }
    ));
    assert_eq!(pool.state(), PoolState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let factory = ScriptedFactory::new();
    let pool = pool(&factory, PoolConfig {
        min_size: 1,
        ..PoolConfig::default()
    });
    pool.start().await.unwrap();

    let (first, second) = tokio::join!(pool.stop(), pool.stop());
    first.unwrap();
    second.unwrap();
    pool.stop().await.unwrap();
    assert_eq!(factory.calls(CommandKind::Destroy), 1);
}

#[tokio::test(start_paused = true)]
async fn stopped_pools_refuse_work() {
    let factory = ScriptedFactory::new();
    let pool = pool(&factory, PoolConfig::default());
    pool.start().await.unwrap();
    pool.stop().await.unwrap();

    assert!(matches!(
        pool.acquire().await,
        Err(PoolError::PoolNotRunning { state: "stopped" })
    ));
    assert!(matches!(
        pool.start().await,
        Err(PoolError::PoolNotRunning { .. })
    ));
}
