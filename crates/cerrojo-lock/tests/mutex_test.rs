//! Distributed mutex behavior tests
//!
//! Every contender gets its own session on a shared `MemoryCoordinator`,
//! the way separate processes would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use cerrojo_common::RetryPolicy;
use cerrojo_lock::{DistributedMutex, LockError, MutexOptions};
use cerrojo_store::{
    CoordinationStore, MemoryCoordinator, MemorySession, StoreClientConfig, StoreError,
};
use parking_lot::Mutex;
use tokio::time::Instant;

const LOCK_PATH: &str = "/lock";

fn session(coordinator: &MemoryCoordinator) -> Arc<MemorySession> {
    Arc::new(coordinator.connect(StoreClientConfig::default()))
}

fn mutex_on(store: Arc<MemorySession>, options: MutexOptions) -> DistributedMutex {
    let store: Arc<dyn CoordinationStore> = store;
    DistributedMutex::new(store, options).unwrap()
}

fn contender(coordinator: &MemoryCoordinator) -> (Arc<MemorySession>, DistributedMutex) {
    let store = session(coordinator);
    let mutex = mutex_on(store.clone(), MutexOptions::new(LOCK_PATH));
    (store, mutex)
}

async fn wait_for_children(coordinator: &MemoryCoordinator, count: usize) {
    for _ in 0..400 {
        if coordinator.children_of(LOCK_PATH).len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} contenders, found {:?}",
        count,
        coordinator.children_of(LOCK_PATH)
    );
}

// ============== Exclusion Tests ==============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion() {
    let coordinator = MemoryCoordinator::new();
    let in_critical = Arc::new(AtomicBool::new(false));
    let entries = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    for _ in 0..8 {
        let (_store, mutex) = contender(&coordinator);
        let in_critical = in_critical.clone();
        let entries = entries.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                mutex.acquire(Duration::from_secs(10)).await.unwrap();
                assert!(!in_critical.swap(true, Ordering::SeqCst));
                entries.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_critical.store(false, Ordering::SeqCst);
                mutex.release().await.unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 40);
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test]
async fn test_waiters_acquire_in_sequence_order() {
    let coordinator = MemoryCoordinator::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    let (_a_store, a) = contender(&coordinator);
    a.acquire(Duration::from_secs(1)).await.unwrap();

    let mut handles = Vec::new();
    for (index, name) in ["b", "c", "d"].into_iter().enumerate() {
        let (_store, mutex) = contender(&coordinator);
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            mutex.acquire(Duration::from_secs(10)).await.unwrap();
            order.lock().push(name);
            tokio::time::sleep(Duration::from_millis(5)).await;
            mutex.release().await.unwrap();
        }));
        wait_for_children(&coordinator, index + 2).await;
    }

    a.release().await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock(), vec!["b", "c", "d"]);
}

#[tokio::test]
async fn test_waiter_watches_only_its_predecessor() {
    let coordinator = MemoryCoordinator::new();
    let (_a_store, a) = contender(&coordinator);
    a.acquire(Duration::from_secs(1)).await.unwrap();
    let holder = a.current_node().unwrap();

    let mut handles = Vec::new();
    for count in 2..=4 {
        let (_store, mutex) = contender(&coordinator);
        handles.push(tokio::spawn(async move {
            mutex.acquire(Duration::from_secs(10)).await.unwrap();
            mutex.release().await.unwrap();
        }));
        wait_for_children(&coordinator, count).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // One watcher per node ahead, none on the last contender
    assert_eq!(coordinator.watch_count(&holder), 1);
    let children = coordinator.children_of(LOCK_PATH);
    for child in &children[1..3] {
        assert_eq!(coordinator.watch_count(&format!("{}/{}", LOCK_PATH, child)), 1);
    }
    assert_eq!(
        coordinator.watch_count(&format!("{}/{}", LOCK_PATH, children[3])),
        0
    );

    a.release().await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

// ============== Re-entrancy Tests ==============

#[tokio::test]
async fn test_reentrant_acquire_uses_single_node() {
    let coordinator = MemoryCoordinator::new();
    let (_store, mutex) = contender(&coordinator);

    mutex.acquire(Duration::from_secs(1)).await.unwrap();
    let node = mutex.current_node().unwrap();
    mutex.acquire(Duration::from_secs(1)).await.unwrap();

    assert_eq!(mutex.hold_count(), 2);
    assert_eq!(coordinator.children_of(LOCK_PATH).len(), 1);
    assert_eq!(mutex.current_node(), Some(node.clone()));

    mutex.release().await.unwrap();
    assert!(mutex.is_acquired());
    assert!(coordinator.exists(&node));

    mutex.release().await.unwrap();
    assert!(!mutex.is_acquired());
    assert!(mutex.current_node().is_none());
    assert!(mutex.held_since().is_none());
    assert!(!coordinator.exists(&node));
}

#[tokio::test]
async fn test_concurrent_acquires_on_one_instance_share_node() {
    let coordinator = MemoryCoordinator::new();
    let (_store, mutex) = contender(&coordinator);
    let mutex = Arc::new(mutex);

    let first = {
        let mutex = mutex.clone();
        tokio::spawn(async move { mutex.try_acquire(Duration::from_secs(1)).await })
    };
    let second = {
        let mutex = mutex.clone();
        tokio::spawn(async move { mutex.try_acquire(Duration::from_secs(1)).await })
    };

    assert!(first.await.unwrap().unwrap());
    assert!(second.await.unwrap().unwrap());
    assert_eq!(mutex.hold_count(), 2);
    assert_eq!(coordinator.children_of(LOCK_PATH).len(), 1);

    mutex.release().await.unwrap();
    mutex.release().await.unwrap();
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test]
async fn test_release_without_hold_is_illegal() {
    let coordinator = MemoryCoordinator::new();
    let (_store, mutex) = contender(&coordinator);

    let err = mutex.release().await.unwrap_err();
    assert!(matches!(err, LockError::IllegalState(_)));

    mutex.acquire(Duration::from_secs(1)).await.unwrap();
    mutex.release().await.unwrap();
    let err = mutex.release().await.unwrap_err();
    assert!(matches!(err, LockError::IllegalState(_)));
}

// ============== Timeout Tests ==============

#[tokio::test(start_paused = true)]
async fn test_timeout_leaves_no_residual_node() {
    let coordinator = MemoryCoordinator::new();
    let (_a_store, a) = contender(&coordinator);
    let (_b_store, b) = contender(&coordinator);

    a.acquire(Duration::from_secs(1)).await.unwrap();
    let holder = a.current_node().unwrap();

    let started = Instant::now();
    assert!(!b.try_acquire(Duration::from_millis(200)).await.unwrap());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!b.is_acquired());

    let children = coordinator.children_of(LOCK_PATH);
    assert_eq!(children.len(), 1);
    assert!(holder.ends_with(&children[0]));
    assert_eq!(coordinator.watch_count(&holder), 0);

    let err = b.acquire(Duration::from_millis(100)).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(coordinator.children_of(LOCK_PATH).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_on_free_lock() {
    let coordinator = MemoryCoordinator::new();
    let (_store, mutex) = contender(&coordinator);

    assert!(mutex.try_acquire(Duration::ZERO).await.unwrap());
    mutex.release().await.unwrap();
}

#[tokio::test]
async fn test_round_trip_leaves_lock_path_empty() {
    let coordinator = MemoryCoordinator::new();
    let (_store, mutex) = contender(&coordinator);

    for _ in 0..3 {
        mutex.acquire_default().await.unwrap();
        mutex.release().await.unwrap();
    }

    assert!(coordinator.exists(LOCK_PATH));
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_during_outage_returns_on_deadline() {
    let coordinator = MemoryCoordinator::new();
    let (_a_store, a) = contender(&coordinator);
    let b_store = session(&coordinator);
    let b = mutex_on(
        b_store.clone(),
        MutexOptions::new(LOCK_PATH)
            .with_retry_policy(RetryPolicy::new(Duration::from_millis(100), 3))
            .guaranteed(),
    );

    a.acquire(Duration::from_secs(1)).await.unwrap();

    let suspender = coordinator.clone();
    let b_id = b_store.session_id().to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        suspender.suspend_session(&b_id);
    });

    let started = Instant::now();
    assert!(!b.try_acquire(Duration::from_millis(200)).await.unwrap());
    assert!(started.elapsed() < Duration::from_millis(250));

    // Removal continues in the background once the connection is back
    assert_eq!(coordinator.children_of(LOCK_PATH).len(), 2);
    coordinator.reconnect_session(b_store.session_id());
    wait_for_children(&coordinator, 1).await;

    a.release().await.unwrap();
    assert!(b.try_acquire(Duration::from_millis(200)).await.unwrap());
    b.release().await.unwrap();
}

// ============== Cancellation Tests ==============

#[tokio::test]
async fn test_cancelled_acquire_frees_lock_for_others() {
    let coordinator = MemoryCoordinator::new();
    let (_a_store, a) = contender(&coordinator);
    let (_b_store, b) = contender(&coordinator);
    let (_c_store, c) = contender(&coordinator);

    a.acquire(Duration::from_secs(1)).await.unwrap();

    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), b.acquire(Duration::from_secs(10))).await;
    assert!(cancelled.is_err());
    assert!(!b.is_acquired());
    wait_for_children(&coordinator, 1).await;

    a.release().await.unwrap();
    assert!(c.try_acquire(Duration::from_millis(200)).await.unwrap());
    c.release().await.unwrap();

    // The cancelled instance is still usable
    b.acquire(Duration::from_secs(1)).await.unwrap();
    assert_eq!(coordinator.children_of(LOCK_PATH).len(), 1);
    b.release().await.unwrap();
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test]
async fn test_aborted_waiter_task_leaves_no_node() {
    let coordinator = MemoryCoordinator::new();
    let (_a_store, a) = contender(&coordinator);
    let (_b_store, b) = contender(&coordinator);

    a.acquire(Duration::from_secs(1)).await.unwrap();
    let waiter = tokio::spawn(async move { b.acquire(Duration::from_secs(30)).await });
    wait_for_children(&coordinator, 2).await;

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    wait_for_children(&coordinator, 1).await;

    assert!(a.is_acquired());
    a.release().await.unwrap();
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

// ============== Session Tests ==============

#[tokio::test]
async fn test_holder_session_loss_hands_lock_over() {
    let coordinator = MemoryCoordinator::new();
    let (a_store, a) = contender(&coordinator);
    let (_b_store, b) = contender(&coordinator);

    a.acquire(Duration::from_secs(1)).await.unwrap();
    let waiter = tokio::spawn(async move {
        let acquired = b.acquire(Duration::from_secs(10)).await;
        acquired.map(|_| b)
    });
    wait_for_children(&coordinator, 2).await;

    coordinator.expire_session(a_store.session_id());

    let b = waiter.await.unwrap().unwrap();
    assert!(b.is_acquired());
    assert_eq!(coordinator.children_of(LOCK_PATH).len(), 1);

    // The expired holder's release is tolerated
    a.release().await.unwrap();
    b.release().await.unwrap();
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test]
async fn test_waiter_session_loss_aborts_acquire() {
    let coordinator = MemoryCoordinator::new();
    let (_a_store, a) = contender(&coordinator);
    let (b_store, b) = contender(&coordinator);

    a.acquire(Duration::from_secs(1)).await.unwrap();
    let waiter = tokio::spawn(async move { b.acquire(Duration::from_secs(10)).await });
    wait_for_children(&coordinator, 2).await;

    coordinator.expire_session(b_store.session_id());

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, LockError::SessionLost { .. }), "{:?}", err);
    assert_eq!(coordinator.children_of(LOCK_PATH).len(), 1);
    assert!(a.is_acquired());
    a.release().await.unwrap();
}

#[tokio::test]
async fn test_acquire_on_expired_session() {
    let coordinator = MemoryCoordinator::new();
    let (store, mutex) = contender(&coordinator);
    coordinator.expire_session(store.session_id());

    let err = mutex.acquire(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, LockError::SessionExpired(_)));
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_waiter_survives_suspension() {
    let coordinator = MemoryCoordinator::new();
    let (_a_store, a) = contender(&coordinator);
    let b_store = session(&coordinator);
    let b = mutex_on(
        b_store.clone(),
        MutexOptions::new(LOCK_PATH)
            .with_retry_policy(RetryPolicy::new(Duration::from_millis(20), 10)),
    );

    a.acquire(Duration::from_secs(1)).await.unwrap();
    let waiter = tokio::spawn(async move {
        let acquired = b.acquire(Duration::from_secs(30)).await;
        acquired.map(|_| b)
    });
    wait_for_children(&coordinator, 2).await;

    coordinator.suspend_session(b_store.session_id());
    a.release().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.reconnect_session(b_store.session_id());

    let b = waiter.await.unwrap().unwrap();
    assert!(b.is_acquired());
    b.release().await.unwrap();
}

// ============== Connection Failure Tests ==============

#[tokio::test(start_paused = true)]
async fn test_transient_failures_within_budget() {
    let coordinator = MemoryCoordinator::new();
    let store = session(&coordinator);
    let mutex = mutex_on(
        store.clone(),
        MutexOptions::new(LOCK_PATH)
            .with_retry_policy(RetryPolicy::new(Duration::from_millis(10), 3)),
    );

    coordinator.inject_connection_failures(store.session_id(), 2);
    mutex.acquire(Duration::from_secs(5)).await.unwrap();
    assert!(mutex.is_acquired());
    mutex.release().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_as_timeout() {
    let coordinator = MemoryCoordinator::new();
    let store = session(&coordinator);
    let mutex = mutex_on(
        store.clone(),
        MutexOptions::new(LOCK_PATH)
            .with_retry_policy(RetryPolicy::new(Duration::from_millis(10), 2)),
    );

    coordinator.inject_connection_failures(store.session_id(), 10);
    let err = mutex.acquire(Duration::from_secs(5)).await.unwrap_err();
    assert!(err.is_timeout(), "{:?}", err);
    assert!(!mutex.is_acquired());
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

// ============== Release Tests ==============

#[tokio::test]
async fn test_guaranteed_release_tolerates_missing_node() {
    let coordinator = MemoryCoordinator::new();
    let store = session(&coordinator);
    let mutex = mutex_on(store.clone(), MutexOptions::new(LOCK_PATH).guaranteed());

    mutex.acquire(Duration::from_secs(1)).await.unwrap();
    let node = mutex.current_node().unwrap();
    store.delete(&node).await.unwrap();

    mutex.release().await.unwrap();
    assert!(!mutex.is_acquired());
}

#[tokio::test(start_paused = true)]
async fn test_guaranteed_release_retries_through_failures() {
    let coordinator = MemoryCoordinator::new();
    let store = session(&coordinator);
    let mutex = mutex_on(
        store.clone(),
        MutexOptions::new(LOCK_PATH)
            .with_retry_policy(RetryPolicy::new(Duration::from_millis(10), 1))
            .guaranteed(),
    );

    mutex.acquire(Duration::from_secs(1)).await.unwrap();
    coordinator.inject_connection_failures(store.session_id(), 5);

    mutex.release().await.unwrap();
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_release_gives_up_after_budget() {
    let coordinator = MemoryCoordinator::new();
    let store = session(&coordinator);
    let mutex = mutex_on(
        store.clone(),
        MutexOptions::new(LOCK_PATH)
            .with_retry_policy(RetryPolicy::new(Duration::from_millis(10), 1)),
    );

    mutex.acquire(Duration::from_secs(1)).await.unwrap();
    let node = mutex.current_node().unwrap();
    coordinator.inject_connection_failures(store.session_id(), 5);

    let err = mutex.release().await.unwrap_err();
    assert!(matches!(err, LockError::ConnectionLoss { attempts: 2, .. }), "{:?}", err);
    assert!(!mutex.is_acquired());
    assert!(coordinator.exists(&node));

    let other = session(&coordinator);
    let guaranteed = mutex_on(other.clone(), MutexOptions::new("/other").guaranteed());
    guaranteed.acquire(Duration::from_secs(1)).await.unwrap();
    coordinator.suspend_session(other.session_id());

    let err = guaranteed.release().await.unwrap_err();
    assert!(matches!(err, LockError::ReleaseFailed { attempts: 11, .. }), "{:?}", err);
}

// ============== Helper Tests ==============

#[tokio::test]
async fn test_with_lock_releases_afterwards() {
    let coordinator = MemoryCoordinator::new();
    let (_store, mutex) = contender(&coordinator);

    let value = mutex
        .with_lock(Duration::from_secs(1), async {
            assert_eq!(coordinator.children_of(LOCK_PATH).len(), 1);
            42
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert!(!mutex.is_acquired());
    assert!(coordinator.children_of(LOCK_PATH).is_empty());
}

#[tokio::test]
async fn test_participant_nodes() {
    let coordinator = MemoryCoordinator::new();
    let (a_store, a) = contender(&coordinator);
    let (b_store, b) = contender(&coordinator);

    assert!(a.participant_nodes().await.unwrap().is_empty());

    a.acquire(Duration::from_secs(1)).await.unwrap();
    let waiter = tokio::spawn(async move {
        let acquired = b.acquire(Duration::from_secs(10)).await;
        acquired.map(|_| b)
    });
    wait_for_children(&coordinator, 2).await;

    let participants = a.participant_nodes().await.unwrap();
    assert_eq!(participants.len(), 2);
    assert!(participants[0].is_holder);
    assert!(!participants[1].is_holder);
    assert_eq!(Some(participants[0].node.clone()), a.current_node());
    assert_eq!(participants[0].session_id.as_deref(), Some(a_store.session_id()));
    assert_eq!(participants[1].session_id.as_deref(), Some(b_store.session_id()));
    assert!(participants[0].sequence < participants[1].sequence);
    assert!(participants[0].identity.contains(':'));

    a.release().await.unwrap();
    let b = waiter.await.unwrap().unwrap();
    b.release().await.unwrap();
}

#[tokio::test]
async fn test_invalid_lock_path_rejected() {
    let coordinator = MemoryCoordinator::new();
    let store: Arc<dyn CoordinationStore> = session(&coordinator);

    let err = DistributedMutex::with_path(store.clone(), "lock").err().unwrap();
    assert!(matches!(err, LockError::Store(StoreError::InvalidPath(_))));

    let mut options = MutexOptions::new(LOCK_PATH);
    options.node_prefix = "a/b".to_string();
    assert!(DistributedMutex::new(store, options).is_err());
}
