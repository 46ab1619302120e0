//! Integration tests for corral-connect
//!
//! Drive the controller cache through the fake dialer the way the fleet
//! manager does.

use corral_connect::testing::{FakeController, FakeDialer};
use corral_connect::{ConnectError, ControllerCache, DialTarget, Dialer};
use corral_core_interface::{EntityPath, Version};
use std::time::Duration;

fn target(path: &EntityPath) -> DialTarget {
    DialTarget {
        controller: path.clone(),
        addresses: vec!["10.0.0.1:17070".to_string()],
        ca_cert: None,
        user: "admin".to_string(),
        password: "secret".to_string(),
    }
}

fn fixture() -> (ControllerCache, FakeDialer, FakeController, EntityPath) {
    let path = EntityPath::new("bob", "ctl");
    let controller = FakeController::new(Version::new(2, 9, 0));
    let dialer = FakeDialer::new();
    dialer.register(&path, controller.clone());
    (ControllerCache::new(), dialer, controller, path)
}

#[tokio::test]
async fn test_concurrent_opens_share_one_dial() {
    let (cache, dialer, controller, path) = fixture();
    dialer.set_delay(Duration::from_millis(20));
    let key = path.to_string();
    let t = target(&path);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let dialer = dialer.clone();
        let t = t.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            cache.open_api(&key, || dialer.dial(&t)).await
        }));
    }
    let mut conns = Vec::new();
    for h in handles {
        conns.push(h.await.unwrap().unwrap());
    }

    assert_eq!(dialer.dial_count(&path), 1);
    assert_eq!(controller.open_connections(), 1);
    assert_eq!(cache.ref_count(&key), Some(8));
}

#[tokio::test]
async fn test_concurrent_failed_dial_reported_to_all() {
    let (cache, dialer, _controller, path) = fixture();
    dialer.set_delay(Duration::from_millis(20));
    dialer.set_unreachable(&path, true);
    let key = path.to_string();
    let t = target(&path);

    let (a, b) = tokio::join!(
        cache.open_api(&key, || dialer.dial(&t)),
        cache.open_api(&key, || dialer.dial(&t)),
    );
    assert!(matches!(a.err(), Some(ConnectError::DialFailed { .. })));
    assert!(matches!(b.err(), Some(ConnectError::DialFailed { .. })));
    assert_eq!(dialer.dial_count(&path), 1);

    // Failure is not cached: the next open dials again.
    dialer.set_unreachable(&path, false);
    cache.open_api(&key, || dialer.dial(&t)).await.unwrap();
    assert_eq!(dialer.dial_count(&path), 2);
}

#[tokio::test]
async fn test_close_is_idempotent_and_keeps_connection() {
    let (cache, dialer, controller, path) = fixture();
    let key = path.to_string();
    let t = target(&path);

    let conn = cache.open_api(&key, || dialer.dial(&t)).await.unwrap();
    conn.close();
    conn.close();
    drop(conn);

    let again = cache.open_api(&key, || dialer.dial(&t)).await.unwrap();
    again.ping().await.unwrap();
    assert_eq!(dialer.dial_count(&path), 1);
    assert_eq!(controller.open_connections(), 1);
}

#[tokio::test]
async fn test_evict_forces_redial() {
    let (cache, dialer, controller, path) = fixture();
    let key = path.to_string();
    let t = target(&path);

    let first = cache.open_api(&key, || dialer.dial(&t)).await.unwrap();
    let sibling = cache.open_api(&key, || dialer.dial(&t)).await.unwrap();

    first.evict().await;
    assert!(cache.is_empty());
    assert_eq!(controller.open_connections(), 0);

    // Every holder of the evicted connection sees it as dead.
    assert!(matches!(sibling.ping().await, Err(ConnectError::Evicted(_))));

    let fresh = cache.open_api(&key, || dialer.dial(&t)).await.unwrap();
    fresh.ping().await.unwrap();
    assert_eq!(dialer.dial_count(&path), 2);
}

#[tokio::test]
async fn test_evict_all() {
    let (cache, dialer, controller, path) = fixture();
    let other_path = EntityPath::new("alice", "ctl2");
    let other = FakeController::new(Version::new(3, 1, 0));
    dialer.register(&other_path, other.clone());

    let (t, other_t) = (target(&path), target(&other_path));
    let a = cache
        .open_api(&path.to_string(), || dialer.dial(&t))
        .await
        .unwrap();
    let b = cache
        .open_api(&other_path.to_string(), || dialer.dial(&other_t))
        .await
        .unwrap();

    assert_eq!(cache.evict_all().await, 2);
    assert!(a.ping().await.is_err());
    assert!(b.ping().await.is_err());
    assert_eq!(controller.open_connections(), 0);
    assert_eq!(other.open_connections(), 0);

    cache
        .open_api(&path.to_string(), || dialer.dial(&t))
        .await
        .unwrap();
    assert_eq!(dialer.dial_count(&path), 2);
}
