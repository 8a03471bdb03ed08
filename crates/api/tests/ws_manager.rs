//! Unit tests for `WsManager`.
//!
//! These exercise the WebSocket connection manager directly, without
//! performing any HTTP upgrades: add/remove semantics, targeted sends,
//! lag accounting, and graceful shutdown.

use axum::extract::ws::Message;
use tempo_api::ws::WsManager;

#[tokio::test]
async fn new_manager_has_zero_connections() {
    let manager = WsManager::new();

    assert_eq!(manager.connection_count().await, 0);
}

#[tokio::test]
async fn add_and_remove_track_connection_count() {
    let manager = WsManager::new();

    let _rx = manager.add("conn-1".to_string()).await;
    assert_eq!(manager.connection_count().await, 1);

    manager.remove("conn-1").await;
    assert_eq!(manager.connection_count().await, 0);
}

#[tokio::test]
async fn remove_unknown_id_is_noop() {
    let manager = WsManager::new();

    let _rx = manager.add("conn-1".to_string()).await;
    manager.remove("nonexistent").await;

    assert_eq!(manager.connection_count().await, 1);
}

#[tokio::test]
async fn send_to_delivers_to_the_right_connection() {
    let manager = WsManager::new();

    let mut rx1 = manager.add("conn-1".to_string()).await;
    let mut rx2 = manager.add("conn-2".to_string()).await;

    assert!(manager.send_to("conn-1", Message::Text("hello".into())).await);

    let received = rx1.recv().await.expect("conn-1 should receive");
    assert!(matches!(received, Message::Text(t) if t == "hello"));
    assert!(rx2.try_recv().is_err(), "conn-2 must not receive");
}

#[tokio::test]
async fn send_to_missing_connection_returns_false() {
    let manager = WsManager::new();
    assert!(!manager.send_to("ghost", Message::Text("x".into())).await);
}

#[tokio::test]
async fn lag_counter_is_cumulative() {
    let manager = WsManager::new();
    let _rx = manager.add("slow".to_string()).await;

    assert_eq!(manager.record_lag("slow", 3).await, 3);
    assert_eq!(manager.record_lag("slow", 2).await, 5);
}

#[tokio::test]
async fn ping_all_reaches_every_connection() {
    let manager = WsManager::new();

    let mut rx1 = manager.add("conn-1".to_string()).await;
    let mut rx2 = manager.add("conn-2".to_string()).await;

    manager.ping_all().await;

    assert!(matches!(rx1.recv().await, Some(Message::Ping(_))));
    assert!(matches!(rx2.recv().await, Some(Message::Ping(_))));
}

#[tokio::test]
async fn shutdown_sends_close_and_clears() {
    let manager = WsManager::new();

    let mut rx = manager.add("conn-1".to_string()).await;
    manager.shutdown_all().await;

    assert!(matches!(rx.recv().await, Some(Message::Close(None))));
    assert_eq!(manager.connection_count().await, 0);
}
