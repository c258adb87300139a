//! Integration tests for orderly shutdown.

use std::time::Duration;

use super::test_helpers::{did_change, spawn_relay};

#[tokio::test]
async fn local_end_of_stream_closes_the_peer() {
    let mut h = spawn_relay();
    let mut peer = h.script.accept();

    h.client.send(&did_change(1)).await;
    assert_eq!(peer.recv().await, did_change(1));

    h.client.close_write().await;
    peer.expect_eof().await;
    h.finish().await.expect("end of input is a clean exit");
}

#[tokio::test]
async fn cancel_while_connected_closes_the_peer() {
    let mut h = spawn_relay();
    let mut peer = h.script.accept();

    h.client.send(&did_change(1)).await;
    peer.recv().await;

    h.cancel.cancel();
    peer.expect_eof().await;
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn cancel_while_reconnecting_stops_promptly() {
    let h = spawn_relay();
    let first = h.script.accept();
    tokio::time::sleep(Duration::from_millis(40)).await;
    drop(first);
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn cancel_before_any_connection_stops_promptly() {
    let h = spawn_relay();
    h.script.refuse();
    tokio::time::sleep(Duration::from_millis(5)).await;

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn repeated_cancel_is_harmless() {
    let h = spawn_relay();
    let _peer = h.script.accept();

    h.cancel.cancel();
    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn staged_frames_are_not_sent_after_shutdown() {
    let mut h = spawn_relay();
    h.script.refuse();
    h.client.send(&did_change(1)).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    h.cancel.cancel();
    let attempts = std::sync::Arc::clone(&h.attempts);
    h.finish().await.expect("clean shutdown");

    let before = attempts.load(std::sync::atomic::Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        attempts.load(std::sync::atomic::Ordering::SeqCst),
        before,
        "no connection attempts after shutdown"
    );
}
