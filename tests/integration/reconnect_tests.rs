//! Integration tests for peer restarts, warm-up, and retry limits.

use std::sync::atomic::Ordering;
use std::time::Duration;

use lsp_tcp_bridge::relay::lifecycle::RetryPolicy;
use lsp_tcp_bridge::relay::{RelaySettings, RESTART_MESSAGE};
use lsp_tcp_bridge::AppError;

use super::test_helpers::{
    did_change, fast_settings, initialize, notification, response, spawn_relay, spawn_relay_with,
};

/// Long enough for the relay to notice a dropped peer, well inside the
/// reconnect delay of [`fast_settings`].
const SETTLE: Duration = Duration::from_millis(40);

#[tokio::test]
async fn restart_notification_precedes_traffic_queued_during_outage() {
    let mut h = spawn_relay();
    let mut first = h.script.accept();

    h.client.send(&initialize(1)).await;
    first.recv().await;
    first.send(&response(1)).await;
    assert_eq!(h.client.recv().await, response(1));

    let mut second = h.script.accept();
    drop(first);
    tokio::time::sleep(SETTLE).await;

    h.client.send(&did_change(2)).await;

    let notice = h.client.recv_json().await;
    assert_eq!(notice["method"], "window/showMessage");
    assert_eq!(notice["params"]["message"], RESTART_MESSAGE);

    assert_eq!(second.recv().await, did_change(2));

    // Exactly one notice: the next thing the client sees is live peer traffic.
    second.send(&notification("after restart")).await;
    assert_eq!(h.client.recv().await, notification("after restart"));

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn reconnect_without_prior_handshake_is_silent() {
    let mut h = spawn_relay();
    let first = h.script.accept();
    let mut second = h.script.accept();

    tokio::time::sleep(SETTLE).await;
    drop(first);
    tokio::time::sleep(SETTLE).await;

    h.client.send(&did_change(1)).await;
    assert_eq!(second.recv().await, did_change(1));

    second.send(&notification("hello")).await;
    assert_eq!(
        h.client.recv().await,
        notification("hello"),
        "no restart notice without a completed handshake"
    );

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn traffic_waits_for_warm_up_after_reconnect() {
    let mut h = spawn_relay();
    let first = h.script.accept();
    let mut second = h.script.accept();

    tokio::time::sleep(SETTLE).await;
    drop(first);
    tokio::time::sleep(SETTLE).await;
    h.client.send(&did_change(1)).await;

    // Reconnect delay and warm-up together exceed this window.
    second.expect_silence(Duration::from_millis(150)).await;
    assert_eq!(second.recv().await, did_change(1));

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn held_notifications_of_dead_session_are_discarded() {
    let mut h = spawn_relay();
    let mut first = h.script.accept();

    h.client.send(&initialize(1)).await;
    first.recv().await;
    first.send(&notification("from dead session")).await;

    let mut second = h.script.accept();
    tokio::time::sleep(SETTLE).await;
    drop(first);

    // The new session answers nothing yet; its notifications flow freely.
    tokio::time::sleep(Duration::from_millis(400)).await;
    second.send(&notification("from new session")).await;
    assert_eq!(h.client.recv().await, notification("from new session"));

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn notification_from_new_session_during_warm_up_is_relayed() {
    let mut h = spawn_relay();
    let mut first = h.script.accept();

    h.client.send(&initialize(1)).await;
    assert_eq!(first.recv().await, initialize(1));

    // Written before the relay connects, so it is read while warming up.
    let mut second = h.script.accept();
    second.send(&notification("live session")).await;
    drop(first);

    assert_eq!(
        h.client.recv().await,
        notification("live session"),
        "the unanswered initialize of the dead session must not hold new traffic"
    );

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn refused_attempts_are_retried_until_the_peer_appears() {
    let mut h = spawn_relay();
    h.script.refuse();
    h.script.refuse();
    h.script.refuse();
    let mut peer = h.script.accept();

    h.client.send(&did_change(1)).await;
    assert_eq!(peer.recv().await, did_change(1));
    assert_eq!(h.attempts.load(Ordering::SeqCst), 4);

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn unresponsive_peer_attempt_times_out_and_retries() {
    let base = fast_settings();
    let settings = RelaySettings {
        connect_timeout: Duration::from_millis(50),
        ..base
    };
    let mut h = spawn_relay_with(settings);

    // No outcome is scripted, so the first attempt hangs until its timeout.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(h.attempts.load(Ordering::SeqCst) >= 2, "timed-out attempt must be retried");

    let mut peer = h.script.accept();
    h.client.send(&did_change(1)).await;
    assert_eq!(peer.recv().await, did_change(1));

    h.cancel.cancel();
    h.finish().await.expect("clean shutdown");
}

#[tokio::test]
async fn exhausted_reconnect_cap_is_fatal() {
    let settings = RelaySettings {
        retry: RetryPolicy {
            initial_retry_attempts: 1,
            initial_retry_delay: Duration::from_millis(5),
            reconnect_delay: Duration::from_millis(5),
            warmup_delay: Duration::from_millis(5),
            max_reconnect_attempts: Some(2),
        },
        ..fast_settings()
    };
    let h = spawn_relay_with(settings);
    let attempts = std::sync::Arc::clone(&h.attempts);

    // Dropping the script makes every attempt fail immediately.
    let super::test_helpers::Harness {
        client,
        script,
        cancel,
        task,
        ..
    } = h;
    drop(script);

    let result = tokio::time::timeout(super::test_helpers::WAIT, task)
        .await
        .expect("relay did not stop")
        .expect("relay task panicked");
    assert!(matches!(result, Err(AppError::RetriesExhausted(_))));
    // First attempt, one immediate retry, two reconnect attempts.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    drop((client, cancel));
}
