//! Stdio ↔ TCP relay.
//!
//! A single [`Relay`] value owns every piece of relay state (lifecycle,
//! staging queue, reorder buffer, peer link, timer) and drives it from one
//! `tokio::select!` loop, so no state is shared or locked.
//!
//! Submodules:
//! - `codec`: `Content-Length` framing for both directions.
//! - `reorder`: holds peer notifications until the `initialize` response.
//! - `staging`: outbound frames waiting for a deliverable connection.
//! - `lifecycle`: connect / retry / reconnect / warm-up state machine.
//! - `connector`: transport boundary.

pub mod codec;
pub mod connector;
pub mod lifecycle;
pub mod reorder;
pub mod staging;

use std::collections::VecDeque;
use std::future::pending;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Sleep;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transform::PayloadTransform;
use crate::{AppError, Result};

use self::codec::{encode_frame, Frame, FrameCodec};
use self::connector::{ConnectFuture, Connector};
use self::lifecycle::{Action, Lifecycle, RetryPolicy, TimerKind};
use self::reorder::HandshakeReorder;
use self::staging::StagingQueue;

/// Text of the notification sent to the client after the peer restarts.
pub const RESTART_MESSAGE: &str =
    "The language server restarted. Reopen any open files to restore diagnostics and navigation.";

/// LSP `MessageType.Info`.
const MESSAGE_TYPE_INFO: u8 = 3;

/// Tunables for one [`Relay`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    /// Retry, reconnect and warm-up schedule.
    pub retry: RetryPolicy,
    /// Maximum frames held while the peer is unavailable.
    pub staging_capacity: usize,
}

/// Peer-side halves of an established connection.
struct PeerLink<S> {
    reader: FramedRead<ReadHalf<S>, FrameCodec>,
    writer: WriteHalf<S>,
}

/// Relay context: owns the local output, the peer link, and all relay state.
pub struct Relay<C: Connector, W> {
    settings: RelaySettings,
    connector: C,
    transform: Box<dyn PayloadTransform>,
    local_out: W,
    lifecycle: Lifecycle,
    staging: StagingQueue,
    reorder: HandshakeReorder,
    peer: Option<PeerLink<C::Stream>>,
    pending_connect: Option<ConnectFuture<C::Stream>>,
    timer: Option<(TimerKind, Pin<Box<Sleep>>)>,
}

impl<C, W> Relay<C, W>
where
    C: Connector,
    W: AsyncWrite + Unpin,
{
    /// Build a relay writing client-bound frames to `local_out`.
    pub fn new(
        settings: RelaySettings,
        connector: C,
        transform: Box<dyn PayloadTransform>,
        local_out: W,
    ) -> Self {
        Self {
            lifecycle: Lifecycle::new(settings.retry.clone()),
            staging: StagingQueue::new(settings.staging_capacity),
            reorder: HandshakeReorder::new(),
            settings,
            connector,
            transform,
            local_out,
            peer: None,
            pending_connect: None,
            timer: None,
        }
    }

    /// Run until the local input ends, `cancel` fires, or a fatal error.
    ///
    /// The transport is closed and the timer cancelled on every exit path.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RetriesExhausted`] when a finite reconnect cap is
    /// reached. Local stream failures end the relay with `Ok(())` after an
    /// orderly shutdown.
    pub async fn run<R>(mut self, local_in: R, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut local = FramedRead::new(local_in, FrameCodec::new());
        info!(endpoint = self.connector.endpoint(), "relay: starting");

        let start = self.lifecycle.start();
        let mut outcome = self.apply_transition(start).await;

        while let Ok(ControlFlow::Continue(())) = outcome {
            outcome = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("relay: shutdown requested");
                    Ok(ControlFlow::Break(()))
                }

                item = local.next() => match item {
                    None => {
                        info!("relay: local input closed");
                        Ok(ControlFlow::Break(()))
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "relay: local input failed");
                        Ok(ControlFlow::Break(()))
                    }
                    Some(Ok(frame)) => self.on_local_frame(frame).await,
                },

                result = next_connect(&mut self.pending_connect) => {
                    self.on_connect_result(result).await
                }

                item = next_peer_frame(&mut self.peer) => match item {
                    Some(Ok(frame)) => self.on_peer_frame(frame).await,
                    Some(Err(err)) => {
                        warn!(error = %err, "relay: peer read failed");
                        self.on_peer_lost().await
                    }
                    None => {
                        warn!("relay: peer closed the connection");
                        self.on_peer_lost().await
                    }
                },

                kind = next_timer(&mut self.timer) => {
                    let transition = self.lifecycle.on_timer(kind);
                    self.apply_transition(transition).await
                }
            };
        }

        self.shutdown().await;
        outcome.map(|_| ())
    }

    // ── Event handlers ───────────────────────────────────────────────────────

    async fn on_local_frame(&mut self, frame: Frame) -> Result<ControlFlow<()>> {
        let frame = self.transform_frame(frame);
        if self.lifecycle.is_deliverable() {
            if let Err(err) = self.send_to_peer(frame).await {
                warn!(error = %err, "relay: write to peer failed");
                return self.on_peer_lost().await;
            }
        } else {
            debug!(
                state = %self.lifecycle.state(),
                queued = self.staging.len() + 1,
                "relay: peer not ready, staging outbound frame"
            );
            self.staging.push(frame);
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn on_peer_frame(&mut self, frame: Frame) -> Result<ControlFlow<()>> {
        let release = self.reorder.accept(frame);
        if release.handshake_resolved {
            self.lifecycle.mark_handshake_completed();
        }
        for frame in release.frames {
            let frame = self.transform_frame(frame);
            if let Err(err) = self.send_to_local(frame).await {
                error!(error = %err, "relay: write to local output failed");
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn on_connect_result(
        &mut self,
        result: std::io::Result<C::Stream>,
    ) -> Result<ControlFlow<()>> {
        let transition = match result {
            Ok(stream) => {
                info!(endpoint = self.connector.endpoint(), "relay: connected to peer");
                let (read_half, write_half) = tokio::io::split(stream);
                self.peer = Some(PeerLink {
                    reader: FramedRead::new(read_half, FrameCodec::new()),
                    writer: write_half,
                });
                self.lifecycle.on_connected()
            }
            Err(err) => {
                warn!(
                    endpoint = self.connector.endpoint(),
                    error = %err,
                    "relay: connection attempt failed"
                );
                self.lifecycle.on_connect_failed()
            }
        };
        self.apply_transition(transition).await
    }

    async fn on_peer_lost(&mut self) -> Result<ControlFlow<()>> {
        self.peer = None;
        let transition = self.lifecycle.on_peer_closed();
        self.apply_transition(transition).await
    }

    // ── Action application ───────────────────────────────────────────────────

    /// Apply a lifecycle transition result. Illegal transitions are logged and
    /// ignored; exhausted retries are fatal.
    async fn apply_transition(
        &mut self,
        transition: Result<Vec<Action>>,
    ) -> Result<ControlFlow<()>> {
        match transition {
            Ok(actions) => self.apply(actions).await,
            Err(AppError::Transition(msg)) => {
                debug!(%msg, "relay: ignoring lifecycle event");
                Ok(ControlFlow::Continue(()))
            }
            Err(err) => {
                error!(error = %err, "relay: giving up on peer");
                Err(err)
            }
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) -> Result<ControlFlow<()>> {
        let mut work: VecDeque<Action> = actions.into();

        while let Some(action) = work.pop_front() {
            match action {
                Action::Connect => {
                    debug!(endpoint = self.connector.endpoint(), "relay: connecting");
                    let attempt = self.connector.connect();
                    let limit = self.settings.connect_timeout;
                    let bounded: ConnectFuture<C::Stream> = Box::pin(async move {
                        tokio::time::timeout(limit, attempt).await.map_err(|_| {
                            std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                format!("connection attempt timed out after {limit:?}"),
                            )
                        })?
                    });
                    self.pending_connect = Some(bounded);
                }
                Action::StartTimer(kind, delay) => {
                    debug!(?kind, ?delay, "relay: timer armed");
                    self.timer = Some((kind, Box::pin(tokio::time::sleep(delay))));
                }
                Action::CancelTimer => {
                    self.timer = None;
                }
                Action::DrainStaging => {
                    let frames = self.staging.drain();
                    if !frames.is_empty() {
                        info!(count = frames.len(), "relay: delivering staged frames");
                    }
                    for frame in frames {
                        if let Err(err) = self.send_to_peer(frame).await {
                            warn!(error = %err, "relay: write to peer failed while draining");
                            self.peer = None;
                            work.clear();
                            match self.lifecycle.on_peer_closed() {
                                Ok(next) => work.extend(next),
                                Err(err) => debug!(error = %err, "relay: ignoring lifecycle event"),
                            }
                            break;
                        }
                    }
                }
                Action::DiscardStaging => {
                    let discarded = self.staging.clear();
                    if discarded > 0 {
                        info!(discarded, "relay: dropping frames staged for the previous session");
                    }
                }
                Action::NotifyRestart => {
                    info!("relay: notifying client of peer restart");
                    if let Err(err) = self.send_to_local(restart_notification()).await {
                        error!(error = %err, "relay: write to local output failed");
                        return Ok(ControlFlow::Break(()));
                    }
                }
                Action::ResetHandshake => self.reorder.reset(),
                Action::ClosePeer => {
                    self.pending_connect = None;
                    if let Some(mut link) = self.peer.take() {
                        if let Err(err) = link.writer.shutdown().await {
                            debug!(error = %err, "relay: peer shutdown failed");
                        }
                    }
                }
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    async fn shutdown(&mut self) {
        let actions = self.lifecycle.shutdown();
        if actions.is_empty() {
            return;
        }
        if let Err(err) = self.apply(actions).await {
            debug!(error = %err, "relay: shutdown action failed");
        }
        if let Err(err) = self.local_out.flush().await {
            debug!(error = %err, "relay: final flush of local output failed");
        }
        info!("relay: stopped");
    }

    // ── I/O helpers ──────────────────────────────────────────────────────────

    fn transform_frame(&self, frame: Frame) -> Frame {
        Frame::new(self.transform.apply(frame.into_payload()))
    }

    /// Write one frame to the peer, arming the reorder buffer if it is the
    /// initialization request.
    async fn send_to_peer(&mut self, frame: Frame) -> Result<()> {
        let Some(link) = self.peer.as_mut() else {
            return Err(AppError::Transport("no peer connection".into()));
        };
        let armed = self.reorder.observe_outbound(&frame);
        let bytes = encode_frame(frame);
        link.writer
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::Io(format!("peer write failed: {e}")))?;
        if armed {
            debug!("relay: initialize request forwarded");
        }
        Ok(())
    }

    async fn send_to_local(&mut self, frame: Frame) -> Result<()> {
        let bytes = encode_frame(frame);
        self.local_out
            .write_all(&bytes)
            .await
            .map_err(|e| AppError::Io(format!("local write failed: {e}")))?;
        self.local_out
            .flush()
            .await
            .map_err(|e| AppError::Io(format!("local flush failed: {e}")))
    }
}

/// Build the `window/showMessage` notification sent after a peer restart.
#[must_use]
pub fn restart_notification() -> Frame {
    let msg = json!({
        "jsonrpc": "2.0",
        "method": "window/showMessage",
        "params": {
            "type": MESSAGE_TYPE_INFO,
            "message": RESTART_MESSAGE,
        }
    });
    Frame::new(msg.to_string())
}

// ── select! helpers ───────────────────────────────────────────────────────────
//
// Each resolves only when its slot is occupied, so an empty slot simply never
// wins the select.

async fn next_connect<S>(slot: &mut Option<ConnectFuture<S>>) -> std::io::Result<S> {
    let Some(attempt) = slot.as_mut() else {
        return pending().await;
    };
    let result = attempt.await;
    *slot = None;
    result
}

async fn next_peer_frame<S>(slot: &mut Option<PeerLink<S>>) -> Option<Result<Frame>>
where
    S: AsyncRead + AsyncWrite,
{
    match slot.as_mut() {
        Some(link) => link.reader.next().await,
        None => pending().await,
    }
}

async fn next_timer(slot: &mut Option<(TimerKind, Pin<Box<Sleep>>)>) -> TimerKind {
    let Some((kind, sleep)) = slot.as_mut() else {
        return pending().await;
    };
    sleep.as_mut().await;
    let kind = *kind;
    *slot = None;
    kind
}
