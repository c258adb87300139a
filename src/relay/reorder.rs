//! Handshake reorder buffer.
//!
//! The peer emits notifications before it answers the `initialize` request,
//! while the local client expects the response first. Between sending the
//! request and relaying its response, id-less messages from the peer are held
//! back; the response is relayed as soon as it arrives, followed by the held
//! notifications in arrival order.
//!
//! Only notifications are withheld. Other responses and server requests pass
//! straight through, as does anything that is not a JSON object.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::codec::Frame;

/// Method name of the session initialization request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Frames released to the local stream by [`HandshakeReorder::accept`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Release {
    /// Frames to relay, already in the order the client must see them.
    pub frames: Vec<Frame>,
    /// `true` when this call relayed the awaited initialization response.
    pub handshake_resolved: bool,
}

/// Reorder state for the single initialization exchange.
#[derive(Debug, Default)]
pub struct HandshakeReorder {
    awaiting_init: bool,
    tracked_id: Option<Value>,
    held: VecDeque<Frame>,
}

impl HandshakeReorder {
    /// Create a disarmed buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a frame being written to the peer; arms the buffer when it is
    /// an `initialize` request.
    ///
    /// Returns `true` if the buffer was armed by this frame.
    pub fn observe_outbound(&mut self, frame: &Frame) -> bool {
        let Ok(Value::Object(msg)) = serde_json::from_str::<Value>(frame.payload()) else {
            return false;
        };

        let is_initialize = msg.get("method").and_then(Value::as_str) == Some(INITIALIZE_METHOD);
        match msg.get("id") {
            Some(id) if is_initialize && !id.is_null() => {
                self.track(id.clone());
                true
            }
            _ => false,
        }
    }

    /// Start waiting for the response to the request with `id`.
    pub fn track(&mut self, id: Value) {
        if let Some(previous) = self.tracked_id.as_ref().filter(|_| self.awaiting_init) {
            warn!(%previous, %id, "reorder: initialize re-sent before the first was answered");
        }
        debug!(%id, "reorder: awaiting initialize response");
        self.awaiting_init = true;
        self.tracked_id = Some(id);
    }

    /// Classify one inbound frame from the peer and return what to relay now.
    pub fn accept(&mut self, frame: Frame) -> Release {
        if !self.awaiting_init {
            return Release {
                frames: vec![frame],
                handshake_resolved: false,
            };
        }

        match self.classify(&frame) {
            Inbound::AwaitedResponse => {
                let mut frames = Vec::with_capacity(self.held.len() + 1);
                frames.push(frame);
                frames.extend(self.held.drain(..));
                info!(
                    released = frames.len() - 1,
                    "reorder: initialize response relayed, releasing held notifications"
                );
                self.awaiting_init = false;
                self.tracked_id = None;
                Release {
                    frames,
                    handshake_resolved: true,
                }
            }
            Inbound::Notification => {
                debug!(held = self.held.len() + 1, "reorder: holding notification until initialize response");
                self.held.push_back(frame);
                Release::default()
            }
            Inbound::Other => Release {
                frames: vec![frame],
                handshake_resolved: false,
            },
        }
    }

    /// Disarm the buffer and drop held frames; they belong to a peer session
    /// that no longer exists.
    pub fn reset(&mut self) {
        if !self.held.is_empty() {
            debug!(discarded = self.held.len(), "reorder: reset discards held notifications");
        }
        self.awaiting_init = false;
        self.tracked_id = None;
        self.held.clear();
    }

    /// Whether an initialization response is still outstanding.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        self.awaiting_init
    }

    /// Number of notifications currently withheld.
    #[must_use]
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    fn classify(&self, frame: &Frame) -> Inbound {
        let Ok(Value::Object(msg)) = serde_json::from_str::<Value>(frame.payload()) else {
            return Inbound::Other;
        };

        match msg.get("id").filter(|id| !id.is_null()) {
            None => Inbound::Notification,
            Some(id)
                if self.tracked_id.as_ref() == Some(id)
                    && (msg.contains_key("result") || msg.contains_key("error")) =>
            {
                Inbound::AwaitedResponse
            }
            Some(_) => Inbound::Other,
        }
    }
}

/// How an inbound message is treated while the handshake is pending.
enum Inbound {
    AwaitedResponse,
    Notification,
    Other,
}
