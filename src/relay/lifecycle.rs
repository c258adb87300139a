//! Connection lifecycle state machine.
//!
//! Pure and I/O-free: every event method validates the current state,
//! performs the transition, and returns the [`Action`]s the relay must carry
//! out. Events that make no sense in the current state are rejected with
//! [`AppError::Transition`] instead of being silently applied.
//!
//! ```text
//!                 start / RetryDelay
//!  Disconnected ───────────────────────► Connecting ──ok (first)──► Connected
//!       ▲                                 │    ▲                       │
//!       │ failed (immediate retries left) │    │ ReconnectDelay        │ closed
//!       └─────────────────────────────────┘    │                       ▼
//!                       failed (escalate) ──► Reconnecting ◄──────────┘
//!                                                   ▲
//!  Connecting ──ok (after reconnect)──► WarmingUp ──┘ closed
//!                                          │ WarmUp elapsed
//!                                          ▼
//!                                      Connected
//! ```

use std::fmt::{Display, Formatter};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Connection state, owned by [`Lifecycle`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and deliverable.
    Connected,
    /// Connected after a peer restart; traffic is held until warm-up ends.
    WarmingUp,
    /// Waiting out the reconnect delay.
    Reconnecting,
    /// Terminal; nothing is retried.
    ShuttingDown,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::WarmingUp => "warming_up",
            Self::Reconnecting => "reconnecting",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// The single timer the lifecycle can have running.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerKind {
    /// Short delay between immediate connection retries.
    RetryDelay,
    /// Longer delay giving a restarting peer time to come back.
    ReconnectDelay,
    /// Pause after reconnecting before traffic resumes.
    WarmUp,
}

/// Side effects requested by a transition, to be applied in order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Action {
    /// Begin a bounded connection attempt.
    Connect,
    /// Arm the timer slot, replacing any running timer.
    StartTimer(TimerKind, Duration),
    /// Disarm the timer slot.
    CancelTimer,
    /// Send every staged frame to the peer, oldest first.
    DrainStaging,
    /// Empty the staging queue without sending.
    DiscardStaging,
    /// Tell the local client the peer restarted.
    NotifyRestart,
    /// Disarm the handshake reorder buffer.
    ResetHandshake,
    /// Close the transport.
    ClosePeer,
}

/// Retry and warm-up schedule.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Immediate retries before escalating to the reconnect loop.
    pub initial_retry_attempts: u32,
    /// Delay between immediate retries.
    pub initial_retry_delay: Duration,
    /// Delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Pause after a reconnect before traffic resumes.
    pub warmup_delay: Duration,
    /// Failed reconnect attempts tolerated; `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

/// Connection lifecycle state machine.
#[derive(Debug)]
pub struct Lifecycle {
    policy: RetryPolicy,
    state: ConnectionState,
    initial_retries: u32,
    reconnect_failures: u32,
    via_reconnect: bool,
    handshake_completed: bool,
}

impl Lifecycle {
    /// Create a lifecycle in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            initial_retries: 0,
            reconnect_failures: 0,
            via_reconnect: false,
            handshake_completed: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether outbound frames may be written to the peer right now.
    #[must_use]
    pub fn is_deliverable(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Record that the peer answered the initialization request.
    pub fn mark_handshake_completed(&mut self) {
        self.handshake_completed = true;
    }

    /// `Disconnected → Connecting` at startup.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transition`] unless the state is `Disconnected`.
    pub fn start(&mut self) -> Result<Vec<Action>> {
        self.expect(&[ConnectionState::Disconnected], "start")?;
        self.via_reconnect = false;
        self.enter(ConnectionState::Connecting);
        Ok(vec![Action::Connect])
    }

    /// A connection attempt succeeded.
    ///
    /// The first connection is deliverable at once. A connection reached
    /// through the reconnect loop warms up first.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transition`] unless the state is `Connecting`.
    pub fn on_connected(&mut self) -> Result<Vec<Action>> {
        self.expect(&[ConnectionState::Connecting], "connected")?;
        self.initial_retries = 0;
        self.reconnect_failures = 0;

        if std::mem::take(&mut self.via_reconnect) {
            self.enter(ConnectionState::WarmingUp);
            Ok(vec![Action::StartTimer(
                TimerKind::WarmUp,
                self.policy.warmup_delay,
            )])
        } else {
            self.enter(ConnectionState::Connected);
            Ok(vec![Action::DrainStaging])
        }
    }

    /// A connection attempt failed or timed out.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transition`] unless the state is `Connecting`, and
    /// [`AppError::RetriesExhausted`] once the reconnect cap is reached.
    pub fn on_connect_failed(&mut self) -> Result<Vec<Action>> {
        self.expect(&[ConnectionState::Connecting], "connect failed")?;

        if std::mem::take(&mut self.via_reconnect) {
            self.reconnect_failures += 1;
            if let Some(cap) = self.policy.max_reconnect_attempts {
                if self.reconnect_failures >= cap {
                    self.enter(ConnectionState::ShuttingDown);
                    return Err(AppError::RetriesExhausted(format!(
                        "peer unreachable after {} reconnect attempts",
                        self.reconnect_failures
                    )));
                }
            }
            return Ok(self.schedule_reconnect());
        }

        if self.initial_retries < self.policy.initial_retry_attempts {
            self.initial_retries += 1;
            self.enter(ConnectionState::Disconnected);
            debug!(
                attempt = self.initial_retries,
                of = self.policy.initial_retry_attempts,
                "lifecycle: scheduling immediate retry"
            );
            return Ok(vec![Action::StartTimer(
                TimerKind::RetryDelay,
                self.policy.initial_retry_delay,
            )]);
        }

        warn!(
            retries = self.initial_retries,
            "lifecycle: immediate retries used up, falling back to reconnect loop"
        );
        Ok(self.schedule_reconnect())
    }

    /// The live connection closed.
    ///
    /// Staged traffic and any notifications held for the unanswered
    /// `initialize` are discarded: they belong to the session that just
    /// ended, and the next session must not be matched against its id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transition`] unless the state is `Connected` or
    /// `WarmingUp`.
    pub fn on_peer_closed(&mut self) -> Result<Vec<Action>> {
        self.expect(
            &[ConnectionState::Connected, ConnectionState::WarmingUp],
            "peer closed",
        )?;
        let mut actions = vec![Action::DiscardStaging, Action::ResetHandshake];
        actions.extend(self.schedule_reconnect());
        Ok(actions)
    }

    /// The timer slot fired.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transition`] if the timer does not belong to the
    /// current state.
    pub fn on_timer(&mut self, kind: TimerKind) -> Result<Vec<Action>> {
        match kind {
            TimerKind::RetryDelay => {
                self.expect(&[ConnectionState::Disconnected], "retry delay elapsed")?;
                self.via_reconnect = false;
                self.enter(ConnectionState::Connecting);
                Ok(vec![Action::Connect])
            }
            TimerKind::ReconnectDelay => {
                self.expect(&[ConnectionState::Reconnecting], "reconnect delay elapsed")?;
                self.via_reconnect = true;
                self.enter(ConnectionState::Connecting);
                Ok(vec![Action::Connect])
            }
            TimerKind::WarmUp => {
                self.expect(&[ConnectionState::WarmingUp], "warm-up elapsed")?;
                self.enter(ConnectionState::Connected);
                let mut actions = Vec::with_capacity(3);
                if self.handshake_completed {
                    actions.push(Action::NotifyRestart);
                }
                actions.push(Action::ResetHandshake);
                actions.push(Action::DrainStaging);
                Ok(actions)
            }
        }
    }

    /// Enter the terminal state. Only the first call returns actions.
    pub fn shutdown(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::ShuttingDown {
            return Vec::new();
        }
        self.enter(ConnectionState::ShuttingDown);
        vec![Action::CancelTimer, Action::ClosePeer]
    }

    fn schedule_reconnect(&mut self) -> Vec<Action> {
        self.enter(ConnectionState::Reconnecting);
        vec![Action::StartTimer(
            TimerKind::ReconnectDelay,
            self.policy.reconnect_delay,
        )]
    }

    fn expect(&self, allowed: &[ConnectionState], event: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AppError::Transition(format!(
                "{event} while {}",
                self.state
            )))
        }
    }

    fn enter(&mut self, next: ConnectionState) {
        if next != self.state {
            info!(from = %self.state, to = %next, "lifecycle: state change");
            self.state = next;
        }
    }
}
