//! Connection resilience.
//!
//! Tracks the link to the matching service and decides what a connect,
//! disconnect or failed attempt means: a remote or error disconnect starts a
//! bounded exponential reconnection sequence, an intentional local disconnect
//! does not. At most one connection attempt is in flight at a time.

use std::time::Duration;

use crate::core::ReconnectPolicy;

/// Why the transport went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The service closed the channel.
    ServerInitiated,
    /// Network or protocol failure.
    TransportError(String),
    /// We closed the channel on purpose.
    Local,
}

/// Link lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Never connected, nothing in flight.
    Disconnected,
    /// First connection attempt in flight.
    Connecting,
    /// Channel up.
    Connected,
    /// Lost the channel; in backoff or an attempt is in flight.
    Reconnecting {
        /// Last attempt started (0 while waiting for the first).
        attempt: u32,
    },
    /// Attempt ceiling reached; waiting for an explicit reconnect.
    Failed,
    /// Shut down locally.
    Closed,
}

/// What the caller must do after a link event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Nothing.
    None,
    /// Arm a reconnection timer.
    Schedule {
        /// Attempt the timer will start.
        attempt: u32,
        /// Backoff delay.
        delay: Duration,
    },
    /// Give up; the session is lost.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Result of a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// First connection (or after an explicit reconnect).
    Connected,
    /// Restored after a drop.
    Reconnected {
        /// Attempts it took.
        attempts: u32,
    },
    /// Already connected; duplicate notification.
    Duplicate,
}

/// Reconnection state machine.
#[derive(Debug, Clone)]
pub struct ResilienceManager {
    policy: ReconnectPolicy,
    phase: ConnectionPhase,
    attempt_in_flight: bool,
}

impl ResilienceManager {
    /// New manager in `Disconnected`.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            phase: ConnectionPhase::Disconnected,
            attempt_in_flight: false,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Whether the link dropped and has not been restored yet.
    pub fn is_degraded(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Reconnecting { .. })
    }

    /// Whether an attempt is awaiting its outcome.
    pub fn attempt_in_flight(&self) -> bool {
        self.attempt_in_flight
    }

    /// Start the first connection (or a caller-requested reconnect).
    ///
    /// Returns `false` if an attempt is already in flight or the link is up.
    pub fn begin_connect(&mut self) -> bool {
        match self.phase {
            ConnectionPhase::Connected => false,
            _ if self.attempt_in_flight => false,
            _ => {
                self.phase = ConnectionPhase::Connecting;
                self.attempt_in_flight = true;
                true
            }
        }
    }

    /// Start reconnection attempt `attempt` when its backoff timer fires.
    ///
    /// Returns `false` for timers that no longer match the sequence.
    pub fn begin_attempt(&mut self, attempt: u32) -> bool {
        match self.phase {
            ConnectionPhase::Reconnecting { attempt: last }
                if attempt == last + 1 && !self.attempt_in_flight =>
            {
                self.phase = ConnectionPhase::Reconnecting { attempt };
                self.attempt_in_flight = true;
                true
            }
            _ => false,
        }
    }

    /// Attempt number currently in flight, if any.
    pub fn current_attempt(&self) -> Option<u32> {
        if !self.attempt_in_flight {
            return None;
        }
        match self.phase {
            ConnectionPhase::Connecting => Some(0),
            ConnectionPhase::Reconnecting { attempt } => Some(attempt),
            _ => None,
        }
    }

    /// The transport reports the channel is up.
    pub fn on_connected(&mut self) -> ConnectOutcome {
        let outcome = match self.phase {
            ConnectionPhase::Connected => ConnectOutcome::Duplicate,
            ConnectionPhase::Reconnecting { attempt } => ConnectOutcome::Reconnected {
                attempts: attempt.max(1),
            },
            _ => ConnectOutcome::Connected,
        };
        self.phase = ConnectionPhase::Connected;
        self.attempt_in_flight = false;
        outcome
    }

    /// The transport reports the channel is down.
    pub fn on_disconnected(&mut self, reason: &DisconnectReason) -> LinkAction {
        if *reason == DisconnectReason::Local {
            self.shutdown();
            return LinkAction::None;
        }
        match self.phase {
            ConnectionPhase::Connected => {
                self.phase = ConnectionPhase::Reconnecting { attempt: 0 };
                self.attempt_in_flight = false;
                self.schedule_next()
            }
            // An in-flight attempt dropping counts as that attempt failing.
            ConnectionPhase::Connecting | ConnectionPhase::Reconnecting { .. }
                if self.attempt_in_flight =>
            {
                self.on_attempt_failed()
            }
            _ => LinkAction::None,
        }
    }

    /// The in-flight attempt failed or timed out.
    pub fn on_attempt_failed(&mut self) -> LinkAction {
        if !self.attempt_in_flight {
            return LinkAction::None;
        }
        self.attempt_in_flight = false;
        match self.phase {
            ConnectionPhase::Connecting => {
                self.phase = ConnectionPhase::Reconnecting { attempt: 0 };
                self.schedule_next()
            }
            ConnectionPhase::Reconnecting { attempt } if attempt >= self.policy.max_attempts => {
                self.phase = ConnectionPhase::Failed;
                LinkAction::Exhausted { attempts: attempt }
            }
            ConnectionPhase::Reconnecting { .. } => self.schedule_next(),
            _ => LinkAction::None,
        }
    }

    /// Local shutdown; no reconnection will be scheduled.
    pub fn shutdown(&mut self) {
        self.phase = ConnectionPhase::Closed;
        self.attempt_in_flight = false;
    }

    fn schedule_next(&self) -> LinkAction {
        let attempt = match self.phase {
            ConnectionPhase::Reconnecting { attempt } => attempt + 1,
            _ => return LinkAction::None,
        };
        LinkAction::Schedule {
            attempt,
            delay: self.policy.delay_for(attempt),
        }
    }
}
