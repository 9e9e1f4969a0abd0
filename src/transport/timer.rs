//! Scheduled callbacks.
//!
//! Long-running waits (reconnection backoff, next-search delay, negotiation
//! grace) are entries in a [`TimerQueue`] rather than blocking sleeps. The
//! driver asks for [`TimerQueue::next_deadline`], sleeps until then and hands
//! expired entries back to the engine. Session-scoped timers carry the session
//! generation they were armed for; once the generation moves on, firing them
//! is a no-op.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// What a timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Start reconnection attempt `attempt`.
    ReconnectAttempt {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Give up on a pending connection attempt.
    ConnectTimeout {
        /// Attempt the timeout guards.
        attempt: u32,
    },
    /// Re-enter the queue after `next_session`.
    NextSearch,
    /// Media dip outlasted the grace window.
    NegotiationGrace,
    /// First handshake did not reach Connected.
    HandshakeTimeout,
    /// Withdraw the typing indicator.
    TypingIdle,
}

/// Lifetime a timer is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerScope {
    /// Survives session changes; cancelled explicitly.
    Connection,
    /// Valid only while the session generation is unchanged.
    Session(u64),
}

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// An expired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    /// Identity.
    pub id: TimerId,
    /// Action.
    pub kind: TimerKind,
    /// Lifetime.
    pub scope: TimerScope,
    /// When it was due.
    pub deadline: Instant,
}

/// Deadline-ordered set of pending timers.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    entries: BTreeMap<(Instant, TimerId), (TimerKind, TimerScope)>,
}

impl TimerQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer `delay` after `now`.
    pub fn schedule(
        &mut self,
        kind: TimerKind,
        scope: TimerScope,
        now: Instant,
        delay: Duration,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert((now + delay, id), (kind, scope));
        id
    }

    /// Disarm one timer. Returns whether it was pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let key = self.entries.keys().find(|(_, tid)| *tid == id).copied();
        match key {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Disarm every timer of `kind`.
    pub fn cancel_kind(&mut self, kind: TimerKind) {
        self.entries.retain(|_, (k, _)| *k != kind);
    }

    /// Disarm every reconnection-related timer.
    pub fn cancel_reconnect(&mut self) {
        self.entries.retain(|_, (k, _)| {
            !matches!(
                k,
                TimerKind::ReconnectAttempt { .. } | TimerKind::ConnectTimeout { .. }
            )
        });
    }

    /// Disarm every session-scoped timer.
    pub fn cancel_session_timers(&mut self) {
        self.entries
            .retain(|_, (_, scope)| matches!(scope, TimerScope::Connection));
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Timer> {
        let (&(deadline, id), _) = self.entries.iter().next()?;
        if deadline > now {
            return None;
        }
        let (kind, scope) = self.entries.remove(&(deadline, id))?;
        Some(Timer {
            id,
            kind,
            scope,
            deadline,
        })
    }

    /// Whether a timer of `kind` is pending.
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.entries.values().any(|(k, _)| *k == kind)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
