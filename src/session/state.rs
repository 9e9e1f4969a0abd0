//! Session lifecycle state machine.
//!
//! `Idle → Searching → Matched → Active → Ending → Idle`, with
//! `Searching → Idle` on cancel and `Ending → Ended` when the session was lost
//! to a fatal condition. Exactly one session is live at a time; every change of
//! pairing bumps the generation that scopes timers and peer callbacks.

use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::core::{
    EngineError, PartnerId, Role, SearchCriteria, SessionId, SessionKind, StaleRef,
};
use crate::transport::{MatchFound, QueueStatus, SharedAttributes};

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// No search, no session.
    #[default]
    Idle,
    /// Waiting in the matching queue.
    Searching,
    /// Partner assigned; about to become active.
    Matched,
    /// Conversation running.
    Active,
    /// Tearing down.
    Ending,
    /// Lost to a fatal condition; behaves like Idle for new searches.
    Ended,
}

impl SessionStatus {
    /// Whether a new search may start.
    pub fn can_search(self) -> bool {
        matches!(self, SessionStatus::Idle | SessionStatus::Ended)
    }

    /// Whether a pairing exists.
    pub fn has_session(self) -> bool {
        matches!(self, SessionStatus::Matched | SessionStatus::Active)
    }
}

/// One matched pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Server-issued id.
    pub session_id: SessionId,
    /// Partner identity.
    pub partner_id: PartnerId,
    /// Session kind requested by the search.
    pub kind: SessionKind,
    /// Handshake role committed from the match payload.
    pub role: Role,
    /// When the session became active.
    pub started_at: Option<SystemTime>,
    /// What the service reported the two users share.
    pub shared: SharedAttributes,
}

/// How an inbound match was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// New session is active.
    Accepted,
    /// Duplicate delivery while already paired; ignored.
    Duplicate,
    /// Arrived after the search was cancelled; the pairing must be declined.
    Declined(SessionId),
}

/// Owner of the single live session.
#[derive(Debug, Default)]
pub struct SessionMachine {
    status: SessionStatus,
    current: Option<Session>,
    criteria: Option<SearchCriteria>,
    queue: Option<QueueStatus>,
    generation: u64,
    transitions: Vec<SessionStatus>,
}

impl SessionMachine {
    /// New machine in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Live session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Id of the live session, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.current.as_ref().map(|s| &s.session_id)
    }

    /// Id of the live session when it is `Active`.
    pub fn active_session_id(&self) -> Option<&SessionId> {
        match self.status {
            SessionStatus::Active => self.session_id(),
            _ => None,
        }
    }

    /// Criteria of the running (or last) search.
    pub fn criteria(&self) -> Option<&SearchCriteria> {
        self.criteria.as_ref()
    }

    /// Latest queue metadata while searching.
    pub fn queue(&self) -> Option<QueueStatus> {
        self.queue
    }

    /// Generation token for timers and peer callbacks.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `id` names the live session.
    pub fn is_current(&self, id: &SessionId) -> bool {
        self.session_id() == Some(id)
    }

    /// Drain the status transitions recorded since the last call.
    pub fn take_transitions(&mut self) -> Vec<SessionStatus> {
        std::mem::take(&mut self.transitions)
    }

    fn set(&mut self, status: SessionStatus) {
        if self.status != status {
            debug!(target: "duet.session", from = ?self.status, to = ?status, "session transition");
            self.status = status;
            self.transitions.push(status);
        }
    }

    /// Enter the queue.
    pub fn start_search(&mut self, criteria: SearchCriteria) -> Result<(), EngineError> {
        if !self.status.can_search() {
            return Err(EngineError::InvalidStateTransition {
                operation: "start_search",
                state: self.status,
            });
        }
        self.criteria = Some(criteria);
        self.queue = None;
        self.set(SessionStatus::Searching);
        Ok(())
    }

    /// Leave the queue. Returns the kind of the cancelled search.
    pub fn cancel_search(&mut self) -> Result<SessionKind, EngineError> {
        if self.status != SessionStatus::Searching {
            return Err(EngineError::InvalidStateTransition {
                operation: "cancel_search",
                state: self.status,
            });
        }
        self.queue = None;
        self.set(SessionStatus::Idle);
        Ok(self.criteria.as_ref().map(|c| c.kind).unwrap_or_default())
    }

    /// Record search-ack or status metadata.
    pub fn on_queue_status(&mut self, status: QueueStatus) -> Result<QueueStatus, EngineError> {
        if self.status != SessionStatus::Searching {
            return Err(EngineError::StaleEventDiscarded(StaleRef::State(
                "queue update while not searching",
            )));
        }
        self.queue = Some(status);
        Ok(status)
    }

    /// Apply an inbound match.
    pub fn on_match(&mut self, found: MatchFound) -> Result<MatchOutcome, EngineError> {
        match self.status {
            SessionStatus::Searching => {}
            SessionStatus::Matched | SessionStatus::Active => {
                warn!(
                    target: "duet.session",
                    current = ?self.session_id(),
                    incoming = %found.session_id,
                    "match while paired; keeping current session"
                );
                return Ok(MatchOutcome::Duplicate);
            }
            SessionStatus::Idle | SessionStatus::Ended => {
                info!(
                    target: "duet.session",
                    session_id = %found.session_id,
                    "match after search was cancelled; declining"
                );
                return Ok(MatchOutcome::Declined(found.session_id));
            }
            SessionStatus::Ending => {
                return Err(EngineError::StaleEventDiscarded(StaleRef::Session(
                    found.session_id,
                )));
            }
        }

        let kind = self.criteria.as_ref().map(|c| c.kind).unwrap_or_default();
        self.generation += 1;
        self.queue = None;
        self.current = Some(Session {
            session_id: found.session_id,
            partner_id: found.partner_id,
            kind,
            role: Role::from_initiator(found.initiator),
            started_at: None,
            shared: found.shared,
        });
        self.set(SessionStatus::Matched);

        if let Some(session) = self.current.as_mut() {
            session.started_at = Some(SystemTime::now());
            info!(
                target: "duet.session",
                session_id = %session.session_id,
                partner_id = %session.partner_id,
                role = ?session.role,
                "session active"
            );
        }
        self.set(SessionStatus::Active);
        Ok(MatchOutcome::Accepted)
    }

    /// Begin teardown of the live session.
    ///
    /// Returns the session being ended.
    pub fn begin_end(&mut self) -> Result<Session, EngineError> {
        if !self.status.has_session() {
            return Err(EngineError::InvalidStateTransition {
                operation: "end_session",
                state: self.status,
            });
        }
        let session = self.current.clone().ok_or(EngineError::InvalidStateTransition {
            operation: "end_session",
            state: self.status,
        })?;
        self.set(SessionStatus::Ending);
        Ok(session)
    }

    /// Finish teardown: clear the session and bump the generation.
    ///
    /// `fatal` leaves the machine in `Ended` instead of `Idle`.
    pub fn finish_end(&mut self, fatal: bool) {
        self.current = None;
        self.queue = None;
        self.generation += 1;
        self.set(if fatal {
            SessionStatus::Ended
        } else {
            SessionStatus::Idle
        });
    }

    /// Drop a running search without a session (fatal link loss while searching).
    pub fn abandon_search(&mut self, fatal: bool) {
        if self.status == SessionStatus::Searching {
            self.queue = None;
            self.set(if fatal {
                SessionStatus::Ended
            } else {
                SessionStatus::Idle
            });
        }
    }
}
