//! Notifications reported to the observer.

use crate::core::{SessionId, TempId, TrackKind};
use crate::delivery::{InboundMessage, MessageStatus};
use crate::negotiation::NegotiationPhase;
use crate::session::{Session, SessionStatus};

/// Category of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// Transport could not be restored.
    ReconnectExhausted,
    /// Media handshake could not reach or regain Connected.
    NegotiationFailed,
}

/// Everything the engine tells its observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Session status changed.
    SessionStateChanged(SessionStatus),
    /// Queue metadata while searching.
    QueueUpdate {
        /// Position in the queue.
        position: u32,
        /// Users waiting.
        total_waiting: u32,
        /// Estimated wait.
        estimated_wait_seconds: u32,
    },
    /// A new session is active.
    MatchFound(Session),
    /// A session ended.
    SessionEnded {
        /// Ended session.
        session_id: SessionId,
        /// Reason code.
        reason: String,
        /// Whether the partner (or the link to them) ended it.
        by_peer: bool,
    },
    /// Outbound message status changed.
    MessageStatusChanged {
        /// Provisional id.
        temp_id: TempId,
        /// New status.
        status: MessageStatus,
    },
    /// New inbound message.
    InboundMessage(InboundMessage),
    /// Media handshake phase changed.
    NegotiationPhaseChanged(NegotiationPhase),
    /// The session became unusable.
    FatalError {
        /// Category.
        kind: FatalKind,
        /// Human-readable detail.
        detail: String,
    },
    /// Transport is up for the first time (or after an explicit reconnect).
    Connected,
    /// Reconnection attempt started.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Transport restored.
    Reconnected,
    /// Reconnection gave up.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// Partner started or stopped typing.
    PartnerTyping(bool),
    /// Partner's transport dropped; the session stays up.
    PartnerDisconnected,
    /// Users online.
    OnlineCount(u32),
    /// Partner acquired media.
    PartnerMediaReady {
        /// `audio`, `video` or `both`.
        media_type: String,
    },
    /// Local track enabled or muted.
    LocalTrackToggled {
        /// Track.
        kind: TrackKind,
        /// New state.
        enabled: bool,
    },
    /// Report accepted by the service.
    ReportSubmitted,
    /// Block applied by the service.
    UserBlocked,
    /// The service reported a failure; the session is unaffected.
    ServiceError {
        /// Message from the service.
        message: String,
    },
}
