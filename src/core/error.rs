//! Error types for the engine.

use thiserror::Error;

use super::types::{SessionId, TempId};
use crate::session::SessionStatus;

/// Errors raised by a Transport Adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// A connection attempt could not be started.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The channel has been shut down locally.
    #[error("transport closed")]
    Closed,
}

/// Errors raised by the local media collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// This engine was built without a media backend.
    #[error("media not supported by this engine")]
    Unsupported,

    /// Camera or microphone could not be acquired.
    #[error("could not acquire local tracks: {0}")]
    AcquireFailed(String),

    /// Creating or applying a media description failed.
    #[error("media description error: {0}")]
    Description(String),

    /// Applying a connectivity candidate failed.
    #[error("ice candidate error: {0}")]
    Candidate(String),

    /// No local tracks are held.
    #[error("no local tracks")]
    NoTracks,
}

/// Errors decoding inbound wire events.
#[derive(Debug, Error)]
pub enum EventError {
    /// The event name is not part of the vocabulary.
    #[error("unknown event: {0}")]
    Unknown(String),

    /// The payload is missing required fields or has the wrong shape.
    #[error("malformed {event} payload: {source}")]
    Malformed {
        /// Wire name of the event.
        event: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

/// What an inbound event was discarded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleRef {
    /// Event tagged with a session other than the current one.
    Session(SessionId),
    /// Acknowledgement for a message id this engine does not track.
    Message(String),
    /// Event that is meaningless in the current state.
    State(&'static str),
}

impl std::fmt::Display for StaleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleRef::Session(id) => write!(f, "session {id}"),
            StaleRef::Message(id) => write!(f, "message {id}"),
            StaleRef::State(what) => write!(f, "{what}"),
        }
    }
}

/// Top-level engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Intent not valid in the current session state.
    #[error("{operation} is not valid while {state:?}")]
    InvalidStateTransition {
        /// Intent that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: SessionStatus,
    },

    /// The transport is down and the intent cannot be queued.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// Reconnection gave up; the session is over.
    #[error("reconnection failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The server rejected a message.
    #[error("delivery failed for {temp_id}")]
    DeliveryFailed {
        /// Provisional id of the failed message.
        temp_id: TempId,
    },

    /// Event referenced an unknown or expired session or message.
    #[error("stale event discarded: {0}")]
    StaleEventDiscarded(StaleRef),

    /// Media handshake could not reach or regain Connected.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Local media error.
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// Inbound event decode error.
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// Transport error that was not recoverable by queueing.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Message has no content.
    #[error("message is empty")]
    EmptyMessage,

    /// Attachment exceeds the service limit.
    #[error("attachment of {size} bytes exceeds limit of {limit}")]
    AttachmentTooLarge {
        /// Attachment size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine has been disposed.
    #[error("engine disposed")]
    Disposed,
}

impl EngineError {
    /// Whether the error ended (or prevents) the current session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::ReconnectExhausted { .. }
                | EngineError::NegotiationFailed(_)
                | EngineError::Disposed
        )
    }

    /// Whether the error is an internal discard that should only be logged.
    pub fn is_silent(&self) -> bool {
        matches!(self, EngineError::StaleEventDiscarded(_))
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
