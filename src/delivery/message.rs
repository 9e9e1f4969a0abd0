//! Message records and the delivery status lattice.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::core::{MessageId, SessionId, TempId};

/// Delivery status of an outbound message.
///
/// Advances monotonically along `Pending → Sent → Delivered → Read`;
/// `Failed` is reachable from `Pending` or `Sent` only and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Created locally, not yet confirmed by the server.
    Pending,
    /// Confirmed by the server; permanent id known.
    Sent,
    /// Reached the partner's client.
    Delivered,
    /// Seen by the partner.
    Read,
    /// Rejected; never retried automatically.
    Failed,
}

impl MessageStatus {
    fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Pending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Forward jumps along the chain are allowed (a read receipt may overtake
    /// the server ack); staying put or moving backwards is not.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(from), None) => from <= 1,
            (None, _) => false,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }
}

/// A media attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    /// Original file name.
    pub file_name: String,
    /// MIME type.
    pub mime_type: String,
    /// File contents.
    pub data: Vec<u8>,
}

impl MediaAttachment {
    /// Build an attachment.
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// File attachment.
    Media(MediaAttachment),
}

impl MessageContent {
    /// Message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageContent::Text(_) => MessageKind::Text,
            MessageContent::Media(_) => MessageKind::Media,
        }
    }

    /// Text body, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Media(_) => None,
        }
    }
}

/// Text or media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// File attachment.
    Media,
}

/// A message we sent, tracked until it reaches a terminal status.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Provisional id returned to the caller.
    pub temp_id: TempId,
    /// Server id once confirmed.
    pub permanent_id: Option<MessageId>,
    /// Session the message belongs to.
    pub session_id: SessionId,
    /// Body.
    pub content: MessageContent,
    /// Creation time.
    pub created_at: SystemTime,
    /// Current status.
    pub status: MessageStatus,
}

impl OutboundMessage {
    /// New message in `Pending`.
    pub fn new(session_id: SessionId, content: MessageContent) -> Self {
        Self {
            temp_id: TempId::generate(),
            permanent_id: None,
            session_id,
            content,
            created_at: SystemTime::now(),
            status: MessageStatus::Pending,
        }
    }

    /// Message kind.
    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }
}

/// A message received from the partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Server id.
    pub id: MessageId,
    /// Session the message belongs to.
    pub session_id: SessionId,
    /// Body.
    pub content: MessageContent,
    /// Local receipt time.
    pub received_at: SystemTime,
    /// Whether a read receipt went out.
    pub read_acknowledged: bool,
}
