//! Wire event vocabulary.
//!
//! Every exchange with the matching service is a named event with a JSON
//! payload. Outbound events are built by the engine and handed to the
//! [`Transport`](crate::core::Transport) as `(name, payload)`; inbound events
//! are decoded from `(name, payload)` with [`InboundEvent::decode`]. Required
//! fields are enforced by the payload types: a missing field is a decode
//! error, not a silently defaulted value.

use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{
    EventError, IceCandidate, MessageId, PartnerId, SearchCriteria, SessionDescription, SessionId,
    SessionKind, TempId,
};
use crate::delivery::{MediaAttachment, MessageContent, MessageStatus};

/// Event names as they appear on the wire.
pub mod names {
    /// Enter the matching queue.
    pub const START_SEARCH: &str = "start_chat_search";
    /// Enter the video matching queue.
    pub const JOIN_VIDEO_CHAT: &str = "join_video_chat";
    /// Leave the matching queue.
    pub const CANCEL_SEARCH: &str = "cancel_chat_search";
    /// Ask for current queue metadata.
    pub const GET_STATUS: &str = "get_chat_status";
    /// Leave a session.
    pub const END_CHAT: &str = "end_chat";
    /// Leave a video session; the service uses the same name when the partner leaves.
    pub const VIDEO_CHAT_ENDED: &str = "video_chat_ended";
    /// Text message.
    pub const SEND_MESSAGE: &str = "send_message";
    /// Media attachment.
    pub const SEND_MEDIA: &str = "send_media";
    /// Delivery receipt.
    pub const MESSAGE_DELIVERED: &str = "message_delivered";
    /// Read receipt.
    pub const MESSAGE_READ: &str = "message_read";
    /// Typing started.
    pub const START_TYPING: &str = "start_typing";
    /// Typing stopped.
    pub const STOP_TYPING: &str = "stop_typing";
    /// Media description or candidate, both directions.
    pub const WEBRTC_SIGNAL: &str = "webrtc_signal";
    /// Local media acquired.
    pub const MEDIA_READY: &str = "media_ready";
    /// Report the partner.
    pub const REPORT_USER: &str = "report_user";
    /// Block the partner.
    pub const BLOCK_USER: &str = "block_user";

    /// Search acknowledged with queue metadata.
    pub const SEARCH_STARTED: &str = "chat_search_started";
    /// Search cancelled by the server.
    pub const SEARCH_CANCELLED: &str = "chat_search_cancelled";
    /// Queue metadata refresh.
    pub const STATUS_UPDATE: &str = "chat_status_update";
    /// Partner found.
    pub const MATCH_FOUND: &str = "chat_match_found";
    /// Session ended remotely.
    pub const CHAT_ENDED: &str = "chat_ended";
    /// Partner's transport dropped; they may come back.
    pub const PARTNER_DISCONNECTED: &str = "partner_disconnected";
    /// Incoming text message.
    pub const NEW_MESSAGE: &str = "new_message";
    /// Incoming attachment.
    pub const MEDIA_MESSAGE: &str = "media_message";
    /// Server accepted a text message.
    pub const MESSAGE_SENT: &str = "message_sent";
    /// Server accepted an attachment.
    pub const MEDIA_SENT: &str = "media_sent";
    /// Status update for one of our messages.
    pub const DELIVERY_STATUS: &str = "message_delivery_status";
    /// Server rejected a text message.
    pub const MESSAGE_ERROR: &str = "message_error";
    /// Server rejected an attachment.
    pub const MEDIA_ERROR: &str = "media_error";
    /// Partner started typing.
    pub const PARTNER_TYPING: &str = "partner_typing";
    /// Partner stopped typing.
    pub const PARTNER_STOPPED_TYPING: &str = "partner_stopped_typing";
    /// Users online.
    pub const ONLINE_COUNT: &str = "online_count_update";
    /// Partner's media acquired.
    pub const PARTNER_MEDIA_READY: &str = "partner_media_ready";
    /// Our report was filed.
    pub const REPORT_SUBMITTED: &str = "report_submitted";
    /// Our block was applied.
    pub const USER_BLOCKED: &str = "user_blocked";
    /// Service-side failure report.
    pub const SERVICE_ERROR: &str = "error";

    /// Video search acknowledged.
    pub const VIDEO_SEARCH_STARTED: &str = "video_chat_search_started";
    /// Video search cancelled by the server.
    pub const VIDEO_SEARCH_CANCELLED: &str = "video_chat_search_cancelled";
    /// Video partner found.
    pub const VIDEO_MATCH_FOUND: &str = "video_chat_match_found";

    /// Older services: search acknowledged with a waiting count.
    pub const SEARCHING: &str = "searching";
    /// Older services: partner found.
    pub const LEGACY_MATCH_FOUND: &str = "match_found";
    /// Older services: partner left; no payload.
    pub const PARTNER_LEFT: &str = "partner_left";
}

mod base64_bytes {
    use super::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Body of a send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendBody {
    /// Text message.
    Text {
        /// Message text.
        message: String,
        /// Always `"text"`.
        #[serde(rename = "type")]
        kind: String,
    },
    /// Attachment.
    Media {
        /// File name.
        file_name: String,
        /// MIME type.
        file_type: String,
        /// Size in bytes.
        file_size: usize,
        /// Base64 contents.
        #[serde(with = "base64_bytes")]
        file_data: Vec<u8>,
    },
}

impl From<&MessageContent> for SendBody {
    fn from(content: &MessageContent) -> Self {
        match content {
            MessageContent::Text(text) => SendBody::Text {
                message: text.clone(),
                kind: "text".to_string(),
            },
            MessageContent::Media(media) => SendBody::Media {
                file_name: media.file_name.clone(),
                file_type: media.mime_type.clone(),
                file_size: media.size(),
                file_data: media.data.clone(),
            },
        }
    }
}

/// One send request; transmitted verbatim from the offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Session the message belongs to.
    pub session_id: SessionId,
    /// Provisional id.
    pub temp_id: TempId,
    /// Body.
    #[serde(flatten)]
    pub body: SendBody,
}

/// Offer, answer or candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalBody {
    /// Offerer's description.
    Offer {
        /// Description.
        offer: SessionDescription,
    },
    /// Answerer's description.
    Answer {
        /// Description.
        answer: SessionDescription,
    },
    /// Connectivity candidate.
    IceCandidate {
        /// Candidate.
        candidate: IceCandidate,
    },
}

/// Negotiation message scoped to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Owning session.
    pub session_id: SessionId,
    /// Content.
    #[serde(flatten)]
    pub body: SignalBody,
}

/// Queue metadata carried by search-ack and status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Our position in the queue.
    pub position: u32,
    /// Users waiting in total.
    #[serde(default, alias = "total")]
    pub total_waiting: u32,
    /// Estimated wait in seconds.
    #[serde(default, alias = "eta")]
    pub estimated_wait_seconds: u32,
}

/// Attributes the matching service reports for a pairing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharedAttributes {
    /// Interests both users listed.
    #[serde(default)]
    pub common_interests: Vec<String>,
    /// Partner's coarse location.
    #[serde(default)]
    pub partner_location: Option<String>,
    /// How the pairing was made.
    #[serde(default)]
    pub match_type: Option<String>,
}

/// Match payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFound {
    /// New session.
    pub session_id: SessionId,
    /// Partner identity.
    pub partner_id: PartnerId,
    /// Whether this side makes the offer.
    #[serde(alias = "initiator_flag")]
    pub initiator: bool,
    /// Shared attributes.
    #[serde(flatten)]
    pub shared: SharedAttributes,
}

/// Session ended by the service or the partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEnded {
    /// Ended session.
    pub session_id: SessionId,
    /// Reason code.
    #[serde(default)]
    pub reason: Option<String>,
    /// Whether the partner left.
    #[serde(default)]
    pub partner_left: bool,
}

impl ChatEnded {
    /// Reason surfaced to the caller.
    pub fn reason(&self) -> String {
        match (&self.reason, self.partner_left) {
            (Some(reason), _) => reason.clone(),
            (None, true) => "partner_left".to_string(),
            (None, false) => "ended".to_string(),
        }
    }
}

/// Incoming text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Server id.
    pub id: MessageId,
    /// Session.
    pub session_id: SessionId,
    /// Text.
    pub content: String,
}

/// Incoming attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMessage {
    /// Server id.
    pub id: MessageId,
    /// Session.
    pub session_id: SessionId,
    /// File name.
    pub file_name: String,
    /// MIME type.
    pub file_type: String,
    /// Base64 contents.
    #[serde(with = "base64_bytes")]
    pub file_data: Vec<u8>,
}

/// Server confirmation of a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAck {
    /// Provisional id.
    pub temp_id: TempId,
    /// Permanent id.
    #[serde(alias = "permanent_id")]
    pub message_id: MessageId,
}

/// Delivery status keyed by permanent or temporary id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Permanent or temporary id.
    #[serde(alias = "id")]
    pub message_id: String,
    /// New status.
    pub status: MessageStatus,
}

/// Server rejection of a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRejected {
    /// Provisional id.
    pub temp_id: TempId,
    /// Reason text.
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload carrying only a session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    /// Session.
    pub session_id: SessionId,
}

/// Partner media readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerMediaReady {
    /// Session, when the service tags it.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// `audio`, `video` or `both`.
    pub media_type: String,
}

/// Queue metadata from the video and older search acks; every field may be absent.
#[derive(Debug, Deserialize)]
struct LooseQueueStatus {
    #[serde(default)]
    position: u32,
    #[serde(default, alias = "total", alias = "count")]
    total_waiting: u32,
    #[serde(default, alias = "eta")]
    estimated_wait_seconds: u32,
}

impl From<LooseQueueStatus> for QueueStatus {
    fn from(loose: LooseQueueStatus) -> Self {
        QueueStatus {
            position: loose.position,
            total_waiting: loose.total_waiting,
            estimated_wait_seconds: loose.estimated_wait_seconds,
        }
    }
}

/// Match payload of the video and older vocabularies. A missing initiator
/// flag makes this side the answerer.
#[derive(Debug, Deserialize)]
struct LooseMatchFound {
    session_id: SessionId,
    partner_id: PartnerId,
    #[serde(default, alias = "initiator_flag")]
    initiator: bool,
    #[serde(flatten)]
    shared: SharedAttributes,
}

impl From<LooseMatchFound> for MatchFound {
    fn from(loose: LooseMatchFound) -> Self {
        MatchFound {
            session_id: loose.session_id,
            partner_id: loose.partner_id,
            initiator: loose.initiator,
            shared: loose.shared,
        }
    }
}

/// Partner-left payload; older services send none at all.
#[derive(Debug, Default, Deserialize)]
struct PartnerLeft {
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OnlineCount {
    #[serde(alias = "online_users")]
    count: u32,
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Events the engine emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Enter the queue.
    StartSearch(SearchCriteria),
    /// Leave the queue.
    CancelSearch {
        /// Kind of the cancelled search.
        kind: SessionKind,
    },
    /// Ask for queue metadata.
    RequestStatus {
        /// Kind of the pending search.
        kind: SessionKind,
    },
    /// Leave a session.
    EndSession {
        /// Session being left.
        session_id: SessionId,
        /// Kind of the session; picks the wire name.
        kind: SessionKind,
        /// Reason code.
        reason: String,
    },
    /// Text or media send.
    Send(SendRequest),
    /// Delivery receipt.
    Delivered {
        /// Message.
        message_id: MessageId,
        /// Session.
        session_id: SessionId,
    },
    /// Read receipt.
    Read {
        /// Message.
        message_id: MessageId,
        /// Session.
        session_id: SessionId,
    },
    /// Typing indicator.
    Typing {
        /// Session.
        session_id: SessionId,
        /// Started or stopped.
        typing: bool,
    },
    /// Negotiation message.
    Signal(Signal),
    /// Local media acquired.
    MediaReady {
        /// `audio` or `both`.
        media_type: &'static str,
    },
    /// Report the partner.
    Report {
        /// Session.
        session_id: SessionId,
        /// Reason code.
        reason: String,
        /// Free text.
        details: String,
    },
    /// Block the partner.
    Block {
        /// Session.
        session_id: SessionId,
    },
}

impl OutboundEvent {
    /// Wire name.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::StartSearch(criteria) if criteria.kind == SessionKind::Video => {
                names::JOIN_VIDEO_CHAT
            }
            OutboundEvent::StartSearch(_) => names::START_SEARCH,
            OutboundEvent::CancelSearch { .. } => names::CANCEL_SEARCH,
            OutboundEvent::RequestStatus { .. } => names::GET_STATUS,
            OutboundEvent::EndSession {
                kind: SessionKind::Video,
                ..
            } => names::VIDEO_CHAT_ENDED,
            OutboundEvent::EndSession { .. } => names::END_CHAT,
            OutboundEvent::Send(request) => match request.body {
                SendBody::Text { .. } => names::SEND_MESSAGE,
                SendBody::Media { .. } => names::SEND_MEDIA,
            },
            OutboundEvent::Delivered { .. } => names::MESSAGE_DELIVERED,
            OutboundEvent::Read { .. } => names::MESSAGE_READ,
            OutboundEvent::Typing { typing: true, .. } => names::START_TYPING,
            OutboundEvent::Typing { typing: false, .. } => names::STOP_TYPING,
            OutboundEvent::Signal(_) => names::WEBRTC_SIGNAL,
            OutboundEvent::MediaReady { .. } => names::MEDIA_READY,
            OutboundEvent::Report { .. } => names::REPORT_USER,
            OutboundEvent::Block { .. } => names::BLOCK_USER,
        }
    }

    /// JSON payload.
    pub fn payload(&self) -> Value {
        use serde_json::json;

        match self {
            OutboundEvent::StartSearch(criteria) => json!(criteria),
            OutboundEvent::CancelSearch { kind } | OutboundEvent::RequestStatus { kind } => {
                json!({ "type": kind })
            }
            OutboundEvent::EndSession {
                session_id, reason, ..
            } => {
                json!({ "session_id": session_id, "reason": reason })
            }
            OutboundEvent::Send(request) => json!(request),
            OutboundEvent::Delivered {
                message_id,
                session_id,
            }
            | OutboundEvent::Read {
                message_id,
                session_id,
            } => json!({ "message_id": message_id, "session_id": session_id }),
            OutboundEvent::Typing { session_id, .. } | OutboundEvent::Block { session_id } => {
                json!({ "session_id": session_id })
            }
            OutboundEvent::Signal(signal) => json!(signal),
            OutboundEvent::MediaReady { media_type } => json!({ "media_type": media_type }),
            OutboundEvent::Report {
                session_id,
                reason,
                details,
            } => json!({
                "session_id": session_id,
                "reason": reason,
                "additional_info": details,
            }),
        }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Events the engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Search acknowledged.
    SearchStarted(QueueStatus),
    /// Queue metadata refresh.
    StatusUpdate(QueueStatus),
    /// Server-side cancel.
    SearchCancelled,
    /// Partner found.
    MatchFound(MatchFound),
    /// Session ended remotely.
    ChatEnded(ChatEnded),
    /// Partner transport dropped.
    PartnerDisconnected(SessionRef),
    /// Incoming message.
    Message {
        /// Server id.
        id: MessageId,
        /// Session.
        session_id: SessionId,
        /// Body.
        content: MessageContent,
    },
    /// Send confirmed.
    MessageAck(MessageAck),
    /// Delivery status.
    DeliveryStatus(DeliveryStatus),
    /// Send rejected.
    MessageRejected(MessageRejected),
    /// Partner typing indicator.
    PartnerTyping {
        /// Session.
        session_id: SessionId,
        /// Started or stopped.
        typing: bool,
    },
    /// Users online.
    OnlineCount(u32),
    /// Negotiation message.
    Signal(Signal),
    /// Partner's media is up.
    PartnerMediaReady(PartnerMediaReady),
    /// Report accepted.
    ReportSubmitted,
    /// Block applied.
    UserBlocked,
    /// Partner left, in the video and older vocabularies.
    PartnerLeft {
        /// Session, when the service tags it.
        session_id: Option<SessionId>,
        /// Reason code.
        reason: String,
    },
    /// The service reported a failure.
    ServiceError(String),
}

fn parse<T: DeserializeOwned>(name: &str, payload: Value) -> Result<T, EventError> {
    serde_json::from_value(payload).map_err(|source| EventError::Malformed {
        event: name.to_string(),
        source,
    })
}

/// Like [`parse`], but an absent payload reads as an empty object.
fn parse_optional<T: DeserializeOwned>(name: &str, payload: Value) -> Result<T, EventError> {
    match payload {
        Value::Null => parse(name, Value::Object(Default::default())),
        payload => parse(name, payload),
    }
}

impl InboundEvent {
    /// Decode a named wire event.
    pub fn decode(name: &str, payload: Value) -> Result<Self, EventError> {
        let event = match name {
            names::SEARCH_STARTED => InboundEvent::SearchStarted(parse(name, payload)?),
            names::STATUS_UPDATE => InboundEvent::StatusUpdate(parse(name, payload)?),
            names::VIDEO_SEARCH_STARTED | names::SEARCHING => {
                let loose: LooseQueueStatus = parse_optional(name, payload)?;
                InboundEvent::SearchStarted(loose.into())
            }
            names::SEARCH_CANCELLED | names::VIDEO_SEARCH_CANCELLED => {
                InboundEvent::SearchCancelled
            }
            names::MATCH_FOUND => InboundEvent::MatchFound(parse(name, payload)?),
            names::VIDEO_MATCH_FOUND | names::LEGACY_MATCH_FOUND => {
                let loose: LooseMatchFound = parse(name, payload)?;
                InboundEvent::MatchFound(loose.into())
            }
            names::VIDEO_CHAT_ENDED | names::PARTNER_LEFT => {
                let left: PartnerLeft = parse_optional(name, payload)?;
                InboundEvent::PartnerLeft {
                    session_id: left.session_id,
                    reason: left.reason.unwrap_or_else(|| "partner_left".to_string()),
                }
            }
            names::SERVICE_ERROR => {
                let err: ServiceError = parse_optional(name, payload)?;
                InboundEvent::ServiceError(
                    err.message.unwrap_or_else(|| "service error".to_string()),
                )
            }
            names::CHAT_ENDED => InboundEvent::ChatEnded(parse(name, payload)?),
            names::PARTNER_DISCONNECTED => {
                InboundEvent::PartnerDisconnected(parse(name, payload)?)
            }
            names::NEW_MESSAGE => {
                let msg: NewMessage = parse(name, payload)?;
                InboundEvent::Message {
                    id: msg.id,
                    session_id: msg.session_id,
                    content: MessageContent::Text(msg.content),
                }
            }
            names::MEDIA_MESSAGE => {
                let msg: MediaMessage = parse(name, payload)?;
                InboundEvent::Message {
                    id: msg.id,
                    session_id: msg.session_id,
                    content: MessageContent::Media(MediaAttachment::new(
                        msg.file_name,
                        msg.file_type,
                        msg.file_data,
                    )),
                }
            }
            names::MESSAGE_SENT | names::MEDIA_SENT => {
                InboundEvent::MessageAck(parse(name, payload)?)
            }
            names::DELIVERY_STATUS => InboundEvent::DeliveryStatus(parse(name, payload)?),
            names::MESSAGE_ERROR | names::MEDIA_ERROR => {
                InboundEvent::MessageRejected(parse(name, payload)?)
            }
            names::PARTNER_TYPING | names::PARTNER_STOPPED_TYPING => {
                let SessionRef { session_id } = parse(name, payload)?;
                InboundEvent::PartnerTyping {
                    session_id,
                    typing: name == names::PARTNER_TYPING,
                }
            }
            names::ONLINE_COUNT => {
                let OnlineCount { count } = parse(name, payload)?;
                InboundEvent::OnlineCount(count)
            }
            names::WEBRTC_SIGNAL => InboundEvent::Signal(parse(name, payload)?),
            names::PARTNER_MEDIA_READY => InboundEvent::PartnerMediaReady(parse(name, payload)?),
            names::REPORT_SUBMITTED => InboundEvent::ReportSubmitted,
            names::USER_BLOCKED => InboundEvent::UserBlocked,
            other => return Err(EventError::Unknown(other.to_string())),
        };
        Ok(event)
    }

    /// Session the event is scoped to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            InboundEvent::MatchFound(m) => Some(&m.session_id),
            InboundEvent::ChatEnded(e) => Some(&e.session_id),
            InboundEvent::PartnerDisconnected(r) => Some(&r.session_id),
            InboundEvent::Message { session_id, .. }
            | InboundEvent::PartnerTyping { session_id, .. } => Some(session_id),
            InboundEvent::Signal(s) => Some(&s.session_id),
            InboundEvent::PartnerMediaReady(p) => p.session_id.as_ref(),
            InboundEvent::PartnerLeft { session_id, .. } => session_id.as_ref(),
            _ => None,
        }
    }
}
