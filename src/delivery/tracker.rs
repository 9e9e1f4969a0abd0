//! Per-message delivery state.
//!
//! Every outbound message is keyed by its provisional id from creation until
//! the session ends. The server's confirmation joins the permanent id onto
//! that entry, after which status updates may name either id. Inbound
//! messages are remembered by id so duplicates and receipts are handled once.

use std::collections::HashMap;
use std::time::SystemTime;

use tracing::{debug, warn};

use super::message::{InboundMessage, MessageContent, MessageStatus, OutboundMessage};
use super::queue::OfflineQueue;
use crate::core::{EngineError, MessageId, SessionId, StaleRef, TempId};
use crate::transport::{DeliveryStatus, MessageAck, MessageRejected, SendBody, SendRequest};

/// A status change to report for one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Provisional id the caller knows the message by.
    pub temp_id: TempId,
    /// New status.
    pub status: MessageStatus,
}

/// Receipts owed for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Receipts {
    /// Send `message_delivered`.
    pub delivered: bool,
    /// Send `message_read`.
    pub read: bool,
}

/// Outbound message table, offline queue and inbound dedup set.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    outbound: HashMap<TempId, OutboundMessage>,
    permanent: HashMap<MessageId, TempId>,
    inbound: HashMap<MessageId, InboundMessage>,
    queue: OfflineQueue,
}

impl DeliveryTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Pending` message and the request that transmits it.
    pub fn prepare(&mut self, session_id: SessionId, content: MessageContent) -> SendRequest {
        let message = OutboundMessage::new(session_id, content);
        let request = SendRequest {
            session_id: message.session_id.clone(),
            temp_id: message.temp_id.clone(),
            body: SendBody::from(&message.content),
        };
        debug!(
            target: "duet.delivery",
            temp_id = %message.temp_id,
            kind = ?message.kind(),
            "message pending"
        );
        self.outbound.insert(message.temp_id.clone(), message);
        request
    }

    /// Offline queue.
    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Offline queue, mutably.
    pub fn queue_mut(&mut self) -> &mut OfflineQueue {
        &mut self.queue
    }

    /// Hold a request until the transport is back.
    pub fn enqueue(&mut self, request: SendRequest) {
        debug!(
            target: "duet.delivery",
            temp_id = %request.temp_id,
            queued = self.queue.len() + 1,
            "transport down; message queued"
        );
        self.queue.push(request);
    }

    /// Tracked outbound message.
    pub fn message(&self, temp_id: &TempId) -> Option<&OutboundMessage> {
        self.outbound.get(temp_id)
    }

    /// Status of a tracked outbound message.
    pub fn status(&self, temp_id: &TempId) -> Option<MessageStatus> {
        self.outbound.get(temp_id).map(|m| m.status)
    }

    /// Number of tracked outbound messages.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Received message by id.
    pub fn inbound(&self, id: &MessageId) -> Option<&InboundMessage> {
        self.inbound.get(id)
    }

    fn advance(
        &mut self,
        temp_id: &TempId,
        status: MessageStatus,
    ) -> Result<Option<StatusChange>, EngineError> {
        let message = self
            .outbound
            .get_mut(temp_id)
            .ok_or_else(|| EngineError::StaleEventDiscarded(StaleRef::Message(temp_id.to_string())))?;

        if !message.status.can_advance_to(status) {
            debug!(
                target: "duet.delivery",
                temp_id = %temp_id,
                from = ?message.status,
                to = ?status,
                "status update does not advance; ignored"
            );
            return Ok(None);
        }
        message.status = status;
        debug!(target: "duet.delivery", temp_id = %temp_id, status = ?status, "message status");
        Ok(Some(StatusChange {
            temp_id: temp_id.clone(),
            status,
        }))
    }

    /// Server accepted a send.
    pub fn on_ack(&mut self, ack: MessageAck) -> Result<Option<StatusChange>, EngineError> {
        let message = self
            .outbound
            .get_mut(&ack.temp_id)
            .ok_or_else(|| EngineError::StaleEventDiscarded(StaleRef::Message(ack.temp_id.to_string())))?;
        if message.permanent_id.is_none() {
            message.permanent_id = Some(ack.message_id.clone());
            self.permanent.insert(ack.message_id, ack.temp_id.clone());
        }
        self.advance(&ack.temp_id, MessageStatus::Sent)
    }

    /// Status update keyed by permanent or provisional id.
    pub fn on_status(&mut self, update: DeliveryStatus) -> Result<Option<StatusChange>, EngineError> {
        let temp_id = self.resolve(&update.message_id).ok_or_else(|| {
            EngineError::StaleEventDiscarded(StaleRef::Message(update.message_id.clone()))
        })?;
        let change = self.advance(&temp_id, update.status)?;
        if matches!(&change, Some(c) if c.status == MessageStatus::Failed) {
            warn!(target: "duet.delivery", temp_id = %temp_id, "delivery failed");
        }
        Ok(change)
    }

    /// Server rejected a send.
    pub fn on_rejected(
        &mut self,
        rejected: MessageRejected,
    ) -> Result<Option<StatusChange>, EngineError> {
        warn!(
            target: "duet.delivery",
            temp_id = %rejected.temp_id,
            error = rejected.error.as_deref().unwrap_or("unspecified"),
            "message rejected"
        );
        self.advance(&rejected.temp_id, MessageStatus::Failed)
    }

    fn resolve(&self, id: &str) -> Option<TempId> {
        let permanent = MessageId::new(id);
        if let Some(temp_id) = self.permanent.get(&permanent) {
            return Some(temp_id.clone());
        }
        let temp_id = TempId::new(id);
        self.outbound.contains_key(&temp_id).then_some(temp_id)
    }

    /// Record an inbound message.
    ///
    /// Returns `None` for a duplicate id. Otherwise returns the message and
    /// the receipts owed for it; `auto_read` marks it read on first sight.
    pub fn on_inbound(
        &mut self,
        id: MessageId,
        session_id: SessionId,
        content: MessageContent,
        auto_read: bool,
    ) -> Option<(InboundMessage, Receipts)> {
        if self.inbound.contains_key(&id) {
            debug!(target: "duet.delivery", message_id = %id, "duplicate inbound message");
            return None;
        }
        let message = InboundMessage {
            id: id.clone(),
            session_id,
            content,
            received_at: SystemTime::now(),
            read_acknowledged: auto_read,
        };
        self.inbound.insert(id, message.clone());
        Some((
            message,
            Receipts {
                delivered: true,
                read: auto_read,
            },
        ))
    }

    /// Mark an inbound message read.
    ///
    /// Returns `true` the first time, when a read receipt is owed.
    pub fn mark_read(&mut self, id: &MessageId) -> Result<bool, EngineError> {
        let message = self
            .inbound
            .get_mut(id)
            .ok_or_else(|| EngineError::StaleEventDiscarded(StaleRef::Message(id.to_string())))?;
        if message.read_acknowledged {
            return Ok(false);
        }
        message.read_acknowledged = true;
        Ok(true)
    }

    /// Forget everything belonging to the ended session.
    pub fn clear(&mut self) {
        if !self.queue.is_empty() {
            debug!(
                target: "duet.delivery",
                dropped = self.queue.len(),
                "dropping queued messages of ended session"
            );
        }
        self.outbound.clear();
        self.permanent.clear();
        self.inbound.clear();
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sid() -> SessionId {
        SessionId::new("s1")
    }

    fn text(body: &str) -> MessageContent {
        MessageContent::Text(body.to_string())
    }

    fn ack(temp_id: &TempId, id: &str) -> MessageAck {
        MessageAck {
            temp_id: temp_id.clone(),
            message_id: MessageId::new(id),
        }
    }

    #[test]
    fn test_ack_moves_to_sent() {
        let mut tracker = DeliveryTracker::new();
        let request = tracker.prepare(sid(), text("hi"));
        assert_eq!(tracker.status(&request.temp_id), Some(MessageStatus::Pending));

        let change = tracker.on_ack(ack(&request.temp_id, "m1")).unwrap().unwrap();
        assert_eq!(change.status, MessageStatus::Sent);
        assert_eq!(
            tracker.message(&request.temp_id).unwrap().permanent_id,
            Some(MessageId::new("m1"))
        );
    }

    #[test]
    fn test_status_by_permanent_or_temp_id() {
        let mut tracker = DeliveryTracker::new();
        let a = tracker.prepare(sid(), text("a")).temp_id;
        let b = tracker.prepare(sid(), text("b")).temp_id;
        tracker.on_ack(ack(&a, "m1")).unwrap();

        let by_permanent = DeliveryStatus {
            message_id: "m1".into(),
            status: MessageStatus::Delivered,
        };
        assert_eq!(
            tracker.on_status(by_permanent).unwrap().unwrap().temp_id,
            a.clone()
        );

        let by_temp = DeliveryStatus {
            message_id: b.to_string(),
            status: MessageStatus::Read,
        };
        assert_eq!(tracker.on_status(by_temp).unwrap().unwrap().status, MessageStatus::Read);
        assert_eq!(tracker.status(&a), Some(MessageStatus::Delivered));
    }

    #[test]
    fn test_unknown_ack_is_stale() {
        let mut tracker = DeliveryTracker::new();
        let err = tracker.on_ack(ack(&TempId::new("t-x"), "m9")).unwrap_err();
        assert!(err.is_silent());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut tracker = DeliveryTracker::new();
        let temp_id = tracker.prepare(sid(), text("hi")).temp_id;
        let rejected = MessageRejected {
            temp_id: temp_id.clone(),
            error: Some("too long".into()),
        };
        assert_eq!(
            tracker.on_rejected(rejected).unwrap().unwrap().status,
            MessageStatus::Failed
        );

        // A late ack does not resurrect the message.
        assert!(tracker.on_ack(ack(&temp_id, "m1")).unwrap().is_none());
        assert_eq!(tracker.status(&temp_id), Some(MessageStatus::Failed));
    }

    #[test]
    fn test_read_overtaking_ack_is_not_undone() {
        let mut tracker = DeliveryTracker::new();
        let temp_id = tracker.prepare(sid(), text("hi")).temp_id;
        tracker
            .on_status(DeliveryStatus {
                message_id: temp_id.to_string(),
                status: MessageStatus::Read,
            })
            .unwrap();
        assert!(tracker.on_ack(ack(&temp_id, "m1")).unwrap().is_none());
        assert_eq!(tracker.status(&temp_id), Some(MessageStatus::Read));
    }

    #[test]
    fn test_inbound_dedup_and_single_read_receipt() {
        let mut tracker = DeliveryTracker::new();
        let (_, receipts) = tracker
            .on_inbound(MessageId::new("m1"), sid(), text("yo"), false)
            .unwrap();
        assert_eq!(
            receipts,
            Receipts {
                delivered: true,
                read: false
            }
        );
        assert!(tracker
            .on_inbound(MessageId::new("m1"), sid(), text("yo"), false)
            .is_none());

        assert!(tracker.mark_read(&MessageId::new("m1")).unwrap());
        assert!(!tracker.mark_read(&MessageId::new("m1")).unwrap());
        assert!(tracker.inbound(&MessageId::new("m1")).unwrap().read_acknowledged);
    }

    #[test]
    fn test_clear_forgets_session() {
        let mut tracker = DeliveryTracker::new();
        let request = tracker.prepare(sid(), text("hi"));
        tracker.enqueue(request);
        tracker.on_inbound(MessageId::new("m1"), sid(), text("yo"), true);

        tracker.clear();
        assert_eq!(tracker.outbound_len(), 0);
        assert!(tracker.queue().is_empty());
        assert!(tracker.inbound(&MessageId::new("m1")).is_none());
    }

    fn status_strategy() -> impl Strategy<Value = MessageStatus> {
        prop_oneof![
            Just(MessageStatus::Sent),
            Just(MessageStatus::Delivered),
            Just(MessageStatus::Read),
            Just(MessageStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn test_reported_changes_follow_lattice(updates in proptest::collection::vec(status_strategy(), 0..16)) {
            let mut tracker = DeliveryTracker::new();
            let temp_id = tracker.prepare(sid(), text("hi")).temp_id;
            let mut last = MessageStatus::Pending;

            for status in updates {
                let update = DeliveryStatus { message_id: temp_id.to_string(), status };
                if let Some(change) = tracker.on_status(update).unwrap() {
                    prop_assert!(last.can_advance_to(change.status));
                    last = change.status;
                }
            }
            prop_assert_eq!(tracker.status(&temp_id), Some(last));
        }
    }
}
