//! Inbound events from the transport and callbacks from the peer connection.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use super::instance::Engine;
use super::notification::Notification;
use crate::core::constants::REASON_SEARCH_CANCELLED;
use crate::core::{
    EngineError, EngineResult, IceCandidate, MediaSource, Observer, PeerConnection, PeerPhase,
    SessionId, StaleRef, Transport,
};
use crate::delivery::{MessageStatus, StatusChange};
use crate::negotiation::PhaseAction;
use crate::session::{MatchOutcome, SessionStatus};
use crate::transport::{InboundEvent, OutboundEvent, Signal, TimerKind, TimerScope};

impl<T, M, P, O> Engine<T, M, P, O>
where
    T: Transport,
    M: MediaSource,
    P: PeerConnection,
    O: Observer,
{
    /// Process one named wire event.
    ///
    /// Stale events are logged and swallowed; decode failures and conditions
    /// the caller should see are returned.
    pub fn handle_event(&mut self, name: &str, payload: Value, now: Instant) -> EngineResult<()> {
        self.ensure_live()?;
        let event = InboundEvent::decode(name, payload).inspect_err(|err| {
            warn!(target: "duet.engine", event = name, %err, "undecodable event");
        })?;
        match self.dispatch(event, now) {
            Err(err) if err.is_silent() => {
                debug!(target: "duet.engine", event = name, %err, "discarded");
                Ok(())
            }
            other => other,
        }
    }

    fn current(&self, session_id: &SessionId) -> EngineResult<()> {
        if self.session.is_current(session_id) {
            Ok(())
        } else {
            Err(EngineError::StaleEventDiscarded(StaleRef::Session(
                session_id.clone(),
            )))
        }
    }

    fn report_change(&mut self, change: Option<StatusChange>) {
        let Some(StatusChange { temp_id, status }) = change else {
            return;
        };
        if status == MessageStatus::Failed {
            let err = EngineError::DeliveryFailed {
                temp_id: temp_id.clone(),
            };
            warn!(target: "duet.delivery", %err, "message not delivered");
        }
        self.notify(Notification::MessageStatusChanged { temp_id, status });
    }

    fn dispatch(&mut self, event: InboundEvent, now: Instant) -> EngineResult<()> {
        match event {
            InboundEvent::SearchStarted(queue) | InboundEvent::StatusUpdate(queue) => {
                let queue = self.session.on_queue_status(queue)?;
                self.notify(Notification::QueueUpdate {
                    position: queue.position,
                    total_waiting: queue.total_waiting,
                    estimated_wait_seconds: queue.estimated_wait_seconds,
                });
            }
            InboundEvent::SearchCancelled => {
                if self.session.status() != SessionStatus::Searching {
                    return Err(EngineError::StaleEventDiscarded(StaleRef::State(
                        "search cancel while not searching",
                    )));
                }
                self.session.cancel_search()?;
                self.flush_transitions();
            }
            InboundEvent::MatchFound(found) => match self.session.on_match(found)? {
                MatchOutcome::Accepted => self.on_session_active(now)?,
                MatchOutcome::Duplicate => {}
                MatchOutcome::Declined(session_id) => {
                    let kind = self.session.criteria().map(|c| c.kind).unwrap_or_default();
                    self.emit_or_drop(OutboundEvent::EndSession {
                        session_id,
                        kind,
                        reason: REASON_SEARCH_CANCELLED.to_string(),
                    });
                }
            },
            InboundEvent::ChatEnded(ended) => {
                self.current(&ended.session_id)?;
                self.pending_next = None;
                self.teardown(&ended.reason(), true, false, false)?;
            }
            InboundEvent::PartnerLeft { session_id, reason } => {
                match &session_id {
                    Some(id) => self.current(id)?,
                    None if self.session.status().has_session() => {}
                    None => {
                        return Err(EngineError::StaleEventDiscarded(StaleRef::State(
                            "partner left without a session",
                        )));
                    }
                }
                self.pending_next = None;
                self.teardown(&reason, true, false, false)?;
            }
            InboundEvent::ServiceError(message) => {
                warn!(target: "duet.engine", %message, "service reported an error");
                self.notify(Notification::ServiceError { message });
            }
            InboundEvent::PartnerDisconnected(r) => {
                self.current(&r.session_id)?;
                self.notify(Notification::PartnerDisconnected);
            }
            InboundEvent::Message {
                id,
                session_id,
                content,
            } => {
                self.current(&session_id)?;
                let auto_read = self.config.auto_read_receipts;
                let Some((message, receipts)) =
                    self.delivery
                        .on_inbound(id.clone(), session_id.clone(), content, auto_read)
                else {
                    return Ok(());
                };
                self.notify(Notification::InboundMessage(message));
                if receipts.delivered {
                    self.emit_or_drop(OutboundEvent::Delivered {
                        message_id: id.clone(),
                        session_id: session_id.clone(),
                    });
                }
                if receipts.read {
                    self.emit_or_drop(OutboundEvent::Read {
                        message_id: id,
                        session_id,
                    });
                }
            }
            InboundEvent::MessageAck(ack) => {
                let change = self.delivery.on_ack(ack)?;
                self.report_change(change);
            }
            InboundEvent::DeliveryStatus(update) => {
                let change = self.delivery.on_status(update)?;
                self.report_change(change);
            }
            InboundEvent::MessageRejected(rejected) => {
                let change = self.delivery.on_rejected(rejected)?;
                self.report_change(change);
            }
            InboundEvent::PartnerTyping { session_id, typing } => {
                self.current(&session_id)?;
                self.notify(Notification::PartnerTyping(typing));
            }
            InboundEvent::OnlineCount(count) => self.notify(Notification::OnlineCount(count)),
            InboundEvent::Signal(signal) => self.on_signal(signal)?,
            InboundEvent::PartnerMediaReady(ready) => {
                match (&ready.session_id, self.session.active_session_id()) {
                    (Some(id), _) => self.current(id)?,
                    (None, Some(_)) => {}
                    (None, None) => {
                        return Err(EngineError::StaleEventDiscarded(StaleRef::State(
                            "partner media without a session",
                        )));
                    }
                }
                self.notify(Notification::PartnerMediaReady {
                    media_type: ready.media_type,
                });
            }
            InboundEvent::ReportSubmitted => self.notify(Notification::ReportSubmitted),
            InboundEvent::UserBlocked => self.notify(Notification::UserBlocked),
        }
        Ok(())
    }

    fn on_session_active(&mut self, now: Instant) -> EngineResult<()> {
        self.flush_transitions();
        let Some(session) = self.session.session().cloned() else {
            return Ok(());
        };
        self.notify(Notification::MatchFound(session.clone()));
        if session.kind.has_media() {
            if let Err(err) = self.start_media(&session, now) {
                self.negotiation_failed(&err.to_string());
                return Ok(());
            }
        }
        self.drain_offline();
        Ok(())
    }

    fn on_signal(&mut self, signal: Signal) -> EngineResult<()> {
        self.current(&signal.session_id)?;
        let Some(negotiation) = self.negotiation.as_mut() else {
            return Err(EngineError::StaleEventDiscarded(StaleRef::State(
                "signal for a session without media",
            )));
        };
        let before = negotiation.phase();
        let reply = match negotiation.on_signal(&mut self.peer, signal.body) {
            Ok(reply) => reply,
            Err(EngineError::Media(err)) => {
                self.negotiation_failed(&err.to_string());
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let after = negotiation.phase();
        if let Some(reply) = reply {
            self.emit_or_drop(OutboundEvent::Signal(reply));
        }
        if before != after {
            self.notify(Notification::NegotiationPhaseChanged(after));
        }
        Ok(())
    }

    /// The peer connection discovered a local candidate.
    ///
    /// `generation` is the value passed to [`PeerConnection::open`]; callbacks
    /// from an earlier session are ignored.
    pub fn on_local_candidate(&mut self, generation: u64, candidate: IceCandidate) {
        if self.disposed || generation != self.session.generation() {
            debug!(target: "duet.negotiation", generation, "stale local candidate");
            return;
        }
        let Some(negotiation) = self.negotiation.as_ref() else {
            return;
        };
        let signal = negotiation.local_candidate(candidate);
        self.emit_or_drop(OutboundEvent::Signal(signal));
    }

    /// The peer connection changed phase.
    pub fn on_peer_phase(&mut self, generation: u64, phase: PeerPhase, now: Instant) {
        if self.disposed || generation != self.session.generation() {
            debug!(target: "duet.negotiation", generation, ?phase, "stale peer phase");
            return;
        }
        let Some(negotiation) = self.negotiation.as_mut() else {
            return;
        };
        let before = negotiation.phase();
        let action = negotiation.on_peer_phase(phase);
        let after = negotiation.phase();
        if before != after {
            self.notify(Notification::NegotiationPhaseChanged(after));
        }

        match action {
            PhaseAction::None => {}
            PhaseAction::Recovered => {
                self.timers.cancel_kind(TimerKind::NegotiationGrace);
                self.timers.cancel_kind(TimerKind::HandshakeTimeout);
            }
            PhaseAction::Degraded => {
                self.timers.schedule(
                    TimerKind::NegotiationGrace,
                    TimerScope::Session(self.session.generation()),
                    now,
                    self.config.negotiation_grace,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use crate::core::{EngineConfig, EngineConfigBuilder, Role, SearchCriteria, SessionKind, TempId};
    use crate::delivery::MessageStatus;
    use crate::engine::FatalKind;
    use crate::engine::test_support::{
        PeerCall, connected_engine, match_payload, media_session, search_and_match,
    };
    use crate::negotiation::NegotiationPhase;
    use crate::transport::names;

    #[test]
    fn test_search_ack_then_match() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine
            .start_search(SearchCriteria::new(SessionKind::Text))
            .unwrap();
        engine
            .handle_event(
                names::SEARCH_STARTED,
                json!({"position": 3, "total": 10, "eta": 15}),
                now,
            )
            .unwrap();
        assert!(engine.observer().contains(&Notification::QueueUpdate {
            position: 3,
            total_waiting: 10,
            estimated_wait_seconds: 15,
        }));
        assert_eq!(engine.status(), SessionStatus::Searching);

        engine
            .handle_event(names::MATCH_FOUND, match_payload("s1", true), now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Active);
        let session = engine.session().unwrap();
        assert!(session.started_at.is_some());
        assert_eq!(session.role, Role::Offerer);
        assert_eq!(session.partner_id.as_str(), "p1");
    }

    #[test]
    fn test_duplicate_match_ignored() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);
        let generation = engine.generation();

        engine
            .handle_event(names::MATCH_FOUND, match_payload("s2", false), now)
            .unwrap();
        assert_eq!(engine.session().unwrap().session_id, SessionId::new("s1"));
        assert_eq!(engine.generation(), generation);
    }

    #[test]
    fn test_match_after_cancel_is_declined() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine.start_search(SearchCriteria::default()).unwrap();
        engine.cancel_search().unwrap();

        engine
            .handle_event(names::MATCH_FOUND, match_payload("s7", true), now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert_eq!(
            engine.transport().last_named(names::END_CHAT).unwrap(),
            json!({"session_id": "s7", "reason": "search_cancelled"})
        );
    }

    #[test]
    fn test_ack_moves_offline_message_to_sent() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);

        engine.transport_mut().connected = false;
        engine.on_disconnected(crate::transport::DisconnectReason::ServerInitiated, now);
        let temp_id = engine.send_message("hi").unwrap();
        assert_eq!(engine.queued_messages(), 1);

        engine.poll_timers(now + Duration::from_secs(1));
        engine.transport_mut().connected = true;
        engine.on_connected();
        engine
            .handle_event(
                names::MESSAGE_SENT,
                json!({"temp_id": temp_id.as_str(), "message_id": "m1"}),
                now,
            )
            .unwrap();
        assert_eq!(engine.message_status(&temp_id), Some(MessageStatus::Sent));

        engine
            .handle_event(names::DELIVERY_STATUS, json!({"message_id": "m1", "status": "read"}), now)
            .unwrap();
        assert_eq!(engine.message_status(&temp_id), Some(MessageStatus::Read));
        assert!(engine
            .observer()
            .contains(&Notification::MessageStatusChanged {
                temp_id,
                status: MessageStatus::Read
            }));
    }

    #[test]
    fn test_message_error_fails_without_retry() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);
        let temp_id = engine.send_message("hi").unwrap();

        engine
            .handle_event(
                names::MESSAGE_ERROR,
                json!({"temp_id": temp_id.as_str(), "error": "rate limited"}),
                now,
            )
            .unwrap();
        assert_eq!(engine.message_status(&temp_id), Some(MessageStatus::Failed));
        assert_eq!(engine.transport().named(names::SEND_MESSAGE).len(), 1);
    }

    #[test]
    fn test_unknown_ack_is_swallowed() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);
        let before = engine.observer().len();
        engine
            .handle_event(
                names::MESSAGE_SENT,
                json!({"temp_id": TempId::new("tmp-gone").as_str(), "message_id": "m9"}),
                now,
            )
            .unwrap();
        assert_eq!(engine.observer().len(), before);
    }

    #[test]
    fn test_duplicate_inbound_acknowledged_once() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", false);

        let payload = json!({"id": "m1", "session_id": "s1", "content": "hey"});
        engine
            .handle_event(names::NEW_MESSAGE, payload.clone(), now)
            .unwrap();
        engine.handle_event(names::NEW_MESSAGE, payload, now).unwrap();

        let inbound = engine
            .observer()
            .iter()
            .filter(|n| matches!(n, Notification::InboundMessage(_)))
            .count();
        assert_eq!(inbound, 1);
        assert_eq!(engine.transport().named(names::MESSAGE_READ).len(), 1);
        assert_eq!(engine.transport().named(names::MESSAGE_DELIVERED).len(), 1);

        engine.mark_read(&crate::core::MessageId::new("m1")).unwrap();
        assert_eq!(engine.transport().named(names::MESSAGE_READ).len(), 1);
    }

    #[test]
    fn test_manual_read_receipts() {
        let now = Instant::now();
        let config = EngineConfigBuilder::new()
            .auto_read_receipts(false)
            .build()
            .unwrap();
        let mut engine = connected_engine(config, now);
        search_and_match(&mut engine, "s1", false);
        engine
            .handle_event(
                names::NEW_MESSAGE,
                json!({"id": "m1", "session_id": "s1", "content": "hey"}),
                now,
            )
            .unwrap();
        assert!(engine.transport().named(names::MESSAGE_READ).is_empty());

        let id = crate::core::MessageId::new("m1");
        engine.mark_read(&id).unwrap();
        engine.mark_read(&id).unwrap();
        assert_eq!(engine.transport().named(names::MESSAGE_READ).len(), 1);
    }

    #[test]
    fn test_events_for_other_sessions_discarded() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);

        engine
            .handle_event(names::CHAT_ENDED, json!({"session_id": "old"}), now)
            .unwrap();
        engine
            .handle_event(
                names::NEW_MESSAGE,
                json!({"id": "m1", "session_id": "old", "content": "late"}),
                now,
            )
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Active);
        assert!(!engine
            .observer()
            .iter()
            .any(|n| matches!(n, Notification::InboundMessage(_))));
    }

    #[test]
    fn test_partner_left_cleans_up() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);
        engine
            .handle_event(
                names::CHAT_ENDED,
                json!({"session_id": "s1", "partner_left": true}),
                now,
            )
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert!(engine.observer().contains(&Notification::SessionEnded {
            session_id: SessionId::new("s1"),
            reason: "partner_left".into(),
            by_peer: true,
        }));
        // Peer-initiated end does not echo end_chat.
        assert!(engine.transport().last_named(names::END_CHAT).is_none());
    }

    #[test]
    fn test_server_cancel_returns_to_idle() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine.start_search(SearchCriteria::default()).unwrap();
        engine
            .handle_event(names::SEARCH_CANCELLED, json!({}), now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_unknown_event_is_error() {
        let mut engine = connected_engine(EngineConfig::default(), Instant::now());
        assert!(matches!(
            engine.handle_event("rematch", json!({}), Instant::now()),
            Err(EngineError::Event(_))
        ));
    }

    #[test]
    fn test_presence_and_typing_notifications() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine
            .handle_event(names::ONLINE_COUNT, json!({"count": 42}), now)
            .unwrap();
        search_and_match(&mut engine, "s1", true);
        engine
            .handle_event(names::PARTNER_TYPING, json!({"session_id": "s1"}), now)
            .unwrap();
        engine
            .handle_event(names::PARTNER_DISCONNECTED, json!({"session_id": "s1"}), now)
            .unwrap();

        let observed = engine.observer();
        assert!(observed.contains(&Notification::OnlineCount(42)));
        assert!(observed.contains(&Notification::PartnerTyping(true)));
        assert!(observed.contains(&Notification::PartnerDisconnected));
        assert_eq!(engine.status(), SessionStatus::Active);
    }

    // -------------------------------------------------------------------------
    // Media sessions
    // -------------------------------------------------------------------------

    #[test]
    fn test_offerer_flow() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Video, "s1", true, now);

        assert_eq!(engine.negotiation().unwrap().role(), Role::Offerer);
        assert_eq!(
            engine.transport().last_named(names::MEDIA_READY).unwrap(),
            json!({"media_type": "both"})
        );
        let offer = engine.transport().last_named(names::WEBRTC_SIGNAL).unwrap();
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["session_id"], "s1");

        let generation = engine.generation();
        engine.on_local_candidate(generation, IceCandidate::new("candidate:1"));
        engine.on_local_candidate(generation - 1, IceCandidate::new("candidate:old"));
        let signals = engine.transport().named(names::WEBRTC_SIGNAL);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[1]["candidate"]["candidate"], "candidate:1");

        engine
            .handle_event(
                names::WEBRTC_SIGNAL,
                json!({"session_id": "s1", "type": "answer", "answer": {"type": "answer", "sdp": "v=0"}}),
                now,
            )
            .unwrap();
        assert!(engine.negotiation().unwrap().remote_description_set());
        assert!(engine
            .observer()
            .contains(&Notification::NegotiationPhaseChanged(NegotiationPhase::Connecting)));
    }

    #[test]
    fn test_answerer_applies_held_candidates_in_order() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Audio, "s1", false, now);
        assert!(engine.transport().named(names::WEBRTC_SIGNAL).is_empty());

        for n in 1..=2 {
            engine
                .handle_event(
                    names::WEBRTC_SIGNAL,
                    json!({"session_id": "s1", "type": "ice_candidate",
                           "candidate": {"candidate": format!("candidate:{n}")}}),
                    now,
                )
                .unwrap();
        }
        engine
            .handle_event(
                names::WEBRTC_SIGNAL,
                json!({"session_id": "s1", "type": "offer", "offer": {"type": "offer", "sdp": "v=0"}}),
                now,
            )
            .unwrap();

        let applied = engine.peer().applied_candidates();
        assert_eq!(
            applied,
            vec![IceCandidate::new("candidate:1"), IceCandidate::new("candidate:2")]
        );
        let answer = engine.transport().last_named(names::WEBRTC_SIGNAL).unwrap();
        assert_eq!(answer["type"], "answer");
    }

    #[test]
    fn test_stale_signal_never_touches_negotiation() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Video, "s1", false, now);

        engine
            .handle_event(
                names::WEBRTC_SIGNAL,
                json!({"session_id": "s0", "type": "offer", "offer": {"type": "offer", "sdp": "v=0"}}),
                now,
            )
            .unwrap();
        engine
            .handle_event(
                names::WEBRTC_SIGNAL,
                json!({"session_id": "s0", "type": "ice_candidate", "candidate": {"candidate": "c"}}),
                now,
            )
            .unwrap();
        let negotiation = engine.negotiation().unwrap();
        assert!(!negotiation.remote_description_set());
        assert_eq!(negotiation.pending_ice(), 0);
    }

    #[test]
    fn test_transient_dip_within_grace_survives() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Video, "s1", true, now);
        let generation = engine.generation();

        engine.on_peer_phase(generation, PeerPhase::Connected, now);
        engine.on_peer_phase(generation, PeerPhase::Disconnected, now);
        engine.on_peer_phase(generation, PeerPhase::Connected, now + Duration::from_millis(1500));
        engine.poll_timers(now + Duration::from_secs(3));

        assert_eq!(engine.status(), SessionStatus::Active);
        assert_eq!(
            engine.negotiation().unwrap().phase(),
            NegotiationPhase::Connected
        );
    }

    #[test]
    fn test_dip_beyond_grace_is_partner_loss() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Video, "s1", true, now);
        let generation = engine.generation();

        engine.on_peer_phase(generation, PeerPhase::Connected, now);
        engine.on_peer_phase(generation, PeerPhase::Failed, now);
        engine.poll_timers(now + Duration::from_millis(1999));
        assert_eq!(engine.status(), SessionStatus::Active);

        engine.poll_timers(now + Duration::from_secs(2));
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert!(engine.negotiation().is_none());
        assert!(engine.observer().iter().any(|n| matches!(
            n,
            Notification::FatalError {
                kind: FatalKind::NegotiationFailed,
                ..
            }
        )));
        assert!(engine.observer().contains(&Notification::SessionEnded {
            session_id: SessionId::new("s1"),
            reason: "negotiation_failed".into(),
            by_peer: true,
        }));
        assert_eq!(engine.peer().calls.last(), Some(&PeerCall::Close));
        assert_eq!(engine.media().released.len(), 1);
    }

    #[test]
    fn test_grace_timer_of_ended_session_is_noop() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Video, "s1", true, now);
        let old = engine.generation();
        engine.on_peer_phase(old, PeerPhase::Connected, now);
        engine.on_peer_phase(old, PeerPhase::Disconnected, now);
        engine.end_session("user_left").unwrap();

        media_session(&mut engine, SessionKind::Video, "s2", true, now);
        engine.on_peer_phase(old, PeerPhase::Failed, now);
        engine.poll_timers(now + Duration::from_secs(3));
        assert_eq!(engine.status(), SessionStatus::Active);
        assert_eq!(engine.session().unwrap().session_id, SessionId::new("s2"));
    }

    #[test]
    fn test_handshake_timeout() {
        let now = Instant::now();
        let config = EngineConfigBuilder::new()
            .handshake_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let mut engine = connected_engine(config, now);
        media_session(&mut engine, SessionKind::Audio, "s1", true, now);

        engine.poll_timers(now + Duration::from_secs(10));
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_media_acquire_failure_ends_session() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine.media_mut().fail_acquire = true;
        engine
            .start_search(SearchCriteria::new(SessionKind::Video))
            .unwrap();
        engine
            .handle_event(names::MATCH_FOUND, match_payload("s1", true), now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert_eq!(
            engine.transport().last_named(names::VIDEO_CHAT_ENDED).unwrap()["reason"],
            "negotiation_failed"
        );
    }

    #[test]
    fn test_partner_media_ready() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Audio, "s1", true, now);
        engine
            .handle_event(names::PARTNER_MEDIA_READY, json!({"media_type": "audio"}), now)
            .unwrap();
        assert!(engine.observer().contains(&Notification::PartnerMediaReady {
            media_type: "audio".into()
        }));
    }

    #[test]
    fn test_video_vocabulary_session() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine
            .start_search(SearchCriteria::new(SessionKind::Video))
            .unwrap();
        assert_eq!(engine.transport().named(names::JOIN_VIDEO_CHAT).len(), 1);

        engine
            .handle_event(names::VIDEO_SEARCH_STARTED, json!({"total_waiting": 4}), now)
            .unwrap();
        assert!(engine.observer().contains(&Notification::QueueUpdate {
            position: 0,
            total_waiting: 4,
            estimated_wait_seconds: 0,
        }));

        engine
            .handle_event(
                names::VIDEO_MATCH_FOUND,
                json!({"session_id": "v1", "partner_id": "p1", "initiator": true}),
                now,
            )
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Active);
        assert_eq!(engine.session().unwrap().role, Role::Offerer);
        assert_eq!(engine.transport().named(names::WEBRTC_SIGNAL).len(), 1);

        engine.end_session("user_left").unwrap();
        assert_eq!(
            engine.transport().last_named(names::VIDEO_CHAT_ENDED).unwrap(),
            json!({"session_id": "v1", "reason": "user_left"})
        );
        assert!(engine.transport().last_named(names::END_CHAT).is_none());
    }

    #[test]
    fn test_video_chat_ended_by_partner() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        media_session(&mut engine, SessionKind::Video, "v1", false, now);

        engine
            .handle_event(
                names::VIDEO_CHAT_ENDED,
                json!({"session_id": "v1", "reason": "user_left"}),
                now,
            )
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert!(engine.negotiation().is_none());
        assert!(engine.observer().contains(&Notification::SessionEnded {
            session_id: SessionId::new("v1"),
            reason: "user_left".into(),
            by_peer: true,
        }));
        assert!(engine.transport().last_named(names::VIDEO_CHAT_ENDED).is_none());
    }

    #[test]
    fn test_video_search_cancelled_by_server() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine
            .start_search(SearchCriteria::new(SessionKind::Video))
            .unwrap();
        engine
            .handle_event(names::VIDEO_SEARCH_CANCELLED, Value::Null, now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_older_vocabulary_session() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        engine.start_search(SearchCriteria::default()).unwrap();
        engine
            .handle_event(names::SEARCHING, json!({"count": 2}), now)
            .unwrap();
        assert!(engine.observer().contains(&Notification::QueueUpdate {
            position: 0,
            total_waiting: 2,
            estimated_wait_seconds: 0,
        }));

        // No initiator flag: this side answers.
        engine
            .handle_event(
                names::LEGACY_MATCH_FOUND,
                json!({"session_id": "s1", "partner_id": "p1"}),
                now,
            )
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Active);
        assert_eq!(engine.session().unwrap().role, Role::Answerer);

        engine
            .handle_event(names::PARTNER_LEFT, Value::Null, now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
        assert!(engine.observer().contains(&Notification::SessionEnded {
            session_id: SessionId::new("s1"),
            reason: "partner_left".into(),
            by_peer: true,
        }));

        // Nothing left to end.
        engine
            .handle_event(names::PARTNER_LEFT, Value::Null, now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_partner_left_for_other_session_discarded() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s2", true);
        engine
            .handle_event(names::PARTNER_LEFT, json!({"session_id": "s1"}), now)
            .unwrap();
        assert_eq!(engine.status(), SessionStatus::Active);
    }

    #[test]
    fn test_service_error_is_reported() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);
        engine
            .handle_event(names::SERVICE_ERROR, json!({"message": "rate limited"}), now)
            .unwrap();
        assert!(engine.observer().contains(&Notification::ServiceError {
            message: "rate limited".into()
        }));
        assert_eq!(engine.status(), SessionStatus::Active);
    }

    #[test]
    fn test_rejected_message_is_reported_failed() {
        let now = Instant::now();
        let mut engine = connected_engine(EngineConfig::default(), now);
        search_and_match(&mut engine, "s1", true);
        let temp_id = engine.send_message("spam").unwrap();
        engine
            .handle_event(names::MESSAGE_ERROR, json!({"temp_id": temp_id.as_str()}), now)
            .unwrap();
        assert_eq!(engine.message(&temp_id).unwrap().status, MessageStatus::Failed);
        assert!(engine.observer().contains(&Notification::MessageStatusChanged {
            temp_id,
            status: MessageStatus::Failed,
        }));
    }
}
