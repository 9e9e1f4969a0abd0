//! Caller intents.

use std::time::Instant;

use tracing::{debug, info};

use super::instance::Engine;
use super::notification::Notification;
use crate::core::constants::{REASON_NEXT, REASON_USER_BLOCKED};
use crate::core::{
    EngineError, EngineResult, MediaError, MediaSource, MessageId, Observer, PeerConnection,
    SearchCriteria, SessionId, TempId, TrackKind, Transport, TransportError,
};
use crate::delivery::{MediaAttachment, MessageContent, MessageStatus};
use crate::session::SessionStatus;
use crate::transport::{OutboundEvent, TimerKind, TimerScope};

impl<T, M, P, O> Engine<T, M, P, O>
where
    T: Transport,
    M: MediaSource,
    P: PeerConnection,
    O: Observer,
{
    fn require_active(&self, operation: &'static str) -> EngineResult<SessionId> {
        self.session
            .active_session_id()
            .cloned()
            .ok_or(EngineError::InvalidStateTransition {
                operation,
                state: self.session.status(),
            })
    }

    fn emit_required(&mut self, event: OutboundEvent) -> EngineResult<()> {
        self.emit(&event).map_err(|err| match err {
            TransportError::NotConnected => EngineError::TransportUnavailable,
            other => EngineError::Transport(other),
        })
    }

    /// Enter the matching queue.
    pub fn start_search(&mut self, criteria: SearchCriteria) -> EngineResult<()> {
        self.ensure_live()?;
        let status = self.session.status();
        if !status.can_search() {
            return Err(EngineError::InvalidStateTransition {
                operation: "start_search",
                state: status,
            });
        }
        if !self.transport.is_connected() {
            return Err(EngineError::TransportUnavailable);
        }

        self.pending_next = None;
        self.timers.cancel_kind(TimerKind::NextSearch);
        self.emit_required(OutboundEvent::StartSearch(criteria.clone()))?;
        self.session.start_search(criteria)?;
        info!(target: "duet.session", "search started");
        self.flush_transitions();
        Ok(())
    }

    /// Leave the matching queue.
    ///
    /// Also cancels a search scheduled by [`Engine::next_session`].
    pub fn cancel_search(&mut self) -> EngineResult<()> {
        self.ensure_live()?;
        if self.session.status() != SessionStatus::Searching && self.pending_next.take().is_some() {
            self.timers.cancel_kind(TimerKind::NextSearch);
            debug!(target: "duet.session", "scheduled search cancelled");
            return Ok(());
        }
        let kind = self.session.cancel_search()?;
        self.emit_or_drop(OutboundEvent::CancelSearch { kind });
        info!(target: "duet.session", "search cancelled");
        self.flush_transitions();
        Ok(())
    }

    /// Ask the service for fresh queue metadata.
    pub fn request_status(&mut self) -> EngineResult<()> {
        self.ensure_live()?;
        let status = self.session.status();
        if status != SessionStatus::Searching {
            return Err(EngineError::InvalidStateTransition {
                operation: "request_status",
                state: status,
            });
        }
        let kind = self.session.criteria().map(|c| c.kind).unwrap_or_default();
        self.emit_required(OutboundEvent::RequestStatus { kind })
    }

    /// Send a text message. Returns its provisional id.
    pub fn send_message(&mut self, text: &str) -> EngineResult<TempId> {
        self.ensure_live()?;
        if text.trim().is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        self.send_content(MessageContent::Text(text.to_string()), "send_message")
    }

    /// Send a media attachment. Returns its provisional id.
    pub fn send_media(&mut self, attachment: MediaAttachment) -> EngineResult<TempId> {
        self.ensure_live()?;
        if attachment.data.is_empty() {
            return Err(EngineError::EmptyMessage);
        }
        let limit = self.config.max_attachment_bytes;
        if attachment.size() > limit {
            return Err(EngineError::AttachmentTooLarge {
                size: attachment.size(),
                limit,
            });
        }
        self.send_content(MessageContent::Media(attachment), "send_media")
    }

    fn send_content(
        &mut self,
        content: MessageContent,
        operation: &'static str,
    ) -> EngineResult<TempId> {
        let session_id = self.require_active(operation)?;
        if self.typing {
            self.stop_typing();
        }

        let request = self.delivery.prepare(session_id, content);
        let temp_id = request.temp_id.clone();
        self.notify(Notification::MessageStatusChanged {
            temp_id: temp_id.clone(),
            status: MessageStatus::Pending,
        });

        // Sends behind a non-empty queue wait their turn.
        if !self.delivery.queue().is_empty() {
            self.delivery.enqueue(request);
            return Ok(temp_id);
        }
        let event = OutboundEvent::Send(request);
        if self.emit(&event).is_err() {
            if let OutboundEvent::Send(request) = event {
                self.delivery.enqueue(request);
            }
        }
        Ok(temp_id)
    }

    /// Leave the current session, or cancel the search when searching.
    pub fn end_session(&mut self, reason: &str) -> EngineResult<()> {
        self.ensure_live()?;
        if self.session.status() == SessionStatus::Searching {
            return self.cancel_search();
        }
        self.pending_next = None;
        self.teardown(reason, false, false, true)
    }

    /// End the current session and search again after the configured delay.
    pub fn next_session(&mut self, now: Instant) -> EngineResult<()> {
        self.ensure_live()?;
        let criteria = self.session.criteria().cloned().unwrap_or_default();
        self.end_session(REASON_NEXT)?;
        self.pending_next = Some(criteria);
        self.timers.schedule(
            TimerKind::NextSearch,
            TimerScope::Connection,
            now,
            self.config.next_session_delay,
        );
        debug!(
            target: "duet.session",
            delay = ?self.config.next_session_delay,
            "next search scheduled"
        );
        Ok(())
    }

    /// Flip one local track. Returns whether it is now enabled.
    pub fn toggle_local_track(&mut self, kind: TrackKind) -> EngineResult<bool> {
        self.ensure_live()?;
        let handle = self.local_tracks.ok_or(MediaError::NoTracks)?;
        let enabled = match kind {
            TrackKind::Audio => !self.track_flags.audio,
            TrackKind::Video => !self.track_flags.video,
        };
        self.media.set_track_enabled(handle, kind, enabled)?;
        match kind {
            TrackKind::Audio => self.track_flags.audio = enabled,
            TrackKind::Video => self.track_flags.video = enabled,
        }
        debug!(target: "duet.negotiation", ?kind, enabled, "local track toggled");
        self.notify(Notification::LocalTrackToggled { kind, enabled });
        Ok(enabled)
    }

    /// Acknowledge an inbound message as read.
    ///
    /// The read receipt goes out once per message id.
    pub fn mark_read(&mut self, id: &MessageId) -> EngineResult<()> {
        self.ensure_live()?;
        let session_id = self.require_active("mark_read")?;
        if self.delivery.mark_read(id)? {
            self.emit_or_drop(OutboundEvent::Read {
                message_id: id.clone(),
                session_id,
            });
        }
        Ok(())
    }

    /// Show or withdraw the local typing indicator.
    ///
    /// A started indicator is withdrawn automatically after the configured
    /// idle time unless refreshed.
    pub fn set_typing(&mut self, typing: bool, now: Instant) -> EngineResult<()> {
        self.ensure_live()?;
        let session_id = self.require_active("set_typing")?;
        if !typing {
            if self.typing {
                self.stop_typing();
            }
            return Ok(());
        }

        if !self.typing {
            self.typing = true;
            self.emit_or_drop(OutboundEvent::Typing {
                session_id,
                typing: true,
            });
        }
        self.timers.cancel_kind(TimerKind::TypingIdle);
        self.timers.schedule(
            TimerKind::TypingIdle,
            TimerScope::Session(self.session.generation()),
            now,
            self.config.typing_idle,
        );
        Ok(())
    }

    /// Report the partner to the service.
    pub fn report_partner(&mut self, reason: &str, details: &str) -> EngineResult<()> {
        self.ensure_live()?;
        let session_id = self.require_active("report_partner")?;
        self.emit_required(OutboundEvent::Report {
            session_id,
            reason: reason.to_string(),
            details: details.to_string(),
        })
    }

    /// Block the partner and leave the session.
    pub fn block_partner(&mut self) -> EngineResult<()> {
        self.ensure_live()?;
        let session_id = self.require_active("block_partner")?;
        self.emit_required(OutboundEvent::Block { session_id })?;
        self.pending_next = None;
        self.teardown(REASON_USER_BLOCKED, false, false, false)
    }
}
