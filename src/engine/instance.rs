//! Engine instance: composition, lifecycle, link handling and timers.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::notification::{FatalKind, Notification};
use crate::core::constants::{REASON_CONNECTION_LOST, REASON_NEGOTIATION_FAILED, REASON_SHUTDOWN};
use crate::core::{
    EngineConfig, EngineError, EngineResult, MediaConstraints, MediaHandle, MediaSource, NoMedia,
    Observer, PeerConnection, SearchCriteria, SessionKind, TempId, Transport, TransportError,
};
use crate::delivery::{DeliveryTracker, MessageStatus, OutboundMessage};
use crate::negotiation::{NegotiationPhase, NegotiationState};
use crate::session::{Session, SessionMachine, SessionStatus};
use crate::transport::{
    ConnectOutcome, ConnectionPhase, DisconnectReason, LinkAction, OutboundEvent,
    ResilienceManager, Timer, TimerKind, TimerQueue, TimerScope,
};

/// Enabled flags of the local tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct TrackFlags {
    pub(super) audio: bool,
    pub(super) video: bool,
}

impl Default for TrackFlags {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// The session & negotiation engine.
///
/// Single-threaded and sans-IO: every input (intent, transport event, peer
/// callback, timer) is processed to completion before the next one. The
/// engine talks to the outside only through its collaborators:
///
/// - `T`: [`Transport`] to the matching service
/// - `M`: [`MediaSource`] for local tracks
/// - `P`: [`PeerConnection`] for the media handshake
/// - `O`: [`Observer`] receiving [`Notification`]s
///
/// Time is passed in explicitly (`now`) wherever a timer may be armed; the
/// owner drives [`Engine::poll_timers`] at [`Engine::next_deadline`].
pub struct Engine<T, M, P, O> {
    pub(super) config: EngineConfig,
    pub(super) transport: T,
    pub(super) media: M,
    pub(super) peer: P,
    pub(super) observer: O,
    pub(super) link: ResilienceManager,
    pub(super) session: SessionMachine,
    pub(super) delivery: DeliveryTracker,
    pub(super) negotiation: Option<NegotiationState>,
    pub(super) timers: TimerQueue,
    pub(super) local_tracks: Option<MediaHandle>,
    pub(super) track_flags: TrackFlags,
    pub(super) typing: bool,
    pub(super) pending_next: Option<SearchCriteria>,
    pub(super) disposed: bool,
}

impl<T: Transport, O: Observer> Engine<T, NoMedia, NoMedia, O> {
    /// Engine for text sessions only.
    pub fn text_only(config: EngineConfig, transport: T, observer: O) -> EngineResult<Self> {
        Self::new(config, transport, NoMedia, NoMedia, observer)
    }
}

impl<T, M, P, O> Engine<T, M, P, O>
where
    T: Transport,
    M: MediaSource,
    P: PeerConnection,
    O: Observer,
{
    /// Create an engine. Nothing happens until [`Engine::init`].
    pub fn new(
        config: EngineConfig,
        transport: T,
        media: M,
        peer: P,
        observer: O,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            link: ResilienceManager::new(config.reconnect),
            config,
            transport,
            media,
            peer,
            observer,
            session: SessionMachine::new(),
            delivery: DeliveryTracker::new(),
            negotiation: None,
            timers: TimerQueue::new(),
            local_tracks: None,
            track_flags: TrackFlags::default(),
            typing: false,
            pending_next: None,
            disposed: false,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Session status.
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Live session.
    pub fn session(&self) -> Option<&Session> {
        self.session.session()
    }

    /// Session generation; tags peer callbacks.
    pub fn generation(&self) -> u64 {
        self.session.generation()
    }

    /// Link phase.
    pub fn connection_phase(&self) -> ConnectionPhase {
        self.link.phase()
    }

    /// Handshake state of the live media session.
    pub fn negotiation(&self) -> Option<&NegotiationState> {
        self.negotiation.as_ref()
    }

    /// Status of one outbound message.
    pub fn message_status(&self, temp_id: &TempId) -> Option<MessageStatus> {
        self.delivery.status(temp_id)
    }

    /// Outbound message tracked for the live session.
    pub fn message(&self, temp_id: &TempId) -> Option<&OutboundMessage> {
        self.delivery.message(temp_id)
    }

    /// Sends waiting for the transport.
    pub fn queued_messages(&self) -> usize {
        self.delivery.queue().len()
    }

    /// Whether the local typing indicator is on.
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Whether [`Engine::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Transport collaborator.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Transport collaborator, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Media source collaborator.
    pub fn media(&self) -> &M {
        &self.media
    }

    /// Media source collaborator, mutably.
    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }

    /// Peer connection collaborator.
    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Observer, mutably.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub(super) fn ensure_live(&self) -> EngineResult<()> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        Ok(())
    }

    /// Open the transport.
    pub fn init(&mut self, now: Instant) -> EngineResult<()> {
        self.ensure_live()?;
        if self.link.begin_connect() {
            info!(target: "duet.link", "connecting");
            self.start_attempt(0, now);
        }
        Ok(())
    }

    /// Restart the connection sequence, e.g. after `ReconnectFailed`.
    pub fn reconnect(&mut self, now: Instant) -> EngineResult<()> {
        self.ensure_live()?;
        if self.link.begin_connect() {
            info!(target: "duet.link", "explicit reconnect");
            self.timers.cancel_reconnect();
            self.start_attempt(0, now);
        }
        Ok(())
    }

    /// Shut down: leave any session, close the transport without
    /// reconnection, release media. Every later intent fails with
    /// [`EngineError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        match self.session.status() {
            SessionStatus::Searching => {
                if let Ok(kind) = self.session.cancel_search() {
                    self.emit_or_drop(OutboundEvent::CancelSearch { kind });
                }
                self.flush_transitions();
            }
            SessionStatus::Matched | SessionStatus::Active => {
                if let Err(err) = self.teardown(REASON_SHUTDOWN, false, false, true) {
                    debug!(target: "duet.engine", %err, "teardown on dispose");
                }
            }
            _ => {}
        }
        self.pending_next = None;
        self.timers = TimerQueue::new();
        if let Some(handle) = self.local_tracks.take() {
            self.media.release_tracks(handle);
        }
        self.link.shutdown();
        self.transport.disconnect();
        self.disposed = true;
        info!(target: "duet.engine", "engine disposed");
    }

    // =========================================================================
    // Link
    // =========================================================================

    fn start_attempt(&mut self, attempt: u32, now: Instant) {
        self.timers.schedule(
            TimerKind::ConnectTimeout { attempt },
            TimerScope::Connection,
            now,
            self.config.connect_timeout,
        );
        if let Err(err) = self.transport.connect() {
            warn!(target: "duet.link", attempt, %err, "connect could not start");
            self.on_attempt_failed(now);
        }
    }

    fn on_attempt_failed(&mut self, now: Instant) {
        self.timers.cancel_reconnect();
        let action = self.link.on_attempt_failed();
        self.apply_link_action(action, now);
    }

    fn apply_link_action(&mut self, action: LinkAction, now: Instant) {
        match action {
            LinkAction::None => {}
            LinkAction::Schedule { attempt, delay } => {
                debug!(target: "duet.link", attempt, ?delay, "reconnect scheduled");
                self.timers.schedule(
                    TimerKind::ReconnectAttempt { attempt },
                    TimerScope::Connection,
                    now,
                    delay,
                );
            }
            LinkAction::Exhausted { attempts } => self.reconnect_exhausted(attempts),
        }
    }

    fn reconnect_exhausted(&mut self, attempts: u32) {
        warn!(target: "duet.link", attempts, "reconnection exhausted");
        self.notify(Notification::ReconnectFailed { attempts });
        self.notify(Notification::FatalError {
            kind: FatalKind::ReconnectExhausted,
            detail: EngineError::ReconnectExhausted { attempts }.to_string(),
        });
        self.pending_next = None;
        self.timers.cancel_kind(TimerKind::NextSearch);
        match self.session.status() {
            SessionStatus::Matched | SessionStatus::Active => {
                if let Err(err) = self.teardown(REASON_CONNECTION_LOST, false, true, false) {
                    debug!(target: "duet.engine", %err, "teardown after link loss");
                }
            }
            SessionStatus::Searching => {
                self.session.abandon_search(true);
                self.flush_transitions();
            }
            _ => {}
        }
    }

    /// The transport reports the channel is up.
    pub fn on_connected(&mut self) {
        if self.disposed {
            return;
        }
        self.timers.cancel_reconnect();
        match self.link.on_connected() {
            ConnectOutcome::Duplicate => return,
            ConnectOutcome::Connected => {
                info!(target: "duet.link", "connected");
                self.notify(Notification::Connected);
            }
            ConnectOutcome::Reconnected { attempts } => {
                info!(target: "duet.link", attempts, "reconnected");
                self.notify(Notification::Reconnected);
            }
        }
        self.drain_offline();
        if !self.timers.is_pending(TimerKind::NextSearch) {
            self.resume_next_search();
        }
    }

    /// Start the search saved by `next_session`, if one is still wanted.
    fn resume_next_search(&mut self) {
        let Some(criteria) = self.pending_next.take() else {
            return;
        };
        if let Err(err) = self.start_search(criteria) {
            warn!(target: "duet.session", %err, "next search could not start");
        }
    }

    /// The transport reports the channel is down.
    pub fn on_disconnected(&mut self, reason: DisconnectReason, now: Instant) {
        if self.disposed {
            return;
        }
        warn!(target: "duet.link", ?reason, "transport down");
        self.timers.cancel_reconnect();
        let action = self.link.on_disconnected(&reason);
        self.apply_link_action(action, now);
        if self.link.phase() == ConnectionPhase::Closed {
            self.link_closed();
        }
    }

    /// The link went down for good; nothing scoped to it can survive.
    fn link_closed(&mut self) {
        self.pending_next = None;
        self.timers.cancel_kind(TimerKind::NextSearch);
        match self.session.status() {
            SessionStatus::Matched | SessionStatus::Active => {
                if let Err(err) = self.teardown(REASON_CONNECTION_LOST, false, false, false) {
                    debug!(target: "duet.engine", %err, "teardown after local close");
                }
            }
            SessionStatus::Searching => {
                self.session.abandon_search(false);
                self.flush_transitions();
            }
            _ => {}
        }
    }

    /// The transport reports the pending attempt failed.
    pub fn on_connect_error(&mut self, error: &str, now: Instant) {
        if self.disposed {
            return;
        }
        warn!(target: "duet.link", attempt = ?self.link.current_attempt(), error, "connect error");
        self.on_attempt_failed(now);
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Fire every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        while let Some(timer) = self.timers.pop_expired(now) {
            if self.disposed {
                return;
            }
            self.fire(timer, now);
        }
    }

    fn fire(&mut self, timer: Timer, now: Instant) {
        if let TimerScope::Session(generation) = timer.scope {
            if generation != self.session.generation() {
                debug!(target: "duet.engine", kind = ?timer.kind, generation, "stale timer ignored");
                return;
            }
        }

        match timer.kind {
            TimerKind::ReconnectAttempt { attempt } => {
                if self.link.begin_attempt(attempt) {
                    info!(target: "duet.link", attempt, "reconnecting");
                    self.notify(Notification::Reconnecting { attempt });
                    self.start_attempt(attempt, now);
                }
            }
            TimerKind::ConnectTimeout { attempt } => {
                if self.link.current_attempt() == Some(attempt) {
                    warn!(target: "duet.link", attempt, "connect timed out");
                    self.on_attempt_failed(now);
                }
            }
            TimerKind::NextSearch => {
                if !self.transport.is_connected() {
                    debug!(target: "duet.session", "next search waits for the link");
                    return;
                }
                self.resume_next_search();
            }
            TimerKind::NegotiationGrace => {
                if self.negotiation.as_ref().is_some_and(|n| n.is_degraded()) {
                    self.negotiation_failed("media link did not recover within grace window");
                }
            }
            TimerKind::HandshakeTimeout => {
                if self.negotiation.as_ref().is_some_and(|n| !n.ever_connected()) {
                    self.negotiation_failed("media handshake timed out");
                }
            }
            TimerKind::TypingIdle => {
                if self.typing {
                    self.stop_typing();
                }
            }
        }
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    pub(super) fn notify(&mut self, notification: Notification) {
        self.observer.notify(notification);
    }

    pub(super) fn flush_transitions(&mut self) {
        for status in self.session.take_transitions() {
            self.notify(Notification::SessionStateChanged(status));
        }
    }

    pub(super) fn emit(&mut self, event: &OutboundEvent) -> Result<(), TransportError> {
        if !self.transport.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.transport.send(event.name(), event.payload())
    }

    /// Emit, or drop with a log line while the transport is down.
    pub(super) fn emit_or_drop(&mut self, event: OutboundEvent) {
        if let Err(err) = self.emit(&event) {
            debug!(target: "duet.engine", event = event.name(), %err, "event dropped");
        }
    }

    /// Transmit queued sends in FIFO order while the link and session allow.
    pub(super) fn drain_offline(&mut self) {
        if self.session.active_session_id().is_none() || self.delivery.queue().is_empty() {
            return;
        }
        let mut sent = 0usize;
        while let Some(request) = self.delivery.queue_mut().pop() {
            let event = OutboundEvent::Send(request);
            if let Err(err) = self.emit(&event) {
                debug!(target: "duet.delivery", %err, "drain interrupted");
                if let OutboundEvent::Send(request) = event {
                    self.delivery.queue_mut().restore(request);
                }
                break;
            }
            sent += 1;
        }
        info!(
            target: "duet.delivery",
            sent,
            remaining = self.delivery.queue().len(),
            "offline queue drained"
        );
    }

    pub(super) fn stop_typing(&mut self) {
        self.typing = false;
        self.timers.cancel_kind(TimerKind::TypingIdle);
        if let Some(session_id) = self.session.active_session_id().cloned() {
            self.emit_or_drop(OutboundEvent::Typing {
                session_id,
                typing: false,
            });
        }
    }

    /// Acquire media and start the handshake for the session just matched.
    pub(super) fn start_media(&mut self, session: &Session, now: Instant) -> EngineResult<()> {
        let constraints = match session.kind {
            SessionKind::Video => MediaConstraints::AUDIO_VIDEO,
            _ => MediaConstraints::AUDIO,
        };
        let tracks = self.media.acquire_local_tracks(constraints)?;
        self.local_tracks = Some(tracks);
        self.track_flags = TrackFlags {
            audio: constraints.audio,
            video: constraints.video,
        };
        if let Some(media_type) = session.kind.media_type() {
            self.emit_or_drop(OutboundEvent::MediaReady { media_type });
        }

        let mut negotiation = NegotiationState::new(session.session_id.clone(), session.role, tracks);
        let offer = negotiation.start(&mut self.peer, self.session.generation());
        let phase = negotiation.phase();
        self.negotiation = Some(negotiation);
        if let Some(offer) = offer? {
            self.emit_or_drop(OutboundEvent::Signal(offer));
        }
        self.notify(Notification::NegotiationPhaseChanged(phase));
        self.timers.schedule(
            TimerKind::HandshakeTimeout,
            TimerScope::Session(self.session.generation()),
            now,
            self.config.handshake_timeout,
        );
        Ok(())
    }

    /// Partner-loss cleanup after the media link gave up.
    pub(super) fn negotiation_failed(&mut self, detail: &str) {
        warn!(target: "duet.negotiation", detail, "negotiation failed");
        self.notify(Notification::FatalError {
            kind: FatalKind::NegotiationFailed,
            detail: detail.to_string(),
        });
        if let Err(err) = self.teardown(REASON_NEGOTIATION_FAILED, true, false, true) {
            debug!(target: "duet.engine", %err, "teardown after negotiation failure");
        }
    }

    /// End the live session and clear everything scoped to it.
    ///
    /// `tell_remote` emits `end_chat` when the transport is up; local cleanup
    /// happens regardless.
    pub(super) fn teardown(
        &mut self,
        reason: &str,
        by_peer: bool,
        fatal: bool,
        tell_remote: bool,
    ) -> EngineResult<()> {
        let session = self.session.begin_end()?;
        self.flush_transitions();
        if tell_remote {
            self.emit_or_drop(OutboundEvent::EndSession {
                session_id: session.session_id.clone(),
                kind: session.kind,
                reason: reason.to_string(),
            });
        }

        self.timers.cancel_session_timers();
        self.timers.cancel_kind(TimerKind::TypingIdle);
        if let Some(mut negotiation) = self.negotiation.take() {
            negotiation.close(&mut self.peer);
            self.notify(Notification::NegotiationPhaseChanged(NegotiationPhase::Closed));
        }
        if let Some(handle) = self.local_tracks.take() {
            self.media.release_tracks(handle);
        }
        self.track_flags = TrackFlags::default();
        self.typing = false;
        debug!(
            target: "duet.delivery",
            tracked = self.delivery.outbound_len(),
            queued = self.delivery.queue().len(),
            "delivery state cleared"
        );
        self.delivery.clear();

        self.session.finish_end(fatal);
        self.flush_transitions();
        info!(
            target: "duet.session",
            session_id = %session.session_id,
            reason,
            by_peer,
            "session ended"
        );
        self.notify(Notification::SessionEnded {
            session_id: session.session_id,
            reason: reason.to_string(),
            by_peer,
        });
        Ok(())
    }
}

impl<T, M, P, O> std::fmt::Debug for Engine<T, M, P, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("status", &self.session.status())
            .field("generation", &self.session.generation())
            .field("link", &self.link.phase())
            .field("queued", &self.delivery.queue().len())
            .field("negotiating", &self.negotiation.is_some())
            .field("disposed", &self.disposed)
            .finish()
    }
}
