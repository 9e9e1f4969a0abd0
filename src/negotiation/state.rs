//! Offer/answer/ICE handshake for one media session.
//!
//! The offerer opens the peer connection, creates a description and sends it;
//! the answerer waits for that description, applies it and answers. Remote
//! candidates that arrive before the remote description are held and applied
//! in arrival order right after it is set. Offers reaching the offerer and
//! answers reaching the answerer are discarded, so the roles committed at
//! match time never flip.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::core::{
    EngineError, IceCandidate, MediaHandle, PeerConnection, PeerPhase, Role, SessionDescription,
    SessionId, StaleRef,
};
use crate::transport::{Signal, SignalBody};

/// Observable handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationPhase {
    /// Created; nothing exchanged.
    #[default]
    New,
    /// Offer sent, waiting for the answer.
    Offering,
    /// Waiting for the offer, or answer sent.
    Answering,
    /// Descriptions exchanged; connectivity checks running.
    Connecting,
    /// Media flowing.
    Connected,
    /// Dropped; grace window running.
    Disconnected,
    /// Failed; grace window running.
    Failed,
    /// Torn down.
    Closed,
}

/// What the caller must do after a peer phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    /// Nothing.
    None,
    /// Link is up; disarm grace and handshake timers.
    Recovered,
    /// Link dipped; arm the grace timer.
    Degraded,
}

/// Handshake state for the live media session.
#[derive(Debug)]
pub struct NegotiationState {
    session_id: SessionId,
    role: Role,
    tracks: MediaHandle,
    local_description_set: bool,
    remote_description_set: bool,
    pending_ice: VecDeque<IceCandidate>,
    peer_phase: PeerPhase,
    phase: NegotiationPhase,
    ever_connected: bool,
}

impl NegotiationState {
    /// Handshake state for `session_id`.
    pub fn new(session_id: SessionId, role: Role, tracks: MediaHandle) -> Self {
        Self {
            session_id,
            role,
            tracks,
            local_description_set: false,
            remote_description_set: false,
            pending_ice: VecDeque::new(),
            peer_phase: PeerPhase::New,
            phase: NegotiationPhase::New,
            ever_connected: false,
        }
    }

    /// Owning session.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Committed role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Observable phase.
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// Last reported peer connection phase.
    pub fn peer_phase(&self) -> PeerPhase {
        self.peer_phase
    }

    /// Whether our description is applied.
    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    /// Whether the partner's description is applied.
    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Remote candidates waiting for the remote description.
    pub fn pending_ice(&self) -> usize {
        self.pending_ice.len()
    }

    /// Whether the link ever reached Connected.
    pub fn ever_connected(&self) -> bool {
        self.ever_connected
    }

    fn signal(&self, body: SignalBody) -> Signal {
        Signal {
            session_id: self.session_id.clone(),
            body,
        }
    }

    fn stale(&self, what: &'static str) -> EngineError {
        debug!(target: "duet.negotiation", session_id = %self.session_id, what, "signal discarded");
        EngineError::StaleEventDiscarded(StaleRef::State(what))
    }

    /// Open the peer connection; the offerer also produces its offer.
    pub fn start<P: PeerConnection>(
        &mut self,
        peer: &mut P,
        generation: u64,
    ) -> Result<Option<Signal>, EngineError> {
        peer.open(generation, self.tracks)?;
        match self.role {
            Role::Offerer => {
                let offer = peer.create_offer()?;
                peer.set_local_description(&offer)?;
                self.local_description_set = true;
                self.phase = NegotiationPhase::Offering;
                info!(target: "duet.negotiation", session_id = %self.session_id, "offer sent");
                Ok(Some(self.signal(SignalBody::Offer { offer })))
            }
            Role::Answerer => {
                self.phase = NegotiationPhase::Answering;
                debug!(target: "duet.negotiation", session_id = %self.session_id, "awaiting offer");
                Ok(None)
            }
            Role::Unset => Err(EngineError::NegotiationFailed("role not committed".into())),
        }
    }

    /// Apply an inbound signal for this session.
    ///
    /// Returns the reply to send, if any.
    pub fn on_signal<P: PeerConnection>(
        &mut self,
        peer: &mut P,
        body: SignalBody,
    ) -> Result<Option<Signal>, EngineError> {
        match body {
            SignalBody::Offer { offer } => self.on_offer(peer, offer),
            SignalBody::Answer { answer } => self.on_answer(peer, answer),
            SignalBody::IceCandidate { candidate } => {
                self.on_remote_candidate(peer, candidate);
                Ok(None)
            }
        }
    }

    fn on_offer<P: PeerConnection>(
        &mut self,
        peer: &mut P,
        offer: SessionDescription,
    ) -> Result<Option<Signal>, EngineError> {
        if self.role != Role::Answerer {
            return Err(self.stale("offer reached the offerer"));
        }
        if self.remote_description_set {
            return Err(self.stale("duplicate offer"));
        }
        peer.set_remote_description(&offer)?;
        self.remote_description_set = true;
        self.flush_pending(peer);

        let answer = peer.create_answer()?;
        peer.set_local_description(&answer)?;
        self.local_description_set = true;
        self.phase = NegotiationPhase::Connecting;
        info!(target: "duet.negotiation", session_id = %self.session_id, "answer sent");
        Ok(Some(self.signal(SignalBody::Answer { answer })))
    }

    fn on_answer<P: PeerConnection>(
        &mut self,
        peer: &mut P,
        answer: SessionDescription,
    ) -> Result<Option<Signal>, EngineError> {
        if self.role != Role::Offerer {
            return Err(self.stale("answer reached the answerer"));
        }
        if !self.local_description_set || self.remote_description_set {
            return Err(self.stale("unexpected answer"));
        }
        peer.set_remote_description(&answer)?;
        self.remote_description_set = true;
        self.flush_pending(peer);
        self.phase = NegotiationPhase::Connecting;
        debug!(target: "duet.negotiation", session_id = %self.session_id, "answer applied");
        Ok(None)
    }

    fn on_remote_candidate<P: PeerConnection>(&mut self, peer: &mut P, candidate: IceCandidate) {
        if !self.remote_description_set {
            self.pending_ice.push_back(candidate);
            debug!(
                target: "duet.negotiation",
                session_id = %self.session_id,
                pending = self.pending_ice.len(),
                "candidate held until remote description"
            );
            return;
        }
        if let Err(err) = peer.add_ice_candidate(&candidate) {
            warn!(target: "duet.negotiation", session_id = %self.session_id, %err, "candidate rejected");
        }
    }

    fn flush_pending<P: PeerConnection>(&mut self, peer: &mut P) {
        if !self.pending_ice.is_empty() {
            debug!(
                target: "duet.negotiation",
                session_id = %self.session_id,
                count = self.pending_ice.len(),
                "applying held candidates"
            );
        }
        while let Some(candidate) = self.pending_ice.pop_front() {
            if let Err(err) = peer.add_ice_candidate(&candidate) {
                warn!(target: "duet.negotiation", session_id = %self.session_id, %err, "candidate rejected");
            }
        }
    }

    /// Wrap a locally discovered candidate for transmission.
    pub fn local_candidate(&self, candidate: IceCandidate) -> Signal {
        self.signal(SignalBody::IceCandidate { candidate })
    }

    /// Apply a peer connection phase change.
    pub fn on_peer_phase(&mut self, phase: PeerPhase) -> PhaseAction {
        let previous = self.peer_phase;
        if previous == phase {
            return PhaseAction::None;
        }
        self.peer_phase = phase;
        debug!(
            target: "duet.negotiation",
            session_id = %self.session_id,
            from = ?previous,
            to = ?phase,
            "peer phase"
        );

        match phase {
            PeerPhase::New => PhaseAction::None,
            PeerPhase::Connecting => {
                self.phase = NegotiationPhase::Connecting;
                PhaseAction::None
            }
            PeerPhase::Connected => {
                if self.ever_connected && previous.is_degraded() {
                    info!(target: "duet.negotiation", session_id = %self.session_id, "media link recovered");
                }
                self.ever_connected = true;
                self.phase = NegotiationPhase::Connected;
                PhaseAction::Recovered
            }
            PeerPhase::Disconnected | PeerPhase::Failed => {
                self.phase = if phase == PeerPhase::Failed {
                    NegotiationPhase::Failed
                } else {
                    NegotiationPhase::Disconnected
                };
                if previous.is_degraded() {
                    // Grace window already running.
                    PhaseAction::None
                } else {
                    warn!(target: "duet.negotiation", session_id = %self.session_id, ?phase, "media link degraded");
                    PhaseAction::Degraded
                }
            }
            PeerPhase::Closed => {
                self.phase = NegotiationPhase::Closed;
                PhaseAction::None
            }
        }
    }

    /// Whether the link is currently degraded.
    pub fn is_degraded(&self) -> bool {
        self.peer_phase.is_degraded()
    }

    /// Tear down the peer connection.
    pub fn close<P: PeerConnection>(&mut self, peer: &mut P) {
        peer.close();
        self.pending_ice.clear();
        self.peer_phase = PeerPhase::Closed;
        self.phase = NegotiationPhase::Closed;
        debug!(target: "duet.negotiation", session_id = %self.session_id, "negotiation closed");
    }
}
