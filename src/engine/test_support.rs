//! Recording collaborators for engine tests.

use std::time::Instant;

use serde_json::{Value, json};

use super::{Engine, Notification};
use crate::core::{
    EngineConfig, EngineResult, IceCandidate, MediaConstraints, MediaError, MediaHandle,
    MediaSource, PeerConnection, SearchCriteria, SessionDescription, SessionKind, TrackKind,
    Transport, TransportError,
};
use crate::transport::names;

/// Transport double: records every call, connectivity set by the test.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    pub connected: bool,
    pub connects: usize,
    pub disconnects: usize,
    pub fail_connect: bool,
    pub sent: Vec<(String, Value)>,
}

impl RecordingTransport {
    pub fn named(&self, name: &str) -> Vec<Value> {
        self.sent
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn last_named(&self, name: &str) -> Option<Value> {
        self.named(name).pop()
    }
}

impl Transport for RecordingTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.connects += 1;
        if self.fail_connect {
            return Err(TransportError::ConnectFailed("refused".into()));
        }
        Ok(())
    }

    fn send(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.push((event.to_string(), payload));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }
}

/// Media source double.
#[derive(Debug, Default)]
pub(crate) struct RecordingMedia {
    pub fail_acquire: bool,
    pub acquired: Vec<MediaConstraints>,
    pub released: Vec<MediaHandle>,
    pub toggles: Vec<(TrackKind, bool)>,
}

impl MediaSource for RecordingMedia {
    fn acquire_local_tracks(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<MediaHandle, MediaError> {
        if self.fail_acquire {
            return Err(MediaError::AcquireFailed("permission denied".into()));
        }
        self.acquired.push(constraints);
        Ok(MediaHandle(self.acquired.len() as u64))
    }

    fn release_tracks(&mut self, handle: MediaHandle) {
        self.released.push(handle);
    }

    fn set_track_enabled(
        &mut self,
        _handle: MediaHandle,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), MediaError> {
        self.toggles.push((kind, enabled));
        Ok(())
    }
}

/// One call made on the peer double.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PeerCall {
    Open(u64),
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddIce(IceCandidate),
    Close,
}

/// Peer connection double.
#[derive(Debug, Default)]
pub(crate) struct RecordingPeer {
    pub calls: Vec<PeerCall>,
}

impl RecordingPeer {
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                PeerCall::AddIce(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }
}

impl PeerConnection for RecordingPeer {
    fn open(&mut self, generation: u64, _tracks: MediaHandle) -> Result<(), MediaError> {
        self.calls.push(PeerCall::Open(generation));
        Ok(())
    }

    fn create_offer(&mut self) -> Result<SessionDescription, MediaError> {
        self.calls.push(PeerCall::CreateOffer);
        Ok(SessionDescription::offer("v=0 offer"))
    }

    fn create_answer(&mut self) -> Result<SessionDescription, MediaError> {
        self.calls.push(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer("v=0 answer"))
    }

    fn set_local_description(&mut self, description: &SessionDescription) -> Result<(), MediaError> {
        self.calls.push(PeerCall::SetLocal(description.clone()));
        Ok(())
    }

    fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), MediaError> {
        self.calls.push(PeerCall::SetRemote(description.clone()));
        Ok(())
    }

    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.calls.push(PeerCall::AddIce(candidate.clone()));
        Ok(())
    }

    fn close(&mut self) {
        self.calls.push(PeerCall::Close);
    }
}

pub(crate) type TestEngine =
    Engine<RecordingTransport, RecordingMedia, RecordingPeer, Vec<Notification>>;

impl TestEngine {
    pub fn try_build(config: EngineConfig) -> EngineResult<Self> {
        Engine::new(
            config,
            RecordingTransport::default(),
            RecordingMedia::default(),
            RecordingPeer::default(),
            Vec::new(),
        )
    }

    pub fn build(config: EngineConfig) -> Self {
        Self::try_build(config).expect("valid test config")
    }
}

/// Engine whose transport is up, with the observer log cleared.
pub(crate) fn connected_engine(config: EngineConfig, now: Instant) -> TestEngine {
    let mut engine = TestEngine::build(config);
    engine.init(now).expect("init");
    engine.transport_mut().connected = true;
    engine.on_connected();
    engine.observer_mut().clear();
    engine
}

pub(crate) fn match_payload(session_id: &str, initiator: bool) -> Value {
    json!({
        "session_id": session_id,
        "partner_id": "p1",
        "initiator": initiator,
    })
}

/// Search for a text session and match into `session_id`.
pub(crate) fn search_and_match(engine: &mut TestEngine, session_id: &str, initiator: bool) {
    media_session(engine, SessionKind::Text, session_id, initiator, Instant::now());
}

/// Search for a session of `kind` and match into `session_id`.
pub(crate) fn media_session(
    engine: &mut TestEngine,
    kind: SessionKind,
    session_id: &str,
    initiator: bool,
    now: Instant,
) {
    engine
        .start_search(SearchCriteria::new(kind))
        .expect("start search");
    engine
        .handle_event(names::MATCH_FOUND, match_payload(session_id, initiator), now)
        .expect("match");
}
