//! Media-side vocabulary shared by the negotiation engine and its collaborators.

use serde::{Deserialize, Serialize};

/// Which local tracks to acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Capture microphone.
    pub audio: bool,
    /// Capture camera.
    pub video: bool,
}

impl MediaConstraints {
    /// Microphone only.
    pub const AUDIO: Self = Self {
        audio: true,
        video: false,
    };

    /// Microphone and camera.
    pub const AUDIO_VIDEO: Self = Self {
        audio: true,
        video: true,
    };
}

/// Opaque handle to acquired local tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(pub u64);

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionKind {
    /// Initial description from the offerer.
    Offer,
    /// Counter-description from the answerer.
    Answer,
}

/// A media description (SDP blob) exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    /// Session description body.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default, rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate without stream tags.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Connection phase of the peer-media link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerPhase {
    /// Created, nothing attempted.
    #[default]
    New,
    /// Connectivity checks running.
    Connecting,
    /// Media is flowing.
    Connected,
    /// Lost connectivity, may recover.
    Disconnected,
    /// Connectivity checks failed, may recover on restart.
    Failed,
    /// Torn down.
    Closed,
}

impl PeerPhase {
    /// Phases that arm the grace timer.
    pub fn is_degraded(self) -> bool {
        matches!(self, PeerPhase::Disconnected | PeerPhase::Failed)
    }
}
