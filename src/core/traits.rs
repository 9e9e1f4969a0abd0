//! Collaborator traits.
//!
//! The engine is sans-IO: it drives a [`Transport`] to the matching service,
//! a [`MediaSource`] for local tracks and a [`PeerConnection`] for the media
//! handshake, and reports everything it observes to an [`Observer`]. All
//! calls happen on the single event-processing path, so implementations need
//! no internal locking.

use serde_json::Value;

use super::error::{MediaError, TransportError};
use super::media::{IceCandidate, MediaConstraints, MediaHandle, SessionDescription};
use super::types::TrackKind;
use crate::engine::Notification;

/// Duplex event channel to the remote peer-matching service.
///
/// Connection outcomes are reported back to the engine asynchronously
/// (`Engine::on_connected`, `Engine::on_disconnected`,
/// `Engine::on_connect_error`); [`Transport::connect`] only starts an attempt.
pub trait Transport {
    /// Start a connection attempt.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Emit one named event.
    fn send(&mut self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Whether events can be emitted right now.
    fn is_connected(&self) -> bool;

    /// Close the channel intentionally.
    fn disconnect(&mut self);
}

/// Local capture devices (audio/video sessions only).
pub trait MediaSource {
    /// Acquire local tracks.
    fn acquire_local_tracks(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<MediaHandle, MediaError>;

    /// Stop and release previously acquired tracks.
    fn release_tracks(&mut self, handle: MediaHandle);

    /// Enable or mute one track.
    fn set_track_enabled(
        &mut self,
        handle: MediaHandle,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), MediaError>;
}

/// Peer-media connection used for the offer/answer/ICE handshake.
///
/// One instance is reused across sessions: [`PeerConnection::open`] at the
/// start of each negotiation, [`PeerConnection::close`] at its end. Locally
/// discovered candidates and phase changes are reported back through
/// `Engine::on_local_candidate` / `Engine::on_peer_phase`, tagged with the
/// generation passed to `open`.
pub trait PeerConnection {
    /// Prepare a fresh connection carrying `tracks`.
    fn open(&mut self, generation: u64, tracks: MediaHandle) -> Result<(), MediaError>;

    /// Create an offer.
    fn create_offer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Create an answer to the applied remote offer.
    fn create_answer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Apply our own description.
    fn set_local_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), MediaError>;

    /// Apply the partner's description.
    fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), MediaError>;

    /// Apply one remote candidate.
    fn add_ice_candidate(&mut self, candidate: &IceCandidate) -> Result<(), MediaError>;

    /// Tear the connection down.
    fn close(&mut self);
}

/// Sink for engine notifications.
pub trait Observer {
    /// Receive one notification.
    fn notify(&mut self, notification: Notification);
}

impl Observer for Vec<Notification> {
    fn notify(&mut self, notification: Notification) {
        self.push(notification);
    }
}

/// Media stand-in for text-only engines.
///
/// Every call fails with [`MediaError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMedia;

impl MediaSource for NoMedia {
    fn acquire_local_tracks(&mut self, _: MediaConstraints) -> Result<MediaHandle, MediaError> {
        Err(MediaError::Unsupported)
    }

    fn release_tracks(&mut self, _: MediaHandle) {}

    fn set_track_enabled(&mut self, _: MediaHandle, _: TrackKind, _: bool) -> Result<(), MediaError> {
        Err(MediaError::Unsupported)
    }
}

impl PeerConnection for NoMedia {
    fn open(&mut self, _: u64, _: MediaHandle) -> Result<(), MediaError> {
        Err(MediaError::Unsupported)
    }

    fn create_offer(&mut self) -> Result<SessionDescription, MediaError> {
        Err(MediaError::Unsupported)
    }

    fn create_answer(&mut self) -> Result<SessionDescription, MediaError> {
        Err(MediaError::Unsupported)
    }

    fn set_local_description(&mut self, _: &SessionDescription) -> Result<(), MediaError> {
        Err(MediaError::Unsupported)
    }

    fn set_remote_description(&mut self, _: &SessionDescription) -> Result<(), MediaError> {
        Err(MediaError::Unsupported)
    }

    fn add_ice_candidate(&mut self, _: &IceCandidate) -> Result<(), MediaError> {
        Err(MediaError::Unsupported)
    }

    fn close(&mut self) {}
}
