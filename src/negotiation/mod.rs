//! Negotiation Engine.
//!
//! Peer-media handshake for audio and video sessions: one offerer, one
//! answerer, ordered candidate application and grace-window tracking of the
//! media link.

mod state;

pub use state::*;
