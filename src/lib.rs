//! # Duet
//!
//! Client-side session engine for anonymous one-to-one real-time chat.
//!
//! A user asks a matching service for a partner, converses by text (and
//! optionally audio/video), and ends or skips the session. The engine keeps
//! that lifecycle coherent while the event channel to the service flaps:
//!
//! - **Resilience**: bounded exponential reconnection with a hard attempt ceiling
//! - **Sessions**: one authoritative status, forward-only transitions
//! - **Delivery**: optimistic sends, monotone status, FIFO offline replay
//! - **Negotiation**: offer/answer and candidate relay scoped to one session
//!
//! The engine is sans-IO. It owns no sockets or tasks and takes the current
//! time as an argument, so every timing rule is testable without a runtime.
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio driver ([`client`]) and channel transport
//!
//! ## Modules
//!
//! - [`core`]: identifiers, collaborator traits, configuration and errors
//! - [`transport`]: wire events, resilience manager, timers
//! - [`session`]: session state machine
//! - [`delivery`]: message tracking and the offline queue
//! - [`negotiation`]: per-session media handshake state
//! - [`engine`]: the composed [`Engine`] and its [`Notification`]s
//! - [`client`]: async driver (requires `runtime` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use duet_engine::prelude::*;
//! use serde_json::{Value, json};
//! use std::time::Instant;
//!
//! #[derive(Default)]
//! struct Loopback {
//!     up: bool,
//!     sent: Vec<String>,
//! }
//!
//! impl Transport for Loopback {
//!     fn connect(&mut self) -> Result<(), TransportError> {
//!         self.up = true;
//!         Ok(())
//!     }
//!
//!     fn send(&mut self, event: &str, _payload: Value) -> Result<(), TransportError> {
//!         self.sent.push(event.to_string());
//!         Ok(())
//!     }
//!
//!     fn is_connected(&self) -> bool {
//!         self.up
//!     }
//!
//!     fn disconnect(&mut self) {
//!         self.up = false;
//!     }
//! }
//!
//! # fn main() -> Result<(), EngineError> {
//! let now = Instant::now();
//! let mut engine =
//!     Engine::text_only(EngineConfig::default(), Loopback::default(), Vec::<Notification>::new())?;
//! engine.init(now)?;
//! engine.on_connected();
//!
//! engine.start_search(SearchCriteria::new(SessionKind::Text))?;
//! engine.handle_event(
//!     "chat_match_found",
//!     json!({"session_id": "s1", "partner_id": "p1", "initiator": true}),
//!     now,
//! )?;
//! assert_eq!(engine.status(), SessionStatus::Active);
//!
//! let temp_id = engine.send_message("hello")?;
//! assert_eq!(engine.message_status(&temp_id), Some(MessageStatus::Pending));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;
pub mod delivery;
pub mod engine;
pub mod negotiation;
pub mod session;
pub mod transport;

// Async driver (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::delivery::{InboundMessage, MediaAttachment, MessageContent, MessageStatus};
    pub use crate::engine::{Engine, FatalKind, Notification};
    pub use crate::negotiation::NegotiationPhase;
    pub use crate::session::{Session, SessionStatus};
    pub use crate::transport::{ConnectionPhase, DisconnectReason};

    #[cfg(feature = "runtime")]
    pub use crate::client::{EngineDriver, EngineHandle, PeerSignal};
    #[cfg(feature = "runtime")]
    pub use crate::transport::{ChannelRemote, ChannelTransport, TransportSignal};
}

// Re-export commonly used items at crate root
pub use crate::core::{EngineConfig, EngineError, EngineResult};
pub use crate::engine::{Engine, Notification};
