//! Transport layer.
//!
//! Everything between the engine and the duplex event channel to the
//! matching service:
//!
//! - **Event vocabulary**: [`OutboundEvent`] / [`InboundEvent`] and their payloads
//! - **Connection resilience**: [`ResilienceManager`] with bounded exponential backoff
//! - **Timers**: [`TimerQueue`] for backoff, grace windows and delays
//! - **Channel transport**: [`ChannelTransport`] for the tokio driver (feature `runtime`)
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Session / Delivery / Negotiation      │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   events, resilience, timers            │
//! ├─────────────────────────────────────────┤
//! │   Transport Adapter (socket owner)      │
//! └─────────────────────────────────────────┘
//! ```

#[cfg(feature = "runtime")]
mod channel;
mod connection;
mod events;
mod timer;

#[cfg(feature = "runtime")]
pub use channel::*;
pub use connection::*;
pub use events::*;
pub use timer::*;
