//! Engine composition.
//!
//! [`Engine`] wires the resilience manager, session machine, delivery tracker
//! and negotiation state together behind the caller intents and the inbound
//! event/callback entry points, and reports everything as [`Notification`]s.

mod inbound;
mod instance;
mod intents;
mod notification;

#[cfg(test)]
pub(crate) mod test_support;

pub use instance::Engine;
pub use notification::*;
