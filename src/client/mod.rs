//! Async runtime glue.
//!
//! [`EngineDriver`] runs an engine on a tokio task and [`EngineHandle`] talks
//! to it. Pair with [`ChannelTransport`](crate::transport::ChannelTransport)
//! for the socket side.

mod driver;

pub use driver::*;
