//! Message Delivery Protocol.
//!
//! Optimistic sends with provisional ids, server reconciliation, receipts and
//! an offline FIFO that is replayed when the transport comes back.

mod message;
mod queue;
mod tracker;

pub use message::*;
pub use queue::*;
pub use tracker::*;
