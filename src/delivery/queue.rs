//! Offline send queue.

use std::collections::VecDeque;

use crate::transport::SendRequest;

/// FIFO of send requests that could not be transmitted.
///
/// Requests are stored verbatim and leave the queue in submission order.
#[derive(Debug, Clone, Default)]
pub struct OfflineQueue {
    pending: VecDeque<SendRequest>,
}

impl OfflineQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request.
    pub fn push(&mut self, request: SendRequest) {
        self.pending.push_back(request);
    }

    /// Take the oldest request.
    pub fn pop(&mut self) -> Option<SendRequest> {
        self.pending.pop_front()
    }

    /// Put a request back at the head after a failed transmission.
    pub fn restore(&mut self, request: SendRequest) {
        self.pending.push_front(request);
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
