//! Channel-backed Transport Adapter.
//!
//! [`ChannelTransport`] is the engine side; [`ChannelRemote`] is handed to
//! whatever owns the real socket (or to a test). The remote end sees every
//! emitted event and every connect/disconnect request, and reports connection
//! changes and inbound events back as [`TransportSignal`]s, which the driver
//! feeds into the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use super::connection::DisconnectReason;
use crate::core::{Transport, TransportError};

/// One emitted event.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEvent {
    /// Event name.
    pub name: String,
    /// JSON payload.
    pub payload: Value,
}

/// Requests from the engine to the socket owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Open (or reopen) the channel.
    Connect,
    /// Close the channel; no reconnection wanted.
    Disconnect,
}

/// Transport-level happenings reported to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// Channel is up.
    Connected,
    /// Channel went down.
    Disconnected(DisconnectReason),
    /// The pending attempt failed.
    ConnectError(String),
    /// Inbound event.
    Event {
        /// Event name.
        name: String,
        /// JSON payload.
        payload: Value,
    },
}

/// Engine-side end of the channel pair.
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<WireEvent>,
    control: mpsc::UnboundedSender<ControlRequest>,
    connected: Arc<AtomicBool>,
}

/// Socket-side end of the channel pair.
#[derive(Debug)]
pub struct ChannelRemote {
    /// Events emitted by the engine.
    pub outbound: mpsc::UnboundedReceiver<WireEvent>,
    /// Connect/disconnect requests from the engine.
    pub control: mpsc::UnboundedReceiver<ControlRequest>,
    signals: mpsc::UnboundedSender<TransportSignal>,
    connected: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Create a connected pair plus the signal stream for the driver.
    pub fn pair() -> (
        ChannelTransport,
        ChannelRemote,
        mpsc::UnboundedReceiver<TransportSignal>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let transport = ChannelTransport {
            outbound: outbound_tx,
            control: control_tx,
            connected: connected.clone(),
        };
        let remote = ChannelRemote {
            outbound: outbound_rx,
            control: control_rx,
            signals: signal_tx,
            connected,
        };
        (transport, remote, signal_rx)
    }
}

impl Transport for ChannelTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.control
            .send(ControlRequest::Connect)
            .map_err(|_| TransportError::Closed)
    }

    fn send(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(WireEvent {
                name: event.to_string(),
                payload,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.control.send(ControlRequest::Disconnect);
    }
}

impl ChannelRemote {
    /// Mark the channel up and tell the engine.
    pub fn accept(&self) -> bool {
        self.connected.store(true, Ordering::Release);
        self.signals.send(TransportSignal::Connected).is_ok()
    }

    /// Mark the channel down and tell the engine why.
    pub fn drop_connection(&self, reason: DisconnectReason) -> bool {
        self.connected.store(false, Ordering::Release);
        self.signals
            .send(TransportSignal::Disconnected(reason))
            .is_ok()
    }

    /// Report that the pending attempt failed.
    pub fn reject(&self, error: impl Into<String>) -> bool {
        self.signals
            .send(TransportSignal::ConnectError(error.into()))
            .is_ok()
    }

    /// Deliver an inbound event to the engine.
    pub fn deliver(&self, name: impl Into<String>, payload: Value) -> bool {
        self.signals
            .send(TransportSignal::Event {
                name: name.into(),
                payload,
            })
            .is_ok()
    }

    /// Whether the engine side currently sees the channel as up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
