//! Tokio driver for the engine.
//!
//! The engine itself never blocks or spawns. [`EngineDriver`] owns it on one
//! task and feeds it, one input at a time, from:
//!
//! - caller commands sent through an [`EngineHandle`]
//! - [`TransportSignal`]s from the socket owner
//! - [`PeerSignal`]s from the peer connection
//! - the next timer deadline
//!
//! Notifications leave through an unbounded channel.

use std::future;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::core::{
    EngineError, EngineResult, IceCandidate, MediaSource, MessageId, Observer, PeerConnection,
    PeerPhase, SearchCriteria, TempId, TrackKind, Transport,
};
use crate::delivery::MediaAttachment;
use crate::engine::{Engine, Notification};
use crate::session::SessionStatus;
use crate::transport::TransportSignal;

impl Observer for mpsc::UnboundedSender<Notification> {
    fn notify(&mut self, notification: Notification) {
        // Receiver gone means nobody is listening; the engine keeps running.
        let _ = self.send(notification);
    }
}

/// Callbacks from the peer connection, tagged with the generation passed to
/// [`PeerConnection::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    /// A local candidate was discovered.
    LocalCandidate {
        /// Session generation.
        generation: u64,
        /// Candidate.
        candidate: IceCandidate,
    },
    /// The connection changed phase.
    Phase {
        /// Session generation.
        generation: u64,
        /// New phase.
        phase: PeerPhase,
    },
}

type Reply<T> = oneshot::Sender<EngineResult<T>>;

enum Command {
    StartSearch(SearchCriteria, Reply<()>),
    CancelSearch(Reply<()>),
    RequestStatus(Reply<()>),
    SendMessage(String, Reply<TempId>),
    SendMedia(MediaAttachment, Reply<TempId>),
    EndSession(String, Reply<()>),
    NextSession(Reply<()>),
    ToggleTrack(TrackKind, Reply<bool>),
    MarkRead(MessageId, Reply<()>),
    SetTyping(bool, Reply<()>),
    Report {
        reason: String,
        details: String,
        reply: Reply<()>,
    },
    Block(Reply<()>),
    Reconnect(Reply<()>),
    Status(oneshot::Sender<SessionStatus>),
    Shutdown,
}

/// Cloneable front door to a running [`EngineDriver`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::StartSearch(..) => "StartSearch",
            Command::CancelSearch(_) => "CancelSearch",
            Command::RequestStatus(_) => "RequestStatus",
            Command::SendMessage(..) => "SendMessage",
            Command::SendMedia(..) => "SendMedia",
            Command::EndSession(..) => "EndSession",
            Command::NextSession(_) => "NextSession",
            Command::ToggleTrack(..) => "ToggleTrack",
            Command::MarkRead(..) => "MarkRead",
            Command::SetTyping(..) => "SetTyping",
            Command::Report { .. } => "Report",
            Command::Block(_) => "Block",
            Command::Reconnect(_) => "Reconnect",
            Command::Status(_) => "Status",
            Command::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl EngineHandle {
    async fn request<R>(&self, build: impl FnOnce(Reply<R>) -> Command) -> EngineResult<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| EngineError::Disposed)?;
        rx.await.map_err(|_| EngineError::Disposed)?
    }

    /// Enter the matching queue.
    pub async fn start_search(&self, criteria: SearchCriteria) -> EngineResult<()> {
        self.request(|reply| Command::StartSearch(criteria, reply))
            .await
    }

    /// Leave the matching queue.
    pub async fn cancel_search(&self) -> EngineResult<()> {
        self.request(Command::CancelSearch).await
    }

    /// Ask for fresh queue metadata.
    pub async fn request_status(&self) -> EngineResult<()> {
        self.request(Command::RequestStatus).await
    }

    /// Send a text message; returns its provisional id.
    pub async fn send_message(&self, text: impl Into<String>) -> EngineResult<TempId> {
        let text = text.into();
        self.request(|reply| Command::SendMessage(text, reply)).await
    }

    /// Send an attachment; returns its provisional id.
    pub async fn send_media(&self, attachment: MediaAttachment) -> EngineResult<TempId> {
        self.request(|reply| Command::SendMedia(attachment, reply))
            .await
    }

    /// Leave the session (or cancel the search).
    pub async fn end_session(&self, reason: impl Into<String>) -> EngineResult<()> {
        let reason = reason.into();
        self.request(|reply| Command::EndSession(reason, reply)).await
    }

    /// Leave the session and search again shortly.
    pub async fn next_session(&self) -> EngineResult<()> {
        self.request(Command::NextSession).await
    }

    /// Flip a local track; returns whether it is now enabled.
    pub async fn toggle_local_track(&self, kind: TrackKind) -> EngineResult<bool> {
        self.request(|reply| Command::ToggleTrack(kind, reply)).await
    }

    /// Acknowledge an inbound message as read.
    pub async fn mark_read(&self, id: MessageId) -> EngineResult<()> {
        self.request(|reply| Command::MarkRead(id, reply)).await
    }

    /// Show or withdraw the typing indicator.
    pub async fn set_typing(&self, typing: bool) -> EngineResult<()> {
        self.request(|reply| Command::SetTyping(typing, reply)).await
    }

    /// Report the partner.
    pub async fn report_partner(
        &self,
        reason: impl Into<String>,
        details: impl Into<String>,
    ) -> EngineResult<()> {
        let (reason, details) = (reason.into(), details.into());
        self.request(|reply| Command::Report {
            reason,
            details,
            reply,
        })
        .await
    }

    /// Block the partner and leave.
    pub async fn block_partner(&self) -> EngineResult<()> {
        self.request(Command::Block).await
    }

    /// Restart the connection sequence.
    pub async fn reconnect(&self) -> EngineResult<()> {
        self.request(Command::Reconnect).await
    }

    /// Current session status.
    pub async fn status(&self) -> EngineResult<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Status(tx))
            .map_err(|_| EngineError::Disposed)?;
        rx.await.map_err(|_| EngineError::Disposed)
    }

    /// Stop the driver; the engine is disposed.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Owner of a running engine.
pub struct EngineDriver<T, M, P> {
    engine: Engine<T, M, P, mpsc::UnboundedSender<Notification>>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedReceiver<TransportSignal>,
    peer_tx: mpsc::UnboundedSender<PeerSignal>,
    peer_rx: mpsc::UnboundedReceiver<PeerSignal>,
}

impl<T, M, P> EngineDriver<T, M, P>
where
    T: Transport,
    M: MediaSource,
    P: PeerConnection,
{
    /// Wrap an engine whose observer is the notification sender.
    pub fn new(
        engine: Engine<T, M, P, mpsc::UnboundedSender<Notification>>,
        signals: mpsc::UnboundedReceiver<TransportSignal>,
    ) -> (Self, EngineHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let driver = Self {
            engine,
            commands,
            signals,
            peer_tx,
            peer_rx,
        };
        (
            driver,
            EngineHandle {
                commands: command_tx,
            },
        )
    }

    /// Sender for peer connection callbacks.
    pub fn peer_signals(&self) -> mpsc::UnboundedSender<PeerSignal> {
        self.peer_tx.clone()
    }

    /// Run until [`EngineHandle::shutdown`] or every handle is dropped.
    pub async fn run(mut self) {
        if let Err(err) = self.engine.init(now()) {
            warn!(target: "duet.engine", %err, "init failed");
            return;
        }
        info!(target: "duet.engine", "driver running");

        loop {
            let deadline = self.engine.next_deadline();
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(Instant::from_std(deadline)).await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(signal) = self.signals.recv() => self.on_transport(signal),
                Some(signal) = self.peer_rx.recv() => self.on_peer(signal),
                () = timer => self.engine.poll_timers(now()),
            }
        }

        self.engine.dispose();
        debug!(target: "duet.engine", "driver stopped");
    }

    fn on_transport(&mut self, signal: TransportSignal) {
        let now = now();
        match signal {
            TransportSignal::Connected => self.engine.on_connected(),
            TransportSignal::Disconnected(reason) => self.engine.on_disconnected(reason, now),
            TransportSignal::ConnectError(error) => self.engine.on_connect_error(&error, now),
            TransportSignal::Event { name, payload } => self.on_event(&name, payload),
        }
    }

    fn on_event(&mut self, name: &str, payload: Value) {
        match self.engine.handle_event(name, payload, now()) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => {
                warn!(target: "duet.engine", event = name, %err, "event hit a fatal condition")
            }
            Err(err) => debug!(target: "duet.engine", event = name, %err, "event not applied"),
        }
    }

    fn on_peer(&mut self, signal: PeerSignal) {
        match signal {
            PeerSignal::LocalCandidate {
                generation,
                candidate,
            } => self.engine.on_local_candidate(generation, candidate),
            PeerSignal::Phase { generation, phase } => {
                self.engine.on_peer_phase(generation, phase, now())
            }
        }
    }

    fn apply(&mut self, command: Command) {
        let engine = &mut self.engine;
        match command {
            Command::StartSearch(criteria, reply) => {
                let _ = reply.send(engine.start_search(criteria));
            }
            Command::CancelSearch(reply) => {
                let _ = reply.send(engine.cancel_search());
            }
            Command::RequestStatus(reply) => {
                let _ = reply.send(engine.request_status());
            }
            Command::SendMessage(text, reply) => {
                let _ = reply.send(engine.send_message(&text));
            }
            Command::SendMedia(attachment, reply) => {
                let _ = reply.send(engine.send_media(attachment));
            }
            Command::EndSession(reason, reply) => {
                let _ = reply.send(engine.end_session(&reason));
            }
            Command::NextSession(reply) => {
                let _ = reply.send(engine.next_session(now()));
            }
            Command::ToggleTrack(kind, reply) => {
                let _ = reply.send(engine.toggle_local_track(kind));
            }
            Command::MarkRead(id, reply) => {
                let _ = reply.send(engine.mark_read(&id));
            }
            Command::SetTyping(typing, reply) => {
                let _ = reply.send(engine.set_typing(typing, now()));
            }
            Command::Report {
                reason,
                details,
                reply,
            } => {
                let _ = reply.send(engine.report_partner(&reason, &details));
            }
            Command::Block(reply) => {
                let _ = reply.send(engine.block_partner());
            }
            Command::Reconnect(reply) => {
                let _ = reply.send(engine.reconnect(now()));
            }
            Command::Status(reply) => {
                let _ = reply.send(engine.status());
            }
            Command::Shutdown => {}
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::core::{EngineConfig, NoMedia, SessionKind};
    use crate::transport::{ChannelTransport, ControlRequest, DisconnectReason, names};

    async fn next_matching(
        notifications: &mut mpsc::UnboundedReceiver<Notification>,
        wanted: impl Fn(&Notification) -> bool,
    ) -> Notification {
        loop {
            let notification = notifications.recv().await.expect("notification stream open");
            if wanted(&notification) {
                return notification;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_end_to_end() {
        let (transport, mut remote, signals) = ChannelTransport::pair();
        let (notify_tx, mut notifications) = mpsc::unbounded_channel();
        let engine = Engine::new(EngineConfig::default(), transport, NoMedia, NoMedia, notify_tx)
            .unwrap();
        let (driver, handle) = EngineDriver::new(engine, signals);
        let task = tokio::spawn(driver.run());

        assert_eq!(remote.control.recv().await, Some(ControlRequest::Connect));
        remote.accept();
        next_matching(&mut notifications, |n| *n == Notification::Connected).await;

        handle
            .start_search(SearchCriteria::new(SessionKind::Text))
            .await
            .unwrap();
        let search = remote.outbound.recv().await.unwrap();
        assert_eq!(search.name, names::START_SEARCH);

        remote.deliver(
            names::MATCH_FOUND,
            json!({"session_id": "s1", "partner_id": "p1", "initiator": true}),
        );
        next_matching(&mut notifications, |n| {
            *n == Notification::SessionStateChanged(SessionStatus::Active)
        })
        .await;
        assert_eq!(handle.status().await.unwrap(), SessionStatus::Active);

        // Link drops; the send is queued and replayed after reconnection.
        remote.drop_connection(DisconnectReason::ServerInitiated);
        let temp_id = handle.send_message("while offline").await.unwrap();

        let started = Instant::now();
        assert_eq!(remote.control.recv().await, Some(ControlRequest::Connect));
        assert!(started.elapsed() >= Duration::from_secs(1));
        next_matching(&mut notifications, |n| {
            *n == Notification::Reconnecting { attempt: 1 }
        })
        .await;

        remote.accept();
        next_matching(&mut notifications, |n| *n == Notification::Reconnected).await;
        let replay = remote.outbound.recv().await.unwrap();
        assert_eq!(replay.name, names::SEND_MESSAGE);
        assert_eq!(replay.payload["temp_id"], temp_id.as_str());

        handle.shutdown();
        task.await.unwrap();
        assert_eq!(remote.control.recv().await, Some(ControlRequest::Disconnect));
        assert!(matches!(
            handle.send_message("late").await,
            Err(EngineError::Disposed)
        ));
    }
}
