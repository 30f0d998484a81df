//! Async session driver.
//!
//! Runs a [`Session`] on a [`LinkSocket`] inside one tokio task. The task is
//! the only place the session is touched, so receive handling, send
//! completions, timers and caller commands never race.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{SendError, SessionError};
use crate::session::{
    Role, SendStatus, Session, SessionEvent, SessionState, SessionStats,
};

use super::TransportError;
use super::socket::LinkSocket;

/// Capacity of the command channel.
///
/// Events use an unbounded channel so a slow reader never stalls the
/// acknowledgments and retries the driver owes the peer.
pub const CHANNEL_CAPACITY: usize = 64;

enum Command {
    BeginConnecting(oneshot::Sender<Result<(), SessionError>>),
    SendMessage(Vec<u8>, oneshot::Sender<Result<(), SendError>>),
    SetReplyPayload(Vec<u8>, oneshot::Sender<Result<(), SendError>>),
    ClearReplyPayload,
    Role(oneshot::Sender<Role>),
    SetRole(Role, oneshot::Sender<Result<(), SessionError>>),
    State(oneshot::Sender<SessionState>),
    Stats(oneshot::Sender<SessionStats>),
    Close(oneshot::Sender<()>),
}

/// Cloneable handle for talking to a running driver.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::BeginConnecting(_) => "BeginConnecting",
            Command::SendMessage(..) => "SendMessage",
            Command::SetReplyPayload(..) => "SetReplyPayload",
            Command::ClearReplyPayload => "ClearReplyPayload",
            Command::Role(_) => "Role",
            Command::SetRole(..) => "SetRole",
            Command::State(_) => "State",
            Command::Stats(_) => "Stats",
            Command::Close(_) => "Close",
        };
        f.write_str(name)
    }
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| TransportError::DriverStopped)?;
        rx.await.map_err(|_| TransportError::DriverStopped)
    }

    /// Start broadcasting for a peer.
    pub async fn begin_connecting(&self) -> Result<(), TransportError> {
        Ok(self.request(Command::BeginConnecting).await??)
    }

    /// Send an application message; the outcome arrives as an event.
    pub async fn send_message(&self, payload: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        let payload = payload.into();
        Ok(self
            .request(|tx| Command::SendMessage(payload, tx))
            .await??)
    }

    /// Stage a payload for the next acknowledgment.
    pub async fn set_reply_payload(
        &self,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let payload = payload.into();
        Ok(self
            .request(|tx| Command::SetReplyPayload(payload, tx))
            .await??)
    }

    /// Drop any staged reply payload.
    pub async fn clear_reply_payload(&self) -> Result<(), TransportError> {
        self.commands
            .send(Command::ClearReplyPayload)
            .await
            .map_err(|_| TransportError::DriverStopped)
    }

    /// Current role.
    pub async fn role(&self) -> Result<Role, TransportError> {
        self.request(Command::Role).await
    }

    /// Override the negotiated role while connected.
    pub async fn set_role(&self, role: Role) -> Result<(), TransportError> {
        Ok(self.request(|tx| Command::SetRole(role, tx)).await??)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> Result<SessionState, TransportError> {
        self.request(Command::State).await
    }

    /// Snapshot of the session counters.
    pub async fn stats(&self) -> Result<SessionStats, TransportError> {
        self.request(Command::Stats).await
    }

    /// Close the session and stop the driver.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.request(Command::Close).await
    }
}

/// Owns a session and its socket.
#[derive(Debug)]
pub struct SessionDriver {
    session: Session,
    socket: LinkSocket,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionDriver {
    /// Create a driver, returning it with its handle and event stream.
    pub fn new(
        session: Session,
        socket: LinkSocket,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        if socket.link_addr() != session.local_addr() {
            // The peer would drop every packet as foreign.
            warn!(
                socket = %socket.link_addr(),
                session = %session.local_addr(),
                "socket and session link addresses differ"
            );
        }
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let driver = Self {
            session,
            socket,
            commands: command_rx,
            events: event_tx,
        };
        (
            driver,
            SessionHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }

    /// Spawn the driver on the current runtime.
    pub fn spawn(
        session: Session,
        socket: LinkSocket,
    ) -> (JoinHandle<()>, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (driver, handle, events) = Self::new(session, socket);
        (tokio::spawn(driver.run()), handle, events)
    }

    /// Run until closed or every handle is dropped.
    pub async fn run(mut self) {
        debug!(
            link_addr = %self.session.local_addr(),
            medium = ?self.socket.medium(),
            "driver started"
        );

        loop {
            self.flush().await;
            if self.session.state() == SessionState::Closed {
                break;
            }

            let deadline = self.session.poll_timeout();
            let sleep = async {
                match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.session.close(),
                },
                frame = self.socket.recv() => match frame {
                    Ok(frame) => {
                        self.session
                            .handle_packet(Instant::now(), frame.from, &frame.bytes, frame.rssi);
                    }
                    Err(e) => warn!(error = %e, "receive failed"),
                },
                () = sleep => self.session.handle_timeout(Instant::now()),
            }
        }

        debug!("driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::BeginConnecting(reply) => {
                let _ = reply.send(self.session.begin_connecting(now));
            }
            Command::SendMessage(payload, reply) => {
                let _ = reply.send(self.session.send_message(now, payload));
            }
            Command::SetReplyPayload(payload, reply) => {
                let _ = reply.send(self.session.set_reply_payload(payload));
            }
            Command::ClearReplyPayload => self.session.clear_reply_payload(),
            Command::Role(reply) => {
                let _ = reply.send(self.session.role());
            }
            Command::SetRole(role, reply) => {
                let _ = reply.send(self.session.set_role(role));
            }
            Command::State(reply) => {
                let _ = reply.send(self.session.state());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.session.stats().clone());
            }
            Command::Close(reply) => {
                self.session.close();
                let _ = reply.send(());
            }
        }
    }

    /// Send queued transmissions and forward queued events.
    async fn flush(&mut self) {
        while let Some(transmit) = self.session.poll_transmit() {
            let status = match self.socket.send(&transmit).await {
                Ok(()) => SendStatus::Success,
                Err(e) => {
                    warn!(error = %e, dest = ?transmit.destination, "send failed");
                    SendStatus::Failed
                }
            };
            self.session
                .handle_send_completed(Instant::now(), &transmit, status);
        }

        while let Some(event) = self.session.poll_event() {
            // Dropped once the event receiver is gone.
            let _ = self.events.send(event);
        }
    }
}
