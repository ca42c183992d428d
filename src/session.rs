// src/session.rs - WebSocket connection shell around the state reconciler
use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::KioskConfig;
use crate::display::LinkStats;
use crate::machine_state::MachineState;
use crate::protocol::{self, ProtocolError};
use crate::reconciler::{Outcome, StateReconciler};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Requests from the operator side of the kiosk to the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KioskCommand {
    /// Acknowledge a finished or canceled print on the server.
    MarkAsIdle,
    /// Unsubscribe, close the socket and stop reconnecting.
    Shutdown,
}

/// Read operator input on a plain OS thread.
///
/// A line reading `i` (any case) requests [`KioskCommand::MarkAsIdle`]. The
/// thread ends at EOF, on a read error, or once the session is gone. It is
/// never joined, so a blocked read does not hold up process exit.
pub fn spawn_operator_input<R>(reader: R, commands: mpsc::Sender<KioskCommand>) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().eq_ignore_ascii_case("i") && commands.blocking_send(KioskCommand::MarkAsIdle).is_err() {
                break;
            }
        }
    })
}

enum LinkEnd {
    Closed,
    Shutdown,
}

/// Owns the connection lifecycle and is the only writer of the machine state.
pub struct KioskSession {
    config: KioskConfig,
    reconciler: StateReconciler,
    state: Arc<RwLock<MachineState>>,
    stats: Arc<RwLock<LinkStats>>,
    commands: mpsc::Receiver<KioskCommand>,
}

impl KioskSession {
    pub fn new(config: KioskConfig, commands: mpsc::Receiver<KioskCommand>) -> Self {
        let reconciler = StateReconciler::new(&config.machine.id);
        Self {
            config,
            reconciler,
            state: Arc::new(RwLock::new(MachineState::new())),
            stats: Arc::new(RwLock::new(LinkStats::default())),
            commands,
        }
    }

    /// Shared handle for readers such as the render task.
    pub fn state(&self) -> Arc<RwLock<MachineState>> {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<RwLock<LinkStats>> {
        self.stats.clone()
    }

    /// Connect, serve and reconnect until a shutdown command arrives.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let url = self.config.server.url();
        loop {
            tracing::info!("Connecting to {}", url);
            match self.serve(&url).await {
                Ok(LinkEnd::Shutdown) => {
                    self.state.write().await.link_down(self.config.reconnect.on_disconnect);
                    tracing::info!("Session shut down");
                    return Ok(());
                }
                Ok(LinkEnd::Closed) => tracing::info!("Disconnected"),
                Err(e) => tracing::warn!("Connection to {} failed: {}", url, e),
            }

            self.state.write().await.link_down(self.config.reconnect.on_disconnect);

            if self.wait_for_reconnect().await {
                tracing::info!("Session shut down while disconnected");
                return Ok(());
            }
            self.stats.write().await.reconnects += 1;
        }
    }

    /// Sleep out the reconnect interval. Returns true if shutdown was requested.
    async fn wait_for_reconnect(&mut self) -> bool {
        let delay = tokio::time::sleep(self.config.reconnect.interval());
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return false,
                cmd = self.commands.recv() => match cmd {
                    Some(KioskCommand::MarkAsIdle) => {
                        tracing::warn!("Not connected; mark as idle ignored");
                    }
                    Some(KioskCommand::Shutdown) | None => return true,
                },
            }
        }
    }

    async fn serve(&mut self, url: &str) -> Result<LinkEnd, SessionError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Connected");
        self.state.write().await.link_up();

        let subscribe = protocol::subscribe_request(&self.config.machine.id)?;
        tracing::debug!("Subscribe -> {}", subscribe);
        write.send(Message::Text(subscribe.into())).await?;

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.apply(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => return Ok(LinkEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                cmd = self.commands.recv() => match cmd {
                    Some(KioskCommand::MarkAsIdle) => self.mark_as_idle(&mut write).await?,
                    Some(KioskCommand::Shutdown) | None => {
                        let unsubscribe = protocol::unsubscribe_request(&self.config.machine.id)?;
                        if let Err(e) = write.send(Message::Text(unsubscribe.into())).await {
                            tracing::debug!("Unsubscribe not sent: {}", e);
                        }
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(LinkEnd::Shutdown);
                    }
                },
            }
        }
    }

    /// Apply one text frame inside a single write-lock critical section.
    async fn apply(&self, payload: &str) {
        let outcome = {
            let mut state = self.state.write().await;
            self.reconciler.handle_message(payload, &mut state)
        };

        let mut stats = self.stats.write().await;
        stats.frames_received += 1;
        match outcome {
            Outcome::Snapshot => {
                stats.snapshots_applied += 1;
                stats.last_update = Some(Utc::now());
            }
            Outcome::Delta => {
                stats.deltas_applied += 1;
                stats.last_update = Some(Utc::now());
            }
            Outcome::Dropped => stats.dropped += 1,
            Outcome::Ignored => {}
        }
    }

    async fn mark_as_idle<S>(&self, write: &mut S) -> Result<(), SessionError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let status = self.state.read().await.status;
        if !status.is_finished() {
            tracing::warn!("Mark as idle ignored while machine is {}", status);
            return Ok(());
        }
        let request = protocol::mark_as_idle_request(&self.config.machine.id)?;
        tracing::info!("Mark as idle -> {}", request);
        write.send(Message::Text(request.into())).await?;
        Ok(())
    }
}
