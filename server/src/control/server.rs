use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info};

use crate::config::SIGNAL_CHANNEL_CAPACITY;
use crate::control::handler::ControlHandler;
use crate::control::session::SessionRecord;
use crate::error::EndpointError;
use crate::event::{Event, Signal};

/// ControlServer accepts TCP connections, runs the voice handshake and keeps
/// session records so dropped clients can resume.
pub struct ControlServer {
    sessions: Arc<DashMap<String, SessionRecord>>,
    events_tx: UnboundedSender<Event>,
    signals: broadcast::Sender<Signal>,
    media_addr: SocketAddr,
}

impl ControlServer {
    /// Creates a server advertising `media_addr` and returns the event
    /// receiver for the media server.
    #[must_use]
    pub fn new(media_addr: SocketAddr) -> (Self, UnboundedReceiver<Event>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);

        let server = ControlServer {
            sessions: Arc::new(DashMap::new()),
            events_tx,
            signals,
            media_addr,
        };

        (server, events_rx)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<DashMap<String, SessionRecord>> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn signals(&self) -> broadcast::Sender<Signal> {
        self.signals.clone()
    }

    /// Accepts client connections until the listener fails.
    ///
    /// # Errors
    /// Returns error if accepting a connection fails.
    pub async fn run(self, listener: TcpListener) -> Result<(), EndpointError> {
        info!("ControlServer listening on {}", listener.local_addr()?);

        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let _ = socket.set_nodelay(true);
            let mut handler = ControlHandler::new(
                Arc::clone(&self.sessions),
                socket,
                peer_addr,
                self.signals.subscribe(),
                self.events_tx.clone(),
                self.media_addr,
            );

            tokio::spawn(async move {
                if let Err(e) = handler.handle().await {
                    error!("[{}] Error: {}", peer_addr, e);
                }
            });
        }
    }
}
