//! Reference voice endpoint: answers the control handshake over TCP and
//! receives encrypted media datagrams over UDP.

pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod media;

use dashmap::DashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::error;

use crate::control::server::ControlServer;
use crate::control::session::SessionRecord;
use crate::event::Signal;
use crate::media::server::MediaServer;

pub use crate::error::EndpointError;
pub use crate::media::stream::StreamStats;

/// A running endpoint. Both servers stop when it is dropped.
pub struct Endpoint {
    control_addr: SocketAddr,
    media_addr: SocketAddr,
    sessions: Arc<DashMap<String, SessionRecord>>,
    stats: Arc<DashMap<u32, StreamStats>>,
    signals: broadcast::Sender<Signal>,
    tasks: Vec<JoinHandle<()>>,
}

impl Endpoint {
    /// Binds both sockets and starts serving.
    ///
    /// # Errors
    /// Returns error if either address cannot be bound.
    pub async fn bind(control: &str, media: &str) -> Result<Self, EndpointError> {
        let listener = TcpListener::bind(control).await?;
        let socket = UdpSocket::bind(media).await?;
        let control_addr = listener.local_addr()?;
        let media_addr = socket.local_addr()?;

        let mut advertised = media_addr;
        if let Some(ip) = config::public_ip() {
            advertised.set_ip(ip);
        } else if advertised.ip().is_unspecified() {
            advertised.set_ip(Ipv4Addr::LOCALHOST.into());
        }

        let (control_server, events_rx) = ControlServer::new(advertised);
        let media_server = MediaServer::new(events_rx);
        let sessions = control_server.sessions();
        let signals = control_server.signals();
        let stats = media_server.stats();

        let tasks = vec![
            tokio::spawn(async move {
                if let Err(e) = control_server.run(listener).await {
                    error!("ControlServer stopped: {}", e);
                }
            }),
            tokio::spawn(async move {
                if let Err(e) = media_server.run(socket).await {
                    error!("MediaServer stopped: {}", e);
                }
            }),
        ];

        Ok(Self {
            control_addr,
            media_addr,
            sessions,
            stats,
            signals,
            tasks,
        })
    }

    #[must_use]
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    #[must_use]
    pub fn media_addr(&self) -> SocketAddr {
        self.media_addr
    }

    /// Counters for one stream, once it has been keyed.
    #[must_use]
    pub fn stats(&self, ssrc: u32) -> Option<StreamStats> {
        self.stats.get(&ssrc).map(|entry| *entry.value())
    }

    /// Every keyed stream, by ssrc.
    #[must_use]
    pub fn streams(&self) -> Vec<u32> {
        self.stats.iter().map(|entry| *entry.key()).collect()
    }

    /// Sessions that have not left, including disconnected ones awaiting resume.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Closes every control connection while keeping sessions resumable.
    pub fn drop_connections(&self) {
        let _ = self.signals.send(Signal::DropConnection);
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
