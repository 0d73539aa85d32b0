//! Connections to the voice endpoint: control channel, media datagrams and
//! the handshake that ties them together.

mod control;
pub(crate) mod handshake;
pub(crate) mod media;

use async_channel::{unbounded, Receiver, Sender};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use voicebot_protocol::Packet;

use crate::error::VoiceError;

pub use media::AudioFrame;

/// One end of a packet-level control channel.
///
/// The link is closed when either side goes away; `recv` then reports
/// [`VoiceError::ConnectionLost`].
#[derive(Debug, Clone)]
pub struct ControlLink {
    outgoing: Sender<Packet>,
    incoming: Receiver<Packet>,
}

impl ControlLink {
    #[must_use]
    pub fn new(outgoing: Sender<Packet>, incoming: Receiver<Packet>) -> Self {
        Self { outgoing, incoming }
    }

    /// Two in-process ends wired to each other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    /// # Errors
    /// Returns [`VoiceError::ConnectionLost`] if the link is closed.
    pub async fn send(&self, packet: Packet) -> Result<(), VoiceError> {
        self.outgoing
            .send(packet)
            .await
            .map_err(|_| VoiceError::ConnectionLost("control channel closed".to_string()))
    }

    /// Queues a packet without waiting; the outgoing queue is unbounded.
    ///
    /// # Errors
    /// Returns [`VoiceError::ConnectionLost`] if the link is closed.
    pub fn try_send(&self, packet: Packet) -> Result<(), VoiceError> {
        self.outgoing
            .try_send(packet)
            .map_err(|_| VoiceError::ConnectionLost("control channel closed".to_string()))
    }

    /// # Errors
    /// Returns [`VoiceError::ConnectionLost`] once the link is closed and drained.
    pub async fn recv(&self) -> Result<Packet, VoiceError> {
        self.incoming
            .recv()
            .await
            .map_err(|_| VoiceError::ConnectionLost("control channel closed".to_string()))
    }

    pub fn close(&self) {
        self.outgoing.close();
        self.incoming.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_closed()
    }
}

/// Non-blocking datagram sink towards the endpoint's media address.
pub trait MediaSink: Send {
    fn local_addr(&self) -> SocketAddr;

    /// Sends one datagram or fails immediately; never waits for buffer space.
    ///
    /// # Errors
    /// Returns [`io::ErrorKind::WouldBlock`] when the socket buffer is full.
    fn try_send(&mut self, datagram: &[u8]) -> io::Result<()>;
}

/// Opens the two halves of a voice connection.
pub trait Connector: Send + Sync + 'static {
    fn open_control<'a>(&'a self, endpoint: &'a str)
        -> BoxFuture<'a, Result<ControlLink, VoiceError>>;

    fn open_media(&self, remote: SocketAddr) -> BoxFuture<'_, Result<Box<dyn MediaSink>, VoiceError>>;
}

/// TCP control channel plus a connected UDP socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetConnector;

impl Connector for NetConnector {
    fn open_control<'a>(
        &'a self,
        endpoint: &'a str,
    ) -> BoxFuture<'a, Result<ControlLink, VoiceError>> {
        control::connect(endpoint).boxed()
    }

    fn open_media(&self, remote: SocketAddr) -> BoxFuture<'_, Result<Box<dyn MediaSink>, VoiceError>> {
        async move {
            let bind: SocketAddr = if remote.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(bind)
                .await
                .map_err(|e| VoiceError::io("UDP bind", &e))?;
            socket
                .connect(remote)
                .await
                .map_err(|e| VoiceError::io("UDP connect", &e))?;
            let local_addr = socket
                .local_addr()
                .map_err(|e| VoiceError::io("UDP local address", &e))?;
            tracing::debug!("UDP media socket {} -> {}", local_addr, remote);
            let sink: Box<dyn MediaSink> = Box::new(UdpSink { socket, local_addr });
            Ok(sink)
        }
        .boxed()
    }
}

struct UdpSink {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl MediaSink for UdpSink {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn try_send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.socket.try_send(datagram).map(|_| ())
    }
}
