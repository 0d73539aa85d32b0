use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, trace, warn};
use voicebot_protocol::{parse_keepalive, MediaCipher, MediaHeader};

use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::EndpointError;
use crate::event::Event;
use crate::media::stream::StreamStats;

/// MediaServer receives encrypted voice datagrams and tracks each stream.
/// Keys arrive from the control server as streams complete their handshake.
pub struct MediaServer {
    events_channel: UnboundedReceiver<Event>,
    ciphers: DashMap<u32, MediaCipher>,
    stats: Arc<DashMap<u32, StreamStats>>,
}

impl MediaServer {
    #[must_use]
    pub fn new(events_channel: UnboundedReceiver<Event>) -> Self {
        MediaServer {
            events_channel,
            ciphers: DashMap::new(),
            stats: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> Arc<DashMap<u32, StreamStats>> {
        Arc::clone(&self.stats)
    }

    /// Receives datagrams until the socket fails.
    ///
    /// # Errors
    /// Returns error if the socket cannot report its address.
    pub async fn run(mut self, socket: UdpSocket) -> Result<(), EndpointError> {
        info!("MediaServer listening on {}", socket.local_addr()?);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                // Keys first, so a stream's first datagram never beats its key
                biased;

                Some(event) = self.events_channel.recv() => self.handle_event(event),

                udp_result = socket.recv_from(&mut buf) => {
                    match udp_result {
                        Ok((n, src_addr)) => self.handle_datagram(src_addr, &buf[..n]),
                        Err(e) => error!("UDP receive error: {}", e),
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::StreamKeyed { ssrc, secret_key } => {
                debug!("Keyed stream {}", ssrc);
                self.ciphers.insert(ssrc, MediaCipher::new(&secret_key));
                self.stats.entry(ssrc).or_default();
            }
            Event::StreamClosed { ssrc } => {
                debug!("Closed stream {}", ssrc);
                self.ciphers.remove(&ssrc);
            }
        }
    }

    fn handle_datagram(&self, src_addr: SocketAddr, datagram: &[u8]) {
        if let Some(ssrc) = parse_keepalive(datagram) {
            match self.stats.get_mut(&ssrc) {
                Some(mut stats) if self.ciphers.contains_key(&ssrc) => stats.keepalives += 1,
                _ => debug!("Keep-alive for unknown stream {} from {}", ssrc, src_addr),
            }
            return;
        }

        let header = match MediaHeader::decode(datagram) {
            Ok(header) => header,
            Err(e) => {
                warn!("Failed to parse datagram from {}: {}", src_addr, e);
                return;
            }
        };
        let Some(cipher) = self.ciphers.get(&header.ssrc) else {
            debug!("Datagram for unknown stream {} from {}", header.ssrc, src_addr);
            return;
        };
        let opened = cipher.open(datagram);
        drop(cipher);

        let Some(mut stats) = self.stats.get_mut(&header.ssrc) else {
            return;
        };
        match opened {
            Ok((header, payload)) => {
                trace!(
                    "Frame seq={} ts={} from stream {} ({} bytes)",
                    header.sequence,
                    header.timestamp,
                    header.ssrc,
                    payload.len()
                );
                stats.record(&header, payload.len());
            }
            Err(e) => {
                warn!("Rejected datagram for stream {} from {}: {}", header.ssrc, src_addr, e);
                stats.rejected += 1;
            }
        }
    }
}
