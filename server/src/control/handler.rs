use dashmap::DashMap;
use rand::random;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};
use voicebot_protocol::{Packet, SECRET_KEY_LEN, SUPPORTED_MODES};

use crate::config::{HEARTBEAT_INTERVAL_MS, PACKET_BUFFER_SIZE};
use crate::control::session::SessionRecord;
use crate::error::EndpointError;
use crate::event::{Event, Signal};

/// Serves one control connection.
pub struct ControlHandler {
    sessions: Arc<DashMap<String, SessionRecord>>,
    socket: TcpStream,
    address: SocketAddr,
    signals: broadcast::Receiver<Signal>,
    events_channel: UnboundedSender<Event>,
    media_addr: SocketAddr,
    session_id: Option<String>,
    finished: bool,
}

impl ControlHandler {
    pub fn new(
        sessions: Arc<DashMap<String, SessionRecord>>,
        socket: TcpStream,
        address: SocketAddr,
        signals: broadcast::Receiver<Signal>,
        events_channel: UnboundedSender<Event>,
        media_addr: SocketAddr,
    ) -> Self {
        Self {
            sessions,
            socket,
            address,
            signals,
            events_channel,
            media_addr,
            session_id: None,
            finished: false,
        }
    }

    /// Reads packets until the client leaves, disconnects or a drop is signalled.
    ///
    /// # Errors
    /// Returns error if writing a response fails.
    pub async fn handle(&mut self) -> Result<(), EndpointError> {
        let mut read_buf = vec![0u8; PACKET_BUFFER_SIZE];
        let mut packet_buffer = Vec::new(); // Accumulates partial packets

        while !self.finished {
            tokio::select! {
                read_result = self.socket.read(&mut read_buf) => {
                    match read_result {
                        Ok(0) => {
                            debug!("[{}] Disconnected", self.address);
                            return Ok(());
                        }
                        Ok(n) => {
                            packet_buffer.extend_from_slice(&read_buf[..n]);

                            // Process all complete packets in the buffer
                            loop {
                                match Packet::decode(&packet_buffer) {
                                    Ok((packet, size)) => {
                                        packet_buffer.drain(..size);
                                        self.handle_packet(packet).await?;
                                    }
                                    Err(e) if e.is_incomplete() => break,
                                    Err(e) => {
                                        warn!("[{}] Protocol error: {}", self.address, e);
                                        packet_buffer.clear();
                                        break;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            error!("[{}] TCP receive error: {}", self.address, e);
                            return Ok(());
                        }
                    }
                }

                signal = self.signals.recv() => {
                    if let Ok(Signal::DropConnection) = signal {
                        info!("[{}] Dropping connection on request", self.address);
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }

    async fn send(&mut self, packet: Packet) -> Result<(), EndpointError> {
        debug!("[{}] Sending {}", self.address, packet.name());
        self.socket.write_all(&packet.encode()?).await?;
        self.socket.flush().await?;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), EndpointError> {
        match packet {
            Packet::Identify {
                channel_id,
                user_id,
            } => self.handle_identify(channel_id, user_id).await,
            Packet::Resume {
                channel_id,
                user_id,
                session_id,
            } => self.handle_resume(channel_id, user_id, session_id).await,
            Packet::SelectProtocol { mode, address, port } => {
                self.handle_select_protocol(mode, address, port).await
            }
            Packet::Heartbeat { nonce } => self.send(Packet::HeartbeatAck { nonce }).await,
            Packet::Speaking { ssrc, speaking } => {
                self.handle_speaking(ssrc, speaking);
                Ok(())
            }
            Packet::Leave { channel_id } => {
                self.handle_leave(channel_id);
                Ok(())
            }
            _ => {
                warn!("[{}] Unexpected packet: {}", self.address, packet.name());
                Ok(())
            }
        }
    }

    fn ready(&self, session_id: &str, ssrc: u32) -> Packet {
        Packet::Ready {
            session_id: session_id.to_string(),
            ssrc,
            ip: self.media_addr.ip().to_string(),
            port: self.media_addr.port(),
            modes: SUPPORTED_MODES.iter().map(|m| (*m).to_string()).collect(),
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
        }
    }

    async fn handle_identify(&mut self, channel_id: u64, user_id: u64) -> Result<(), EndpointError> {
        let session_id = format!("{:016x}", random::<u64>());
        let ssrc = random::<u32>().max(1);
        self.sessions.insert(
            session_id.clone(),
            SessionRecord {
                channel_id,
                user_id,
                ssrc,
                speaking: false,
                mode: None,
            },
        );
        info!(
            "[{}] New session {} for user {} in channel {} (ssrc {})",
            self.address, session_id, user_id, channel_id, ssrc
        );

        let ready = self.ready(&session_id, ssrc);
        self.session_id = Some(session_id);
        self.send(ready).await
    }

    async fn handle_resume(
        &mut self,
        channel_id: u64,
        user_id: u64,
        session_id: String,
    ) -> Result<(), EndpointError> {
        let ssrc = self
            .sessions
            .get(&session_id)
            .filter(|record| record.channel_id == channel_id && record.user_id == user_id)
            .map(|record| record.ssrc);

        let Some(ssrc) = ssrc else {
            warn!("[{}] Cannot resume unknown session {}", self.address, session_id);
            return self
                .send(Packet::InvalidSession {
                    reason: format!("unknown session {session_id}"),
                })
                .await;
        };

        info!("[{}] Resumed session {} (ssrc {})", self.address, session_id, ssrc);
        let ready = self.ready(&session_id, ssrc);
        self.session_id = Some(session_id);
        self.send(ready).await
    }

    async fn handle_select_protocol(
        &mut self,
        mode: String,
        address: String,
        port: u16,
    ) -> Result<(), EndpointError> {
        let Some(session_id) = self.session_id.clone() else {
            error!("{}", EndpointError::UnexpectedPacket(self.address, "SELECT_PROTOCOL"));
            return self
                .send(Packet::InvalidSession {
                    reason: "SELECT_PROTOCOL before READY".to_string(),
                })
                .await;
        };
        if !SUPPORTED_MODES.contains(&mode.as_str()) {
            return self
                .send(Packet::InvalidSession {
                    reason: format!("unsupported mode {mode}"),
                })
                .await;
        }

        let ssrc = self.sessions.get_mut(&session_id).map(|mut record| {
            record.mode = Some(mode.clone());
            record.ssrc
        });
        let Some(ssrc) = ssrc else {
            return self
                .send(Packet::InvalidSession {
                    reason: format!("session {session_id} has ended"),
                })
                .await;
        };

        let secret_key = random::<[u8; SECRET_KEY_LEN]>();
        let _ = self.events_channel.send(Event::StreamKeyed { ssrc, secret_key });
        debug!(
            "[{}] Session {} sends media from {}:{} using {}",
            self.address, session_id, address, port, mode
        );
        self.send(Packet::SessionDescription { mode, secret_key }).await
    }

    fn handle_speaking(&mut self, ssrc: u32, speaking: bool) {
        let Some(session_id) = &self.session_id else { return };
        if let Some(mut record) = self.sessions.get_mut(session_id) {
            if record.ssrc == ssrc {
                record.speaking = speaking;
                debug!("[{}] ssrc {} speaking: {}", self.address, ssrc, speaking);
            }
        }
    }

    fn handle_leave(&mut self, channel_id: u64) {
        if let Some(session_id) = self.session_id.take() {
            if let Some((_, record)) = self.sessions.remove(&session_id) {
                let _ = self.events_channel.send(Event::StreamClosed { ssrc: record.ssrc });
            }
            info!("[{}] Session {} left channel {}", self.address, session_id, channel_id);
        }
        self.finished = true;
    }
}
