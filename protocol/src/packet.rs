use crate::error::ProtocolError;
use crate::io::{Reader, Writer};
use crate::packet_id::PacketId;

/// Length of the media session key.
pub const SECRET_KEY_LEN: usize = 32;

/// Control channel packets exchanged with a voice endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Packet {
    // Client to endpoint
    Identify {
        channel_id: u64,
        user_id: u64,
    },
    SelectProtocol {
        mode: String,
        address: String,
        port: u16,
    },
    Heartbeat {
        nonce: u64,
    },
    Speaking {
        ssrc: u32,
        speaking: bool,
    },
    Resume {
        channel_id: u64,
        user_id: u64,
        session_id: String,
    },
    Leave {
        channel_id: u64,
    },

    // Endpoint to client
    Ready {
        session_id: String,
        ssrc: u32,
        ip: String,
        port: u16,
        modes: Vec<String>,
        heartbeat_interval_ms: u32,
    },
    SessionDescription {
        mode: String,
        secret_key: [u8; SECRET_KEY_LEN],
    },
    HeartbeatAck {
        nonce: u64,
    },
    InvalidSession {
        reason: String,
    },
}

impl Packet {
    /// Encode packet to wire format.
    ///
    /// Format: `[packet_id: u8][payload_len: u16][payload...]`
    ///
    /// # Errors
    /// Returns [`ProtocolError::FieldTooLong`] if a string, list or the payload
    /// itself does not fit its `u16` length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = Writer::new();
        w.write_u8(self.id());

        let len_pos = w.reserve_u16();
        let payload_start = w.position();

        match self {
            Self::Identify {
                channel_id,
                user_id,
            } => {
                w.write_u64(*channel_id);
                w.write_u64(*user_id);
            }
            Self::SelectProtocol {
                mode,
                address,
                port,
            } => {
                w.write_string(mode);
                w.write_string(address);
                w.write_u16(*port);
            }
            Self::Heartbeat { nonce } | Self::HeartbeatAck { nonce } => w.write_u64(*nonce),
            Self::Speaking { ssrc, speaking } => {
                w.write_u32(*ssrc);
                w.write_bool(*speaking);
            }
            Self::Resume {
                channel_id,
                user_id,
                session_id,
            } => {
                w.write_u64(*channel_id);
                w.write_u64(*user_id);
                w.write_string(session_id);
            }
            Self::Leave { channel_id } => w.write_u64(*channel_id),
            Self::Ready {
                session_id,
                ssrc,
                ip,
                port,
                modes,
                heartbeat_interval_ms,
            } => {
                w.write_string(session_id);
                w.write_u32(*ssrc);
                w.write_string(ip);
                w.write_u16(*port);
                w.write_strings(modes);
                w.write_u32(*heartbeat_interval_ms);
            }
            Self::SessionDescription { mode, secret_key } => {
                w.write_string(mode);
                w.write_blob(secret_key);
            }
            Self::InvalidSession { reason } => w.write_string(reason),
        }

        let payload_len = w.position() - payload_start;
        w.patch_len(len_pos, payload_len);
        w.finish()
    }

    /// Decode packet from wire format.
    ///
    /// Returns decoded packet and number of bytes consumed from the buffer.
    ///
    /// # Errors
    /// Returns error if buffer is incomplete or contains invalid data. Use
    /// [`ProtocolError::is_incomplete`] to tell the two apart.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let mut header = Reader::new(buf);
        let packet_id = PacketId::try_from(header.read_u8()?)?;
        let payload_len = header.read_u16()? as usize;
        let remaining = header.remaining();

        if remaining.len() < payload_len {
            return Err(ProtocolError::IncompletePayload {
                expected: payload_len,
                got: remaining.len(),
            });
        }

        let mut r = Reader::new(&remaining[..payload_len]);

        let packet = match packet_id {
            PacketId::Identify => Self::Identify {
                channel_id: r.read_u64()?,
                user_id: r.read_u64()?,
            },
            PacketId::SelectProtocol => Self::SelectProtocol {
                mode: r.read_string()?,
                address: r.read_string()?,
                port: r.read_u16()?,
            },
            PacketId::Heartbeat => Self::Heartbeat {
                nonce: r.read_u64()?,
            },
            PacketId::Speaking => Self::Speaking {
                ssrc: r.read_u32()?,
                speaking: r.read_bool()?,
            },
            PacketId::Resume => Self::Resume {
                channel_id: r.read_u64()?,
                user_id: r.read_u64()?,
                session_id: r.read_string()?,
            },
            PacketId::Leave => Self::Leave {
                channel_id: r.read_u64()?,
            },
            PacketId::Ready => Self::Ready {
                session_id: r.read_string()?,
                ssrc: r.read_u32()?,
                ip: r.read_string()?,
                port: r.read_u16()?,
                modes: r.read_strings()?,
                heartbeat_interval_ms: r.read_u32()?,
            },
            PacketId::SessionDescription => {
                let mode = r.read_string()?;
                let key = r.read_blob()?;
                let secret_key = key
                    .try_into()
                    .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?;
                Self::SessionDescription { mode, secret_key }
            }
            PacketId::HeartbeatAck => Self::HeartbeatAck {
                nonce: r.read_u64()?,
            },
            PacketId::InvalidSession => Self::InvalidSession {
                reason: r.read_string()?,
            },
        };

        Ok((packet, header.position() + payload_len))
    }

    /// Returns the packet type ID.
    #[must_use]
    pub fn id(&self) -> u8 {
        match self {
            Self::Identify { .. } => PacketId::Identify,
            Self::SelectProtocol { .. } => PacketId::SelectProtocol,
            Self::Heartbeat { .. } => PacketId::Heartbeat,
            Self::Speaking { .. } => PacketId::Speaking,
            Self::Resume { .. } => PacketId::Resume,
            Self::Leave { .. } => PacketId::Leave,
            Self::Ready { .. } => PacketId::Ready,
            Self::SessionDescription { .. } => PacketId::SessionDescription,
            Self::HeartbeatAck { .. } => PacketId::HeartbeatAck,
            Self::InvalidSession { .. } => PacketId::InvalidSession,
        }
        .as_u8()
    }

    /// Short name used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "IDENTIFY",
            Self::SelectProtocol { .. } => "SELECT_PROTOCOL",
            Self::Heartbeat { .. } => "HEARTBEAT",
            Self::Speaking { .. } => "SPEAKING",
            Self::Resume { .. } => "RESUME",
            Self::Leave { .. } => "LEAVE",
            Self::Ready { .. } => "READY",
            Self::SessionDescription { .. } => "SESSION_DESCRIPTION",
            Self::HeartbeatAck { .. } => "HEARTBEAT_ACK",
            Self::InvalidSession { .. } => "INVALID_SESSION",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unreadable_literal, clippy::needless_pass_by_value)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let encoded = packet.encode().expect("encode failed");
        let (decoded, size) = Packet::decode(&encoded).expect("decode failed");
        assert_eq!(packet, decoded);
        assert_eq!(encoded.len(), size);
    }

    #[test]
    fn roundtrip_ready_with_modes() {
        roundtrip(Packet::Ready {
            session_id: "c0ffee".to_string(),
            ssrc: 0xDEADBEEF,
            ip: "127.0.0.1".to_string(),
            port: 50000,
            modes: vec![
                "aead_chacha20_poly1305_rtpsize".to_string(),
                "xsalsa20_poly1305".to_string(),
            ],
            heartbeat_interval_ms: 13750,
        });
    }

    #[test]
    fn roundtrip_session_description_key() {
        let mut secret_key = [0u8; SECRET_KEY_LEN];
        for (i, b) in secret_key.iter_mut().enumerate() {
            *b = u8::try_from(i).unwrap();
        }
        roundtrip(Packet::SessionDescription {
            mode: "aead_chacha20_poly1305_rtpsize".to_string(),
            secret_key,
        });
    }

    #[test]
    fn roundtrip_resume_and_speaking() {
        roundtrip(Packet::Resume {
            channel_id: 42,
            user_id: 7,
            session_id: String::new(),
        });
        roundtrip(Packet::Speaking {
            ssrc: 1,
            speaking: true,
        });
    }

    #[test]
    fn decode_reports_partial_buffers_as_incomplete() {
        let encoded = Packet::Heartbeat { nonce: 99 }.encode().unwrap();
        for cut in 0..encoded.len() {
            let err = Packet::decode(&encoded[..cut]).unwrap_err();
            assert!(err.is_incomplete(), "cut at {cut} gave {err}");
        }
    }

    #[test]
    fn decode_consumes_only_the_first_packet() {
        let mut stream = Packet::Heartbeat { nonce: 1 }.encode().unwrap();
        let first_len = stream.len();
        stream.extend(Packet::HeartbeatAck { nonce: 2 }.encode().unwrap());

        let (packet, used) = Packet::decode(&stream).unwrap();
        assert_eq!(packet, Packet::Heartbeat { nonce: 1 });
        assert_eq!(used, first_len);

        let (packet, _) = Packet::decode(&stream[used..]).unwrap();
        assert_eq!(packet, Packet::HeartbeatAck { nonce: 2 });
    }

    #[test]
    fn decode_rejects_unknown_id() {
        let err = Packet::decode(&[0x7F, 0, 0]).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownPacketId(0x7F));
        assert!(!err.is_incomplete());
    }

    #[test]
    fn decode_rejects_short_key() {
        // SessionDescription with an empty mode and a 3-byte key
        let buf = [0x22, 0, 7, 0, 0, 0, 3, 1, 2, 3];
        assert_eq!(
            Packet::decode(&buf).unwrap_err(),
            ProtocolError::InvalidKeyLength(3)
        );
    }

    #[test]
    fn encode_rejects_oversized_string() {
        let packet = Packet::InvalidSession {
            reason: "x".repeat(70_000),
        };
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::FieldTooLong { .. })
        ));
    }
}
