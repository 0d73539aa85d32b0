use std::fmt;

/// Errors raised while encoding, decoding or opening voice traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    PacketTooShort { expected: usize, got: usize },
    UnknownPacketId(u8),
    InvalidUtf8,
    IncompletePayload { expected: usize, got: usize },
    FieldTooLong { len: usize },
    InvalidKeyLength(usize),
    UnsupportedVersion(u8),
    Sealing,
    Unsealing,
}

impl ProtocolError {
    /// True when more bytes may turn this error into a successful decode.
    ///
    /// Stream readers keep accumulating on these instead of dropping the connection.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Self::PacketTooShort { .. } | Self::IncompletePayload { .. }
        )
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooShort { expected, got } => {
                write!(f, "packet too short: expected at least {expected} bytes, got {got}")
            }
            Self::UnknownPacketId(id) => write!(f, "unknown packet id: 0x{id:02x}"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 encoding"),
            Self::IncompletePayload { expected, got } => {
                write!(f, "incomplete payload: expected {expected} bytes, got {got}")
            }
            Self::FieldTooLong { len } => {
                write!(f, "field of {len} bytes does not fit a u16 length prefix")
            }
            Self::InvalidKeyLength(len) => {
                write!(f, "secret key must be 32 bytes, got {len}")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported media header version {v}"),
            Self::Sealing => write!(f, "failed to encrypt media payload"),
            Self::Unsealing => write!(f, "media payload failed authentication"),
        }
    }
}

impl std::error::Error for ProtocolError {}
