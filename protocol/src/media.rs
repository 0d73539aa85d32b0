use crate::error::ProtocolError;
use crate::io::Reader;

/// Size of the fixed media header.
pub const HEADER_LEN: usize = 12;

/// RTP version 2, no padding, no extension, no CSRC.
const VERSION_FLAGS: u8 = 0x80;
const PAYLOAD_TYPE_OPUS: u8 = 0x78;

const KEEPALIVE_MAGIC: [u8; 4] = *b"KEEP";

/// Fixed-layout header that precedes every encrypted media payload.
///
/// Layout: `[0x80][0x78][sequence: u16][timestamp: u32][ssrc: u32]`, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl MediaHeader {
    #[must_use]
    pub fn new(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            sequence,
            timestamp,
            ssrc,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = VERSION_FLAGS;
        out[1] = PAYLOAD_TYPE_OPUS;
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }

    /// Decodes the header at the start of `buf`.
    ///
    /// # Errors
    /// Returns error if fewer than [`HEADER_LEN`] bytes are present or the
    /// version bits are not 2.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(buf);
        let flags = r.read_u8()?;
        if flags >> 6 != 2 {
            return Err(ProtocolError::UnsupportedVersion(flags >> 6));
        }
        let _payload_type = r.read_u8()?;
        Ok(Self {
            sequence: r.read_u16()?,
            timestamp: r.read_u32()?,
            ssrc: r.read_u32()?,
        })
    }
}

/// Keep-alive datagram: `b"KEEP"` followed by the ssrc.
///
/// It carries no sequence number, so it never disturbs the media timeline.
#[must_use]
pub fn encode_keepalive(ssrc: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&KEEPALIVE_MAGIC);
    out[4..].copy_from_slice(&ssrc.to_be_bytes());
    out
}

/// Returns the ssrc if `buf` is a keep-alive datagram.
#[must_use]
pub fn parse_keepalive(buf: &[u8]) -> Option<u32> {
    let (magic, rest) = buf.split_first_chunk::<4>()?;
    if *magic != KEEPALIVE_MAGIC || rest.len() != 4 {
        return None;
    }
    let mut r = Reader::new(rest);
    r.read_u32().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_big_endian() {
        let bytes = MediaHeader::new(0x0102, 0x0304_0506, 0x0708_090A).encode();
        assert_eq!(
            bytes,
            [0x80, 0x78, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]
        );
        assert_eq!(
            MediaHeader::decode(&bytes).unwrap(),
            MediaHeader::new(0x0102, 0x0304_0506, 0x0708_090A)
        );
    }

    #[test]
    fn header_rejects_wrong_version() {
        let mut bytes = MediaHeader::new(1, 2, 3).encode();
        bytes[0] = 0x40;
        assert_eq!(
            MediaHeader::decode(&bytes),
            Err(ProtocolError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn header_rejects_short_buffer() {
        let bytes = MediaHeader::new(1, 2, 3).encode();
        assert!(MediaHeader::decode(&bytes[..11]).unwrap_err().is_incomplete());
    }

    #[test]
    fn keepalive_is_not_a_media_header() {
        let ka = encode_keepalive(77);
        assert_eq!(parse_keepalive(&ka), Some(77));
        assert!(MediaHeader::decode(&ka).is_err());
        assert_eq!(parse_keepalive(&MediaHeader::new(1, 2, 77).encode()), None);
    }
}
