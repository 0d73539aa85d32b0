use voicebot_protocol::MediaHeader;

/// Per-ssrc counters of what the media server received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames: u64,
    pub payload_bytes: u64,
    pub keepalives: u64,
    /// Frames whose sequence number was not the successor of the previous one.
    pub sequence_gaps: u64,
    /// Frames whose timestamp did not advance by the previous frame's length.
    pub timestamp_gaps: u64,
    /// Datagrams that failed authentication.
    pub rejected: u64,
    pub last_sequence: Option<u16>,
    pub last_timestamp: Option<u32>,
}

/// Samples per channel in one 20 ms frame at 48 kHz.
const FRAME_TIMESTAMP_STEP: u32 = 960;

impl StreamStats {
    pub fn record(&mut self, header: &MediaHeader, payload_len: usize) {
        if let Some(last) = self.last_sequence {
            if header.sequence != last.wrapping_add(1) {
                self.sequence_gaps += 1;
            }
        }
        if let Some(last) = self.last_timestamp {
            if header.timestamp != last.wrapping_add(FRAME_TIMESTAMP_STEP) {
                self.timestamp_gaps += 1;
            }
        }
        self.frames += 1;
        self.payload_bytes += payload_len as u64;
        self.last_sequence = Some(header.sequence);
        self.last_timestamp = Some(header.timestamp);
    }
}
