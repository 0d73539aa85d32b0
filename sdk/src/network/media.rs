use std::io;
use tracing::{debug, trace, warn};
use voicebot_protocol::{encode_keepalive, MediaCipher, MediaHeader};

use super::MediaSink;
use crate::voice::{EncodedFrame, FRAME_DURATION, FRAME_SAMPLES_PER_CHANNEL};

/// A frame as it goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub payload: Vec<u8>,
    pub duration_ms: u32,
    /// Monotonic per session; the header carries its low 16 bits.
    pub sequence_number: u64,
    pub timestamp: u32,
}

/// Sequence, timestamp and nonce counters of one session.
///
/// They outlive individual connections: a resumed session keeps counting,
/// only a fresh handshake resets them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MediaCounters {
    pub(crate) sequence: u64,
    pub(crate) timestamp: u32,
    nonce: u32,
}

impl MediaCounters {
    /// Assigns the next sequence number and timestamp to `frame`.
    #[allow(clippy::cast_possible_truncation)]
    fn stamp(&mut self, frame: EncodedFrame) -> AudioFrame {
        let audio = AudioFrame {
            payload: frame.payload,
            duration_ms: FRAME_DURATION.as_millis() as u32,
            sequence_number: self.sequence,
            timestamp: self.timestamp,
        };
        self.sequence += 1;
        self.timestamp = self.timestamp.wrapping_add(FRAME_SAMPLES_PER_CHANNEL as u32);
        audio
    }

    fn next_nonce(&mut self) -> u32 {
        let nonce = self.nonce;
        self.nonce = self.nonce.wrapping_add(1);
        nonce
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Sent,
    /// Socket buffer full or send failed; the slot is consumed regardless.
    Dropped,
}

/// Seals and sends frames over the negotiated media path.
pub(crate) struct MediaTransport {
    sink: Box<dyn MediaSink>,
    cipher: MediaCipher,
    ssrc: u32,
    dropped: u64,
}

impl MediaTransport {
    pub(crate) fn new(sink: Box<dyn MediaSink>, cipher: MediaCipher, ssrc: u32) -> Self {
        Self {
            sink,
            cipher,
            ssrc,
            dropped: 0,
        }
    }

    pub(crate) fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Stamps and sends one frame without waiting.
    ///
    /// A frame that cannot be sent right away is dropped, but it still takes
    /// its sequence number so the timeline stays aligned with wall clock.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn send(&mut self, counters: &mut MediaCounters, frame: EncodedFrame) -> SendOutcome {
        let audio = counters.stamp(frame);
        let header = MediaHeader::new(audio.sequence_number as u16, audio.timestamp, self.ssrc);
        let datagram = match self.cipher.seal(&header, &audio.payload, counters.next_nonce()) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Dropping frame {}: {}", audio.sequence_number, e);
                self.dropped += 1;
                return SendOutcome::Dropped;
            }
        };

        match self.sink.try_send(&datagram) {
            Ok(()) => {
                trace!(
                    "Sent frame seq={} ts={} ({} bytes)",
                    audio.sequence_number,
                    audio.timestamp,
                    datagram.len()
                );
                SendOutcome::Sent
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("Socket busy, dropping frame {}", audio.sequence_number);
                self.dropped += 1;
                SendOutcome::Dropped
            }
            Err(e) => {
                warn!("Send of frame {} failed: {}", audio.sequence_number, e);
                self.dropped += 1;
                SendOutcome::Dropped
            }
        }
    }

    pub(crate) fn send_keepalive(&mut self) {
        if let Err(e) = self.sink.try_send(&encode_keepalive(self.ssrc)) {
            debug!("Keep-alive not sent: {}", e);
        }
    }
}
