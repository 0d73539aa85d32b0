use opus::{Application, Bitrate, Channels};
use std::sync::Arc;
use tracing::warn;

use super::{FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::EncodeError;

/// A complete Opus packet that decodes to 20 ms of silence.
pub const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Upper bound on one encoded packet.
const MAX_PACKET_BYTES: usize = 4000;

/// Highest accepted playback gain (150 %).
pub const MAX_VOLUME: f32 = 1.5;

/// Compresses one frame of interleaved PCM.
pub trait AudioCodec: Send {
    /// Encodes exactly [`FRAME_SAMPLES`] samples into `out`, returning the packet length.
    ///
    /// # Errors
    /// Returns [`EncodeError`] if the codec rejects the frame.
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, EncodeError>;
}

/// Builds a fresh codec for each track.
pub type CodecFactory = Arc<dyn Fn() -> Result<Box<dyn AudioCodec>, EncodeError> + Send + Sync>;

/// Opus at 48 kHz stereo, tuned for music.
pub struct OpusCodec {
    encoder: opus::Encoder,
}

impl OpusCodec {
    /// # Errors
    /// Returns error if libopus refuses the encoder settings.
    pub fn new(bitrate: i32) -> Result<Self, EncodeError> {
        let mut encoder = opus::Encoder::new(SAMPLE_RATE, Channels::Stereo, Application::Audio)
            .map_err(|e| EncodeError(format!("opus error: {e}")))?;
        encoder
            .set_bitrate(Bitrate::Bits(bitrate))
            .map_err(|e| EncodeError(format!("opus bitrate {bitrate}: {e}")))?;
        Ok(Self { encoder })
    }

    #[must_use]
    pub fn factory(bitrate: i32) -> CodecFactory {
        Arc::new(move || {
            let codec: Box<dyn AudioCodec> = Box::new(Self::new(bitrate)?);
            Ok(codec)
        })
    }
}

impl AudioCodec for OpusCodec {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, EncodeError> {
        self.encoder
            .encode(pcm, out)
            .map_err(|e| EncodeError(format!("Failed to encode Opus frame: {e}")))
    }
}

/// One 20 ms unit of encoded audio, not yet sequenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub payload: Vec<u8>,
    pub silence: bool,
}

impl EncodedFrame {
    #[must_use]
    pub fn silence() -> Self {
        Self {
            payload: OPUS_SILENCE.to_vec(),
            silence: true,
        }
    }
}

/// Slices a PCM stream into frames and encodes each one.
///
/// A frame the codec rejects is replaced by [`OPUS_SILENCE`] so the caller's
/// timeline never loses a slot.
pub struct FrameEncoder {
    codec: Box<dyn AudioCodec>,
    pending: Vec<i16>,
    out: Vec<u8>,
    gain: f32,
    substituted: u64,
}

impl FrameEncoder {
    #[must_use]
    pub fn new(codec: Box<dyn AudioCodec>) -> Self {
        Self {
            codec,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            out: vec![0u8; MAX_PACKET_BYTES],
            gain: 1.0,
            substituted: 0,
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.gain = volume.clamp(0.0, MAX_VOLUME);
    }

    pub fn push(&mut self, pcm: &[i16]) {
        self.pending.extend_from_slice(pcm);
    }

    /// Encodes the next full frame if enough samples are buffered.
    pub fn next_frame(&mut self) -> Option<EncodedFrame> {
        if self.pending.len() < FRAME_SAMPLES {
            return None;
        }
        let frame: Vec<i16> = self.pending.drain(..FRAME_SAMPLES).collect();
        Some(self.encode_frame(frame))
    }

    /// Zero-pads and encodes whatever partial frame is left at end of stream.
    pub fn finish(&mut self) -> Option<EncodedFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.pending);
        frame.resize(FRAME_SAMPLES, 0);
        Some(self.encode_frame(frame))
    }

    /// Frames replaced by silence so far.
    #[must_use]
    pub fn substituted_frames(&self) -> u64 {
        self.substituted
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_frame(&mut self, mut pcm: Vec<i16>) -> EncodedFrame {
        if (self.gain - 1.0).abs() > f32::EPSILON {
            for sample in &mut pcm {
                *sample = (f32::from(*sample) * self.gain).clamp(-32_768.0, 32_767.0) as i16;
            }
        }

        match self.codec.encode(&pcm, &mut self.out) {
            Ok(len) => EncodedFrame {
                payload: self.out[..len].to_vec(),
                silence: false,
            },
            Err(e) => {
                self.substituted += 1;
                warn!("{}, substituting silence", e);
                EncodedFrame::silence()
            }
        }
    }
}
