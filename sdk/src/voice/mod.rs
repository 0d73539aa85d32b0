//! Audio side of the pipeline: sources to paced, encoded frames.

use std::time::Duration;

pub mod encoder;
pub mod pacer;
pub(crate) mod playback;
mod resampler;
pub mod transcoder;
mod wav;

pub use encoder::{AudioCodec, CodecFactory, EncodedFrame, FrameEncoder, OpusCodec};
pub use pacer::{Pacer, Pulled, Tick};
pub use transcoder::{
    FfmpegTranscoder, MemoryTranscoder, PcmStream, SourceTranscoder, Transcoder,
};
pub use wav::WavTranscoder;

/// Output sample rate of every transcoder.
pub const SAMPLE_RATE: u32 = 48_000;

/// Interleaved channel count of every transcoder.
pub const CHANNELS: usize = 2;

/// Wall-clock length of one frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Samples per channel in one frame (20 ms at 48 kHz).
pub const FRAME_SAMPLES_PER_CHANNEL: usize = 960;

/// Interleaved samples in one frame.
pub const FRAME_SAMPLES: usize = FRAME_SAMPLES_PER_CHANNEL * CHANNELS;
