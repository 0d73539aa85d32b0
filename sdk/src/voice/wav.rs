use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::debug;

use super::resampler::{AudioResampler, ResamplerError, CHUNK_FRAMES};
use super::transcoder::{PcmStream, Transcoder};
use super::{CHANNELS, FRAME_SAMPLES_PER_CHANNEL, SAMPLE_RATE};
use crate::error::TranscodeError;
use crate::track::Track;

type Source = BufReader<File>;

/// Decodes WAV files in-process, resampling to 48 kHz stereo when needed.
///
/// The file is read one chunk per [`PcmStream::read_next`], so memory stays
/// flat for long tracks and dropping the stream stops decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavTranscoder;

impl Transcoder for WavTranscoder {
    fn open<'a>(
        &'a self,
        track: &'a Track,
    ) -> BoxFuture<'a, Result<Box<dyn PcmStream>, TranscodeError>> {
        let path = PathBuf::from(&track.source_locator);
        async move {
            let decoder = tokio::task::spawn_blocking(move || WavDecoder::open(path))
                .await
                .map_err(|e| TranscodeError::new(format!("wav open task failed: {e}")))??;
            let stream: Box<dyn PcmStream> = Box::new(WavStream {
                decoder: Some(decoder),
            });
            Ok(stream)
        }
        .boxed()
    }
}

enum Samples {
    Float(hound::WavIntoSamples<Source, f32>),
    Int(hound::WavIntoSamples<Source, i32>, f32),
}

impl Samples {
    #[allow(clippy::cast_precision_loss)]
    fn next(&mut self) -> Option<Result<f32, hound::Error>> {
        match self {
            Self::Float(samples) => samples.next(),
            Self::Int(samples, scale) => samples.next().map(|s| s.map(|v| v as f32 * *scale)),
        }
    }
}

/// Blocking half of the stream: owns the open file and the resampler state.
struct WavDecoder {
    name: String,
    samples: Samples,
    channels: usize,
    resampler: Option<AudioResampler>,
    frames_per_read: usize,
    finished: bool,
}

impl WavDecoder {
    #[allow(clippy::cast_precision_loss)]
    fn open(path: PathBuf) -> Result<Self, TranscodeError> {
        let name = path.display().to_string();
        let reader = hound::WavReader::open(&path)
            .map_err(|e| TranscodeError::new(format!("{name}: {e}")))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels);
        if channels == 0 || spec.sample_rate == 0 {
            return Err(TranscodeError::new(format!("{name}: empty format")));
        }

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => Samples::Float(reader.into_samples()),
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                Samples::Int(reader.into_samples(), scale)
            }
        };

        let resampler = if spec.sample_rate == SAMPLE_RATE {
            None
        } else {
            debug!("Resampling {} from {} Hz", name, spec.sample_rate);
            let resampler = AudioResampler::new(spec.sample_rate, SAMPLE_RATE, CHANNELS)
                .map_err(|e| TranscodeError::new(format!("{name}: {e}")))?;
            Some(resampler)
        };
        let frames_per_read = if resampler.is_some() {
            CHUNK_FRAMES
        } else {
            FRAME_SAMPLES_PER_CHANNEL
        };

        Ok(Self {
            name,
            samples,
            channels,
            resampler,
            frames_per_read,
            finished: false,
        })
    }

    /// Reads up to `frames_per_read` frames as planar stereo. Mono is
    /// duplicated, channels beyond stereo are dropped, a trailing partial
    /// frame is discarded.
    fn read_planar(&mut self) -> Result<Vec<Vec<f32>>, TranscodeError> {
        let mut planar = vec![Vec::with_capacity(self.frames_per_read); CHANNELS];
        let mut frame = Vec::with_capacity(self.channels);
        'frames: while planar[0].len() < self.frames_per_read {
            frame.clear();
            while frame.len() < self.channels {
                match self.samples.next() {
                    Some(sample) => frame.push(
                        sample.map_err(|e| TranscodeError::new(format!("{}: {e}", self.name)))?,
                    ),
                    None => break 'frames,
                }
            }
            let left = frame[0];
            let right = frame.get(1).copied().unwrap_or(left);
            planar[0].push(left);
            planar[1].push(right);
        }
        Ok(planar)
    }

    /// Next interleaved chunk, or `None` once the file and the filter tail are spent.
    fn next_chunk(&mut self) -> Result<Option<Vec<i16>>, TranscodeError> {
        while !self.finished {
            let planar = self.read_planar()?;
            let read = planar[0].len();

            let last = read < self.frames_per_read;
            self.finished = last;
            let out = match self.resampler.as_mut() {
                None => planar,
                Some(resampler) => resample(resampler, &planar, last)
                    .map_err(|e| TranscodeError::new(format!("{}: {e}", self.name)))?,
            };

            if !out[0].is_empty() {
                return Ok(Some(interleave(&out)));
            }
        }
        Ok(None)
    }
}

/// Runs one chunk through the resampler, draining the filter tail after the last one.
fn resample(
    resampler: &mut AudioResampler,
    planar: &[Vec<f32>],
    last: bool,
) -> Result<Vec<Vec<f32>>, ResamplerError> {
    let mut out = if planar[0].is_empty() {
        vec![Vec::new(); CHANNELS]
    } else {
        let slices: Vec<&[f32]> = planar.iter().map(Vec::as_slice).collect();
        resampler.process(&slices)?
    };
    if last {
        for (channel, tail) in out.iter_mut().zip(resampler.flush()?) {
            channel.extend(tail);
        }
    }
    Ok(out)
}

#[allow(clippy::cast_possible_truncation)]
fn interleave(planar: &[Vec<f32>]) -> Vec<i16> {
    let len = planar[0].len();
    let mut pcm = Vec::with_capacity(len * CHANNELS);
    for i in 0..len {
        for channel in planar {
            pcm.push((channel[i] * 32_768.0).clamp(-32_768.0, 32_767.0) as i16);
        }
    }
    pcm
}

/// Async face of a [`WavDecoder`]; each read decodes one chunk on the
/// blocking pool.
struct WavStream {
    decoder: Option<WavDecoder>,
}

impl PcmStream for WavStream {
    fn read_next(&mut self) -> BoxFuture<'_, Result<Option<Vec<i16>>, TranscodeError>> {
        async move {
            let Some(mut decoder) = self.decoder.take() else {
                return Ok(None);
            };
            let (decoder, chunk) = tokio::task::spawn_blocking(move || {
                let chunk = decoder.next_chunk();
                (decoder, chunk)
            })
            .await
            .map_err(|e| TranscodeError::new(format!("wav decode task failed: {e}")))?;

            let chunk = chunk?;
            if chunk.is_some() {
                self.decoder = Some(decoder);
            }
            Ok(chunk)
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.decoder = None;
        async {}.boxed()
    }
}
