//! Sources to raw PCM: interleaved `i16`, [`SAMPLE_RATE`], [`CHANNELS`] channels.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::wav::WavTranscoder;
use super::{CHANNELS, FRAME_SAMPLES, SAMPLE_RATE};
use crate::config::TranscoderConfig;
use crate::error::TranscodeError;
use crate::resolver::is_wav;
use crate::track::Track;

/// Bytes read from ffmpeg per chunk: four frames of s16le stereo.
const READ_CHUNK_BYTES: usize = FRAME_SAMPLES * 2 * 4;

/// Keep only the tail of ffmpeg's stderr for error messages.
const STDERR_TAIL_BYTES: usize = 512;

/// An open PCM stream for one track.
pub trait PcmStream: Send {
    /// Next chunk of samples, or `None` at end of stream.
    fn read_next(&mut self) -> BoxFuture<'_, Result<Option<Vec<i16>>, TranscodeError>>;

    /// Releases the underlying decoder. Safe to call more than once.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

pub trait Transcoder: Send + Sync + 'static {
    fn open<'a>(
        &'a self,
        track: &'a Track,
    ) -> BoxFuture<'a, Result<Box<dyn PcmStream>, TranscodeError>>;
}

/// Decodes anything ffmpeg understands by running it as a child process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    #[must_use]
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    fn command(&self, locator: &str) -> Command {
        let mut command = Command::new(&self.config.ffmpeg_path);
        command.arg("-nostdin").args(["-loglevel", "error"]);
        if locator.starts_with("http://") || locator.starts_with("https://") {
            command.args(&self.config.before_options);
        }
        command
            .arg("-i")
            .arg(locator)
            .args(&self.config.options)
            .args(["-f", "s16le", "-ar"])
            .arg(SAMPLE_RATE.to_string())
            .arg("-ac")
            .arg(CHANNELS.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Transcoder for FfmpegTranscoder {
    fn open<'a>(
        &'a self,
        track: &'a Track,
    ) -> BoxFuture<'a, Result<Box<dyn PcmStream>, TranscodeError>> {
        async move {
            let mut child = self.command(&track.source_locator).spawn().map_err(|e| {
                TranscodeError::new(format!(
                    "failed to spawn {}: {e}",
                    self.config.ffmpeg_path
                ))
            })?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| TranscodeError::new("ffmpeg stdout not captured"))?;
            let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));

            debug!("Started ffmpeg for {}", track.source_locator);
            let stream: Box<dyn PcmStream> = Box::new(FfmpegStream {
                child,
                stdout,
                stderr_task,
                buf: vec![0u8; READ_CHUNK_BYTES],
                carry: None,
                produced: 0,
                finished: false,
            });
            Ok(stream)
        }
        .boxed()
    }
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut all = Vec::new();
    let _ = reader.read_to_end(&mut all).await;
    let start = all.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&all[start..]).trim().to_string()
}

struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    buf: Vec<u8>,
    /// Odd byte left over from the previous read.
    carry: Option<u8>,
    produced: usize,
    finished: bool,
}

impl FfmpegStream {
    async fn exit(&mut self) -> Result<(), TranscodeError> {
        self.finished = true;
        let status: ExitStatus = self
            .child
            .wait()
            .await
            .map_err(|e| TranscodeError::new(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            return Ok(());
        }
        if self.produced == 0 {
            return Err(TranscodeError::new(format!("ffmpeg exited with {status}: {stderr}")));
        }
        warn!("ffmpeg exited with {} after {} bytes: {}", status, self.produced, stderr);
        Ok(())
    }
}

impl PcmStream for FfmpegStream {
    fn read_next(&mut self) -> BoxFuture<'_, Result<Option<Vec<i16>>, TranscodeError>> {
        async move {
            while !self.finished {
                let n = self
                    .stdout
                    .read(&mut self.buf)
                    .await
                    .map_err(|e| TranscodeError::new(format!("reading ffmpeg output: {e}")))?;
                if n == 0 {
                    self.exit().await?;
                    break;
                }
                self.produced += n;
                let samples = le_bytes_to_samples(&mut self.carry, &self.buf[..n]);
                if !samples.is_empty() {
                    return Ok(Some(samples));
                }
            }
            Ok(None)
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        async move {
            if !self.finished {
                self.finished = true;
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
            if let Some(task) = self.stderr_task.take() {
                task.abort();
            }
        }
        .boxed()
    }
}

fn le_bytes_to_samples(carry: &mut Option<u8>, bytes: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
    let mut rest = bytes;
    if let Some(lo) = carry.take() {
        match rest.split_first() {
            Some((&hi, tail)) => {
                samples.push(i16::from_le_bytes([lo, hi]));
                rest = tail;
            }
            None => {
                *carry = Some(lo);
                return samples;
            }
        }
    }
    let mut pairs = rest.chunks_exact(2);
    samples.extend(pairs.by_ref().map(|p| i16::from_le_bytes([p[0], p[1]])));
    *carry = pairs.remainder().first().copied();
    samples
}

/// Picks the in-process WAV reader for `.wav` files and ffmpeg for the rest.
#[derive(Debug, Clone, Default)]
pub struct SourceTranscoder {
    ffmpeg: FfmpegTranscoder,
    wav: WavTranscoder,
}

impl SourceTranscoder {
    #[must_use]
    pub fn new(config: TranscoderConfig) -> Self {
        Self {
            ffmpeg: FfmpegTranscoder::new(config),
            wav: WavTranscoder,
        }
    }
}

impl Transcoder for SourceTranscoder {
    fn open<'a>(
        &'a self,
        track: &'a Track,
    ) -> BoxFuture<'a, Result<Box<dyn PcmStream>, TranscodeError>> {
        if is_wav(Path::new(&track.source_locator)) {
            self.wav.open(track)
        } else {
            self.ffmpeg.open(track)
        }
    }
}

#[derive(Debug, Clone)]
enum MemorySource {
    Pcm(Arc<[i16]>),
    Broken(String),
}

/// Serves PCM registered in memory, keyed by source locator.
///
/// Useful for synthesized audio and for driving sessions without ffmpeg.
#[derive(Debug, Clone, Default)]
pub struct MemoryTranscoder {
    sources: HashMap<String, MemorySource>,
    chunk_samples: Option<usize>,
}

impl MemoryTranscoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interleaved stereo PCM under `locator`.
    #[must_use]
    pub fn with_pcm(mut self, locator: impl Into<String>, pcm: Vec<i16>) -> Self {
        self.sources
            .insert(locator.into(), MemorySource::Pcm(pcm.into()));
        self
    }

    /// Makes `locator` fail to open with `reason`.
    #[must_use]
    pub fn with_failure(mut self, locator: impl Into<String>, reason: impl Into<String>) -> Self {
        self.sources
            .insert(locator.into(), MemorySource::Broken(reason.into()));
        self
    }

    /// Chunk size handed out per `read_next`; defaults to one frame.
    #[must_use]
    pub fn with_chunk_samples(mut self, samples: usize) -> Self {
        self.chunk_samples = Some(samples.max(1));
        self
    }
}

impl Transcoder for MemoryTranscoder {
    fn open<'a>(
        &'a self,
        track: &'a Track,
    ) -> BoxFuture<'a, Result<Box<dyn PcmStream>, TranscodeError>> {
        let opened = match self.sources.get(&track.source_locator) {
            Some(MemorySource::Pcm(pcm)) => {
                let chunk = self.chunk_samples.unwrap_or(FRAME_SAMPLES);
                let stream: Box<dyn PcmStream> =
                    Box::new(MemoryStream::new(Arc::clone(pcm), chunk));
                Ok(stream)
            }
            Some(MemorySource::Broken(reason)) => Err(TranscodeError::new(reason.clone())),
            None => Err(TranscodeError::new(format!(
                "no source registered for {}",
                track.source_locator
            ))),
        };
        async move { opened }.boxed()
    }
}

/// Hands out an in-memory buffer in fixed-size chunks.
pub(super) struct MemoryStream {
    pcm: Arc<[i16]>,
    pos: usize,
    chunk: usize,
}

impl MemoryStream {
    pub(super) fn new(pcm: Arc<[i16]>, chunk: usize) -> Self {
        Self { pcm, pos: 0, chunk }
    }
}

impl PcmStream for MemoryStream {
    fn read_next(&mut self) -> BoxFuture<'_, Result<Option<Vec<i16>>, TranscodeError>> {
        let end = (self.pos + self.chunk).min(self.pcm.len());
        let chunk = (self.pos < end).then(|| self.pcm[self.pos..end].to_vec());
        self.pos = end;
        async move { Ok(chunk) }.boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.pos = self.pcm.len();
        async {}.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackId;

    fn track(locator: &str) -> Track {
        Track {
            id: TrackId(1),
            source_locator: locator.to_string(),
            title: locator.to_string(),
            duration: None,
            requested_by: 0,
        }
    }

    #[test]
    fn odd_reads_are_stitched_back_together() {
        let bytes: Vec<u8> = [1i16, -2, 300, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let mut carry = None;
        let mut out = le_bytes_to_samples(&mut carry, &bytes[..3]);
        assert_eq!(carry, Some(bytes[2]));
        out.extend(le_bytes_to_samples(&mut carry, &bytes[3..4]));
        out.extend(le_bytes_to_samples(&mut carry, &bytes[4..]));
        assert_eq!(out, vec![1, -2, 300, i16::MIN]);
        assert_eq!(carry, None);
    }

    #[tokio::test]
    async fn memory_stream_chunks_then_ends() {
        let transcoder = MemoryTranscoder::new()
            .with_pcm("tone", vec![7; 5])
            .with_chunk_samples(2);
        let mut stream = transcoder.open(&track("tone")).await.unwrap();

        let mut lens = Vec::new();
        while let Some(chunk) = stream.read_next().await.unwrap() {
            lens.push(chunk.len());
        }
        assert_eq!(lens, vec![2, 2, 1]);
        stream.close().await;
    }

    #[tokio::test]
    async fn unknown_and_broken_sources_fail_to_open() {
        let transcoder = MemoryTranscoder::new().with_failure("bad", "corrupt header");
        let err = transcoder.open(&track("bad")).await.err().unwrap();
        assert_eq!(err.reason, "corrupt header");
        assert!(transcoder.open(&track("missing")).await.is_err());
    }

    #[tokio::test]
    async fn missing_ffmpeg_binary_is_a_transcode_error() {
        let transcoder = FfmpegTranscoder::new(TranscoderConfig {
            ffmpeg_path: "/nonexistent/ffmpeg-binary".to_string(),
            ..TranscoderConfig::default()
        });
        let err = transcoder.open(&track("song.mp3")).await.err().unwrap();
        assert!(err.reason.contains("failed to spawn"), "{}", err.reason);
    }
}
