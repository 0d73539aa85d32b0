use async_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::encoder::{CodecFactory, FrameEncoder};
use super::pacer::FrameResult;
use super::transcoder::Transcoder;
use crate::error::TranscodeError;
use crate::track::Track;

/// Playback gain shared between a session and its running producer.
#[derive(Debug)]
pub(crate) struct SharedVolume(AtomicU32);

impl SharedVolume {
    pub(crate) fn new(volume: f32) -> Self {
        Self(AtomicU32::new(volume.to_bits()))
    }

    pub(crate) fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, volume: f32) {
        self.0.store(volume.to_bits(), Ordering::Relaxed);
    }
}

/// Everything needed to start producing frames for a track.
#[derive(Clone)]
pub(crate) struct PipelineParts {
    pub(crate) transcoder: Arc<dyn Transcoder>,
    pub(crate) codec: CodecFactory,
    pub(crate) volume: Arc<SharedVolume>,
    pub(crate) lookahead: usize,
}

/// Binding of one track to its transcoder and encoder while it plays.
///
/// Frames are produced by a background task into a small bounded channel; the
/// pacer drains it. Dropping the context cancels the task and discards every
/// buffered frame.
pub(crate) struct PlaybackContext {
    pub(crate) track: Track,
    frames: Receiver<FrameResult>,
    cancel: CancellationToken,
    pub(crate) frames_sent: u64,
}

impl PlaybackContext {
    pub(crate) fn start(track: Track, parts: &PipelineParts) -> Self {
        let (tx, rx) = async_channel::bounded(parts.lookahead.max(1));
        let cancel = CancellationToken::new();
        tokio::spawn(produce(track.clone(), parts.clone(), tx, cancel.clone()));
        Self {
            track,
            frames: rx,
            cancel,
            frames_sent: 0,
        }
    }

    pub(crate) fn frames(&self) -> &Receiver<FrameResult> {
        &self.frames
    }
}

impl Drop for PlaybackContext {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.frames.close();
    }
}

/// Sends one item unless the playback was cancelled first.
async fn forward(tx: &Sender<FrameResult>, cancel: &CancellationToken, item: FrameResult) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

async fn produce(
    track: Track,
    parts: PipelineParts,
    tx: Sender<FrameResult>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        () = cancel.cancelled() => return,
        opened = parts.transcoder.open(&track) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            forward(&tx, &cancel, Err(e)).await;
            return;
        }
    };
    let mut encoder = match (parts.codec)() {
        Ok(codec) => FrameEncoder::new(codec),
        Err(e) => {
            stream.close().await;
            let err = TranscodeError::new(format!("encoder unavailable: {e}"));
            forward(&tx, &cancel, Err(err)).await;
            return;
        }
    };

    'read: loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.read_next() => next,
        };

        match next {
            Ok(Some(pcm)) => {
                encoder.set_volume(parts.volume.get());
                encoder.push(&pcm);
                while let Some(frame) = encoder.next_frame() {
                    if !forward(&tx, &cancel, Ok(frame)).await {
                        break 'read;
                    }
                }
            }
            Ok(None) => {
                if let Some(frame) = encoder.finish() {
                    forward(&tx, &cancel, Ok(frame)).await;
                }
                break;
            }
            Err(e) => {
                warn!("Transcoder failed for {}: {}", track.title, e);
                forward(&tx, &cancel, Err(e)).await;
                break;
            }
        }
    }

    stream.close().await;
    debug!(
        "Producer for {} stopped ({} frames substituted)",
        track.title,
        encoder.substituted_frames()
    );
}
