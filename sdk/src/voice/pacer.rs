//! Real-time release of frames at a fixed cadence.

use async_channel::{Receiver, TryRecvError};
use std::time::Duration;
use tokio::time::Instant;

use super::EncodedFrame;
use crate::error::TranscodeError;

/// What the producer side of a playback hands to the pacer.
pub type FrameResult = Result<EncodedFrame, TranscodeError>;

/// Outcome of advancing the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    OnTime,
    /// The caller was more than a frame late; `missed` ticks were dropped.
    Resynced { missed: u32 },
}

/// What to send on this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pulled {
    Frame(EncodedFrame),
    /// Producer is behind; send silence to keep the timeline continuous.
    Filler,
    Failed(TranscodeError),
    /// Producer finished and every frame was taken.
    Ended,
}

/// Keeps a send deadline that advances from the previous deadline, never from
/// "now", so scheduling jitter does not accumulate.
#[derive(Debug)]
pub struct Pacer {
    frame: Duration,
    deadline: Instant,
    fillers: u64,
    resyncs: u64,
}

impl Pacer {
    #[must_use]
    pub fn new(frame: Duration) -> Self {
        Self {
            frame,
            deadline: Instant::now(),
            fillers: 0,
            resyncs: 0,
        }
    }

    /// Schedules the first tick at `now`.
    pub fn start(&mut self, now: Instant) {
        self.deadline = now;
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    #[cfg(test)]
    async fn wait(&self) {
        tokio::time::sleep_until(self.deadline).await;
    }

    /// Moves the deadline forward after a tick fired at `now`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&mut self, now: Instant) -> Tick {
        let late = now.saturating_duration_since(self.deadline);
        if late > self.frame {
            self.resyncs += 1;
            let missed = (late.as_nanos() / self.frame.as_nanos()) as u32;
            self.deadline = now + self.frame;
            Tick::Resynced { missed }
        } else {
            self.deadline += self.frame;
            Tick::OnTime
        }
    }

    /// Takes the next ready frame without waiting.
    pub fn pull(&mut self, frames: &Receiver<FrameResult>) -> Pulled {
        match frames.try_recv() {
            Ok(Ok(frame)) => Pulled::Frame(frame),
            Ok(Err(e)) => Pulled::Failed(e),
            Err(TryRecvError::Empty) => {
                self.fillers += 1;
                Pulled::Filler
            }
            Err(TryRecvError::Closed) => Pulled::Ended,
        }
    }

    /// Silence frames sent because the producer was behind.
    #[must_use]
    pub fn fillers(&self) -> u64 {
        self.fillers
    }

    #[must_use]
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}
