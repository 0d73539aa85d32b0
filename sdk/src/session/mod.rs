//! One voice session per channel: a single task owns the connection, the
//! queue and the current playback; callers talk to it through [`SessionHandle`].

mod actor;
mod handle;
mod state;

use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{CommandError, TranscodeError};
use crate::queue::Placement;
use crate::track::{ChannelId, Track};

pub(crate) use actor::{SessionActor, SessionSetup};
pub use handle::SessionHandle;
pub use state::{InvalidTransition, SessionState, Transition};

/// Queued tracks listed by [`SessionStatus::describe`] before summarising the rest.
const STATUS_LISTED_TRACKS: usize = 10;

/// Something that happened in a session, for whoever reports to users.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { resumed: bool },
    TrackStarted(Track),
    TrackFinished(Track),
    TrackSkipped(Track),
    TrackFailed { track: Track, error: TranscodeError },
    Reconnecting { attempt: u32, delay: Duration },
    Left(LeaveReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveReason {
    Requested,
    /// Nothing was queued for the configured idle timeout.
    Idle,
    /// Reconnect attempts ran out.
    ConnectionFailed(String),
}

impl LeaveReason {
    #[must_use]
    pub fn is_involuntary(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_))
    }
}

/// Point-in-time view of a session, safe to read from any task.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub channel_id: ChannelId,
    pub state: SessionState,
    pub current_track: Option<Track>,
    pub queue: Vec<Track>,
    pub volume: f32,
    pub repeat: bool,
    /// Media frames handed to the transport over the session's lifetime.
    pub frames_sent: u64,
}

impl SessionStatus {
    pub(crate) fn new(channel_id: ChannelId, volume: f32) -> Self {
        Self {
            channel_id,
            state: SessionState::Idle,
            current_track: None,
            queue: Vec::new(),
            volume,
            repeat: false,
            frames_sent: 0,
        }
    }

    /// Multi-line summary: now playing, then the head of the queue.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = match &self.current_track {
            Some(track) => format!("Now playing: {track} [{}]", self.state),
            None => format!("Nothing playing [{}]", self.state),
        };
        let _ = write!(
            out,
            "\nVolume: {:.0}%{}",
            self.volume * 100.0,
            if self.repeat { ", repeat on" } else { "" }
        );

        if self.queue.is_empty() {
            out.push_str("\nQueue is empty");
            return out;
        }
        for (i, track) in self.queue.iter().take(STATUS_LISTED_TRACKS).enumerate() {
            let _ = write!(out, "\n{}. {track}", i + 1);
        }
        if self.queue.len() > STATUS_LISTED_TRACKS {
            let _ = write!(out, "\n...and {} more", self.queue.len() - STATUS_LISTED_TRACKS);
        }
        out
    }
}

/// What a skip removed and what plays now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipReport {
    pub skipped: Track,
    /// Queued tracks dropped by `skip_many`.
    pub dropped: Vec<Track>,
    pub now_playing: Option<Track>,
}

type Reply<T> = oneshot::Sender<T>;

/// Requests serialized through the session task.
pub(crate) enum Command {
    Enqueue {
        track: Track,
        placement: Placement,
        reply: Reply<()>,
    },
    Skip {
        count: usize,
        reply: Reply<Result<SkipReport, CommandError>>,
    },
    Clear {
        reply: Reply<usize>,
    },
    Remove {
        position: usize,
        reply: Reply<Result<Track, CommandError>>,
    },
    Move {
        from: usize,
        to: usize,
        reply: Reply<Result<(), CommandError>>,
    },
    Pause {
        reply: Reply<Result<(), CommandError>>,
    },
    Resume {
        reply: Reply<Result<(), CommandError>>,
    },
    TogglePause {
        reply: Reply<Result<SessionState, CommandError>>,
    },
    Stop {
        reply: Reply<()>,
    },
    SetVolume {
        volume: f32,
        reply: Reply<f32>,
    },
    SetRepeat {
        repeat: bool,
        reply: Reply<()>,
    },
    Shuffle {
        reply: Reply<()>,
    },
    Leave {
        reply: Reply<()>,
    },
}
