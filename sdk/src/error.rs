//! Error types for the voice pipeline.

use std::time::Duration;
use thiserror::Error;

use crate::session::SessionState;

/// A locator could not be turned into a playable track.
///
/// Returned to the caller of `enqueue`; the track never reaches the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("unsupported locator: {0}")]
    Unsupported(String),

    #[error("track is {actual:?} long, limit is {limit:?}")]
    TooLong { actual: Duration, limit: Duration },

    #[error("resolver failed: {0}")]
    Failed(String),
}

/// Decoding a track's source failed. Fatal to that track only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transcode failed: {reason}")]
pub struct TranscodeError {
    pub reason: String,
}

impl TranscodeError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A single frame could not be compressed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("encode failed: {0}")]
pub struct EncodeError(pub String);

/// Faults of the voice connection itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("resume rejected: {0}")]
    InvalidSession(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] voicebot_protocol::ProtocolError),
}

impl VoiceError {
    pub(crate) fn io(context: &str, err: &std::io::Error) -> Self {
        Self::ConnectionLost(format!("{context}: {err}"))
    }
}

/// Result of a queue or playback command that could not take effect.
///
/// These are typed no-ops, not faults: the session is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("nothing is playing")]
    NothingPlaying,

    #[error("not allowed while {0}")]
    InvalidState(SessionState),

    #[error("no track at position {0}")]
    NoSuchPosition(usize),

    #[error("session has ended")]
    SessionClosed,
}

/// Everything `enqueue` can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Command(#[from] CommandError),
}
