//! Voice audio delivery for a music bot: sources are transcoded to PCM,
//! framed into 20 ms Opus packets, paced in real time and sent over an
//! encrypted voice connection, one session per channel.

pub mod config;
pub mod error;
pub mod manager;
pub mod network;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod track;
pub mod voice;

pub use config::{BotConfig, ConfigError};
pub use error::{
    CommandError, EncodeError, EnqueueError, ResolutionError, TranscodeError, VoiceError,
};
pub use manager::VoiceManager;
pub use network::{Connector, ControlLink, MediaSink, NetConnector};
pub use queue::Placement;
pub use resolver::{DirectResolver, ResolvedSource, SourceResolver};
pub use session::{
    LeaveReason, SessionEvent, SessionHandle, SessionState, SessionStatus, SkipReport,
};
pub use track::{ChannelId, Track, TrackId, UserId};
