//! Registry of voice sessions, at most one per channel.

use dashmap::DashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BotConfig;
use crate::network::{Connector, NetConnector};
use crate::resolver::{DirectResolver, SourceResolver};
use crate::session::{SessionActor, SessionHandle, SessionSetup};
use crate::track::ChannelId;
use crate::voice::playback::{PipelineParts, SharedVolume};
use crate::voice::{CodecFactory, OpusCodec, SourceTranscoder, Transcoder};

/// Owns every session of the bot and the collaborators they share.
///
/// Sessions are independent: a fault in one never touches another. A session
/// that ended on its own is replaced on the next `join`.
pub struct VoiceManager {
    config: Arc<BotConfig>,
    connector: Arc<dyn Connector>,
    transcoder: Arc<dyn Transcoder>,
    resolver: Arc<dyn SourceResolver>,
    codec: CodecFactory,
    sessions: DashMap<ChannelId, SessionHandle>,
    next_track_id: Arc<AtomicU64>,
}

impl VoiceManager {
    /// A manager using the network, ffmpeg and Opus.
    #[must_use]
    pub fn new(config: BotConfig) -> Self {
        let codec = OpusCodec::factory(config.audio.bitrate);
        let transcoder = SourceTranscoder::new(config.transcoder.clone());
        Self {
            config: Arc::new(config),
            connector: Arc::new(NetConnector),
            transcoder: Arc::new(transcoder),
            resolver: Arc::new(DirectResolver),
            codec,
            sessions: DashMap::new(),
            next_track_id: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    #[must_use]
    pub fn with_transcoder(mut self, transcoder: impl Transcoder) -> Self {
        self.transcoder = Arc::new(transcoder);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: impl SourceResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: CodecFactory) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Returns the channel's session, starting one if there is none.
    ///
    /// Must be called within a Tokio runtime.
    pub fn join(&self, channel_id: ChannelId) -> SessionHandle {
        let mut entry = self
            .sessions
            .entry(channel_id)
            .or_insert_with(|| self.spawn_session(channel_id));
        if entry.is_closed() {
            debug!("[channel {}] Previous session ended, starting a new one", channel_id);
            *entry = self.spawn_session(channel_id);
        }
        entry.clone()
    }

    fn spawn_session(&self, channel_id: ChannelId) -> SessionHandle {
        info!("[channel {}] Joining", channel_id);
        SessionActor::spawn(SessionSetup {
            channel_id,
            user_id: self.config.endpoint.user_id,
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            resolver: Arc::clone(&self.resolver),
            parts: PipelineParts {
                transcoder: Arc::clone(&self.transcoder),
                codec: Arc::clone(&self.codec),
                volume: Arc::new(SharedVolume::new(self.config.audio.volume)),
                lookahead: self.config.audio.lookahead_frames,
            },
            next_track_id: Arc::clone(&self.next_track_id),
        })
    }

    /// The live session for a channel, if any.
    #[must_use]
    pub fn get(&self, channel_id: ChannelId) -> Option<SessionHandle> {
        self.sessions
            .get(&channel_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Leaves a channel. Returns false if the bot was not in it.
    pub async fn leave(&self, channel_id: ChannelId) -> bool {
        let Some((_, handle)) = self.sessions.remove(&channel_id) else {
            return false;
        };
        handle.leave().await.is_ok()
    }

    /// Channels with a live session.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| *entry.key())
            .collect();
        channels.sort_unstable();
        channels
    }

    /// Leaves every channel.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.sessions.clear();
        for handle in handles {
            let _ = handle.leave().await;
        }
        info!("Voice manager shut down");
    }
}
