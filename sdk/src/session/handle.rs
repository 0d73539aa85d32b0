use arc_swap::ArcSwap;
use async_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use super::{Command, SessionEvent, SessionState, SessionStatus, SkipReport};
use crate::error::{CommandError, EnqueueError};
use crate::queue::Placement;
use crate::resolver::{check_length, SourceResolver};
use crate::track::{ChannelId, Track, TrackId, UserId};

/// Cheap, cloneable access to one session.
///
/// Mutations are sent to the session task and applied in order; `status`
/// reads the latest published snapshot without waiting for the task.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) channel_id: ChannelId,
    pub(crate) commands: Sender<Command>,
    pub(crate) events: Receiver<SessionEvent>,
    pub(crate) status: Arc<ArcSwap<SessionStatus>>,
    pub(crate) frames_sent: Arc<AtomicU64>,
    pub(crate) resolver: Arc<dyn SourceResolver>,
    pub(crate) next_track_id: Arc<AtomicU64>,
    pub(crate) max_track_length: Duration,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("channel_id", &self.channel_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// True once the session task has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let mut status = SessionStatus::clone(&self.status.load());
        status.frames_sent = self.frames_sent.load(Ordering::Relaxed);
        status
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.load().state
    }

    /// Session events. Each event goes to one receiver; clones share the stream.
    #[must_use]
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| CommandError::SessionClosed)?;
        rx.await.map_err(|_| CommandError::SessionClosed)
    }

    /// Resolves `locator` and appends it to the queue.
    ///
    /// # Errors
    /// Returns a resolution error if the source is unusable or too long, in
    /// which case nothing is queued.
    pub async fn enqueue(&self, locator: &str, requested_by: UserId) -> Result<TrackId, EnqueueError> {
        self.enqueue_with(locator, requested_by, Placement::End).await
    }

    /// Like [`SessionHandle::enqueue`] with an explicit queue position.
    ///
    /// # Errors
    /// See [`SessionHandle::enqueue`].
    pub async fn enqueue_with(
        &self,
        locator: &str,
        requested_by: UserId,
        placement: Placement,
    ) -> Result<TrackId, EnqueueError> {
        if self.is_closed() {
            return Err(CommandError::SessionClosed.into());
        }
        let source = self.resolver.resolve(locator).await?;
        check_length(&source, self.max_track_length)?;

        let id = TrackId(self.next_track_id.fetch_add(1, Ordering::Relaxed));
        let track = Track {
            id,
            source_locator: source.stream_locator,
            title: source.title,
            duration: source.duration,
            requested_by,
        };
        debug!("[channel {}] Enqueue {} {:?}", self.channel_id, track, placement);
        self.request(|reply| Command::Enqueue {
            track,
            placement,
            reply,
        })
        .await?;
        Ok(id)
    }

    /// Ends the current track and starts the next one.
    ///
    /// # Errors
    /// [`CommandError::NothingPlaying`] when no track is active.
    pub async fn skip(&self) -> Result<SkipReport, CommandError> {
        self.skip_many(1).await
    }

    /// Skips the current track and the next `count - 1` queued ones.
    ///
    /// # Errors
    /// [`CommandError::NothingPlaying`] when no track is active.
    pub async fn skip_many(&self, count: usize) -> Result<SkipReport, CommandError> {
        let count = count.max(1);
        self.request(|reply| Command::Skip { count, reply }).await?
    }

    /// Empties the queue; the current track keeps playing.
    ///
    /// # Errors
    /// [`CommandError::SessionClosed`] if the session has ended.
    pub async fn clear(&self) -> Result<usize, CommandError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// # Errors
    /// [`CommandError::NoSuchPosition`] for an out-of-range position.
    pub async fn remove(&self, position: usize) -> Result<Track, CommandError> {
        self.request(|reply| Command::Remove { position, reply })
            .await?
    }

    /// # Errors
    /// [`CommandError::NoSuchPosition`] if either position is out of range.
    pub async fn move_track(&self, from: usize, to: usize) -> Result<(), CommandError> {
        self.request(|reply| Command::Move { from, to, reply })
            .await?
    }

    /// Halts frame delivery, keeping the current track. Pausing twice is a no-op.
    ///
    /// # Errors
    /// [`CommandError::InvalidState`] unless playing or paused.
    pub async fn pause(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    /// # Errors
    /// [`CommandError::InvalidState`] unless paused or playing.
    pub async fn resume(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    /// Pauses when playing and resumes when paused; returns the new state.
    ///
    /// # Errors
    /// [`CommandError::InvalidState`] when neither applies.
    pub async fn toggle_pause(&self) -> Result<SessionState, CommandError> {
        self.request(|reply| Command::TogglePause { reply }).await?
    }

    /// Clears the queue and ends the current track.
    ///
    /// # Errors
    /// [`CommandError::SessionClosed`] if the session has ended.
    pub async fn stop(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Sets playback gain (1.0 is unchanged, capped at 1.5); returns the value applied.
    ///
    /// # Errors
    /// [`CommandError::SessionClosed`] if the session has ended.
    pub async fn set_volume(&self, volume: f32) -> Result<f32, CommandError> {
        self.request(|reply| Command::SetVolume { volume, reply })
            .await
    }

    /// Replays the current track when it ends naturally.
    ///
    /// # Errors
    /// [`CommandError::SessionClosed`] if the session has ended.
    pub async fn set_repeat(&self, repeat: bool) -> Result<(), CommandError> {
        self.request(|reply| Command::SetRepeat { repeat, reply })
            .await
    }

    /// # Errors
    /// [`CommandError::SessionClosed`] if the session has ended.
    pub async fn shuffle(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Shuffle { reply }).await
    }

    /// Leaves the channel and ends the session.
    ///
    /// # Errors
    /// [`CommandError::SessionClosed`] if it had already ended.
    pub async fn leave(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Leave { reply }).await
    }
}
