use arc_swap::ArcSwap;
use async_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use voicebot_protocol::Packet;

use super::handle::SessionHandle;
use super::{
    Command, LeaveReason, SessionEvent, SessionState, SessionStatus, SkipReport, Transition,
};
use crate::config::BotConfig;
use crate::error::{CommandError, VoiceError};
use crate::network::handshake::{self, Connection, HandshakeRequest};
use crate::network::media::{MediaCounters, MediaTransport, SendOutcome};
use crate::network::{Connector, ControlLink};
use crate::queue::{Placement, TrackQueue};
use crate::resolver::SourceResolver;
use crate::track::{ChannelId, Track, UserId};
use crate::voice::encoder::MAX_VOLUME;
use crate::voice::playback::{PipelineParts, PlaybackContext};
use crate::voice::{EncodedFrame, Pacer, Pulled, Tick, FRAME_DURATION};

/// Session events buffered for a slow consumer before new ones are dropped.
const EVENT_BUFFER: usize = 64;

/// Commands buffered between handles and the session task.
const COMMAND_BUFFER: usize = 32;

/// Everything a new session needs from its manager.
pub(crate) struct SessionSetup {
    pub(crate) channel_id: ChannelId,
    pub(crate) user_id: UserId,
    pub(crate) config: Arc<BotConfig>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) resolver: Arc<dyn SourceResolver>,
    pub(crate) parts: PipelineParts,
    pub(crate) next_track_id: Arc<AtomicU64>,
}

/// The live half of a connection, present only between a successful
/// handshake and the next loss.
struct Link {
    control: ControlLink,
    media: MediaTransport,
    heartbeat_interval: Duration,
    next_heartbeat: Instant,
    next_keepalive: Instant,
    unacked: u32,
    nonce: u64,
}

/// Single owner of a session's state. Every mutation happens on its task,
/// so commands, ticks and connection events never race each other.
pub(crate) struct SessionActor {
    channel_id: ChannelId,
    user_id: UserId,
    config: Arc<BotConfig>,
    connector: Arc<dyn Connector>,
    parts: PipelineParts,

    commands: Receiver<Command>,
    events: Sender<SessionEvent>,
    status: Arc<ArcSwap<SessionStatus>>,
    frames_sent: Arc<AtomicU64>,

    state: SessionState,
    queue: TrackQueue,
    current: Option<PlaybackContext>,
    repeat: bool,

    link: Option<Link>,
    session_id: Option<String>,
    counters: MediaCounters,
    pacer: Pacer,
    pending: Option<JoinHandle<Result<Connection, VoiceError>>>,
    reconnect_attempt: u32,

    idle_since: Option<Instant>,
    dirty: bool,
    closed: Option<LeaveReason>,
}

impl SessionActor {
    /// Starts the session task and returns a handle to it.
    pub(crate) fn spawn(setup: SessionSetup) -> SessionHandle {
        let (command_tx, command_rx) = async_channel::bounded(COMMAND_BUFFER);
        let (event_tx, event_rx) = async_channel::bounded(EVENT_BUFFER);
        let status = Arc::new(ArcSwap::from_pointee(SessionStatus::new(
            setup.channel_id,
            setup.parts.volume.get(),
        )));
        let frames_sent = Arc::new(AtomicU64::new(0));

        let handle = SessionHandle {
            channel_id: setup.channel_id,
            commands: command_tx,
            events: event_rx,
            status: Arc::clone(&status),
            frames_sent: Arc::clone(&frames_sent),
            resolver: setup.resolver,
            next_track_id: setup.next_track_id,
            max_track_length: setup.config.queue.max_track_length(),
        };

        let actor = Self {
            channel_id: setup.channel_id,
            user_id: setup.user_id,
            config: setup.config,
            connector: setup.connector,
            parts: setup.parts,
            commands: command_rx,
            events: event_tx,
            status,
            frames_sent,
            state: SessionState::Idle,
            queue: TrackQueue::new(),
            current: None,
            repeat: false,
            link: None,
            session_id: None,
            counters: MediaCounters::default(),
            pacer: Pacer::new(FRAME_DURATION),
            pending: None,
            reconnect_attempt: 0,
            idle_since: None,
            dirty: true,
            closed: None,
        };
        tokio::spawn(actor.run());
        handle
    }

    async fn run(mut self) {
        info!("[channel {}] Session started", self.channel_id);
        self.apply(Transition::Connect);
        self.begin_connect(Duration::ZERO);
        self.publish();

        while self.closed.is_none() {
            let control = self.link.as_ref().map(|link| link.control.clone());
            let tick_at = self.state.may_transmit().then(|| self.pacer.deadline());
            let heartbeat_at = self.link.as_ref().map(|link| link.next_heartbeat);
            let keepalive_at = self
                .link
                .as_ref()
                .filter(|_| !self.state.may_transmit())
                .map(|link| link.next_keepalive);
            let idle_at = self
                .idle_since
                .map(|since| since + self.config.queue.idle_timeout());

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Ok(command) => self.on_command(command),
                    // every handle is gone, nobody can steer this session any more
                    Err(_) => self.shutdown(LeaveReason::Requested),
                },

                result = join_pending(&mut self.pending) => {
                    self.pending = None;
                    self.on_handshake(result);
                }

                packet = recv_control(control.as_ref()) => self.on_control(packet),

                () = sleep_until_opt(tick_at) => self.on_tick(),

                () = sleep_until_opt(heartbeat_at) => self.on_heartbeat(),

                () = sleep_until_opt(keepalive_at) => self.on_keepalive(),

                () = sleep_until_opt(idle_at) => {
                    info!("[channel {}] Idle for {:?}, leaving", self.channel_id, self.config.queue.idle_timeout());
                    self.shutdown(LeaveReason::Idle);
                }
            }

            if self.dirty {
                self.publish();
            }
        }

        self.publish();
        if let Some(reason) = self.closed.take() {
            info!(
                "[channel {}] Session ended: {:?} ({} frames, {} fillers, {} resyncs)",
                self.channel_id,
                reason,
                self.frames_sent.load(Ordering::Relaxed),
                self.pacer.fillers(),
                self.pacer.resyncs()
            );
            self.emit(SessionEvent::Left(reason));
        }
        self.events.close();
        self.commands.close();
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("[channel {}] Event dropped: {:?}", self.channel_id, e.into_inner());
        }
    }

    fn publish(&mut self) {
        self.status.store(Arc::new(SessionStatus {
            channel_id: self.channel_id,
            state: self.state,
            current_track: self.current.as_ref().map(|ctx| ctx.track.clone()),
            queue: self.queue.snapshot(),
            volume: self.parts.volume.get(),
            repeat: self.repeat,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
        }));
        self.dirty = false;
    }

    /// Applies a state machine input, announcing speaking changes to the endpoint.
    fn apply(&mut self, input: Transition) {
        let next = match self.state.transition(input) {
            Ok(next) => next,
            Err(e) => {
                warn!("[channel {}] Ignored transition: {}", self.channel_id, e);
                return;
            }
        };
        let previous = self.state;
        if previous == next {
            return;
        }

        debug!("[channel {}] {} -> {}", self.channel_id, previous, next);
        self.state = next;
        self.dirty = true;
        self.idle_since = (next == SessionState::Ready).then(Instant::now);

        if previous.may_transmit() != next.may_transmit() {
            self.send_speaking(next.may_transmit());
        }
    }

    fn send_speaking(&self, speaking: bool) {
        let Some(link) = &self.link else { return };
        let packet = Packet::Speaking {
            ssrc: link.media.ssrc(),
            speaking,
        };
        if let Err(e) = link.control.try_send(packet) {
            debug!("[channel {}] Speaking update not sent: {}", self.channel_id, e);
        }
    }

    // Connection lifecycle

    fn begin_connect(&mut self, delay: Duration) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        let connector = Arc::clone(&self.connector);
        let request = HandshakeRequest {
            endpoint: self.config.endpoint.address.clone(),
            channel_id: self.channel_id,
            user_id: self.user_id,
            resume: self.session_id.clone(),
        };
        let timeout = self.config.session.handshake_timeout();

        self.pending = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            handshake::connect(connector.as_ref(), &request, timeout).await
        }));
    }

    fn on_handshake(&mut self, result: Result<Connection, VoiceError>) {
        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                warn!("[channel {}] Handshake failed: {}", self.channel_id, e);
                if matches!(e, VoiceError::InvalidSession(_)) {
                    self.session_id = None;
                }
                self.apply(Transition::HandshakeFailed);
                self.reconnect(e.to_string());
                return;
            }
        };

        // a resumed session keeps its timeline, a fresh one starts over
        if !connection.resumed {
            self.counters = MediaCounters::default();
        }
        info!(
            "[channel {}] Connected, session {} (resumed: {})",
            self.channel_id, connection.session_id, connection.resumed
        );

        let now = Instant::now();
        self.session_id = Some(connection.session_id);
        self.link = Some(Link {
            control: connection.control,
            media: connection.media,
            heartbeat_interval: connection.heartbeat_interval,
            next_heartbeat: now + connection.heartbeat_interval,
            next_keepalive: now + self.config.session.keepalive_interval(),
            unacked: 0,
            nonce: 0,
        });
        self.reconnect_attempt = 0;
        self.apply(Transition::Handshaked);
        self.emit(SessionEvent::Connected {
            resumed: connection.resumed,
        });
        self.start_next();
    }

    /// Tears down the live connection; the interrupted track is replayed
    /// from its start once the session is back.
    fn connection_lost(&mut self, reason: String) {
        warn!("[channel {}] Connection lost: {}", self.channel_id, reason);
        if let Some(link) = self.link.take() {
            link.control.close();
            if link.media.dropped() > 0 {
                debug!("[channel {}] {} frames dropped on this connection", self.channel_id, link.media.dropped());
            }
        }
        if let Some(ctx) = self.current.take() {
            self.queue.push(ctx.track.clone(), Placement::Next);
        }
        self.apply(Transition::ConnectionLost);
        self.reconnect(reason);
    }

    fn reconnect(&mut self, reason: String) {
        self.reconnect_attempt += 1;
        let limit = self.config.session.reconnect_attempts;
        if self.reconnect_attempt > limit {
            error!(
                "[channel {}] Giving up after {} reconnect attempts: {}",
                self.channel_id, limit, reason
            );
            self.shutdown(LeaveReason::ConnectionFailed(reason));
            return;
        }

        let attempt = self.reconnect_attempt;
        let delay = self.config.session.backoff(attempt);
        info!(
            "[channel {}] Reconnecting in {:?} (attempt {}/{})",
            self.channel_id, delay, attempt, limit
        );
        self.emit(SessionEvent::Reconnecting { attempt, delay });
        self.apply(Transition::Reconnect);
        self.begin_connect(delay);
    }

    fn on_control(&mut self, packet: Result<Packet, VoiceError>) {
        match packet {
            Ok(Packet::HeartbeatAck { nonce }) => {
                if let Some(link) = self.link.as_mut() {
                    trace!("[channel {}] Heartbeat {} acknowledged", self.channel_id, nonce);
                    link.unacked = 0;
                }
            }
            Ok(Packet::InvalidSession { reason }) => {
                self.session_id = None;
                self.connection_lost(format!("session invalidated: {reason}"));
            }
            Ok(packet) => debug!("[channel {}] Ignoring {}", self.channel_id, packet.name()),
            Err(e) => self.connection_lost(e.to_string()),
        }
    }

    fn on_heartbeat(&mut self) {
        let max_missed = self.config.session.max_missed_heartbeats.max(1);
        let Some(link) = self.link.as_mut() else { return };
        if link.unacked >= max_missed {
            let reason = format!("{} heartbeats unanswered", link.unacked);
            self.connection_lost(reason);
            return;
        }

        link.nonce += 1;
        link.unacked += 1;
        link.next_heartbeat = Instant::now() + link.heartbeat_interval;
        let sent = link.control.try_send(Packet::Heartbeat { nonce: link.nonce });
        if let Err(e) = sent {
            self.connection_lost(e.to_string());
        }
    }

    fn on_keepalive(&mut self) {
        let interval = self.config.session.keepalive_interval();
        if let Some(link) = self.link.as_mut() {
            link.media.send_keepalive();
            link.next_keepalive = Instant::now() + interval;
        }
    }

    // Playback

    fn on_tick(&mut self) {
        if let Tick::Resynced { missed } = self.pacer.advance(Instant::now()) {
            debug!("[channel {}] Pacer resynced, {} frames late", self.channel_id, missed);
        }

        let Some(current) = self.current.as_ref() else {
            self.apply(Transition::QueueDrained);
            return;
        };

        match self.pacer.pull(current.frames()) {
            Pulled::Frame(frame) => self.transmit(frame),
            Pulled::Filler => self.transmit(EncodedFrame::silence()),
            Pulled::Failed(error) => {
                if let Some(ctx) = self.current.take() {
                    warn!("[channel {}] {} failed: {}", self.channel_id, ctx.track, error);
                    self.emit(SessionEvent::TrackFailed {
                        track: ctx.track.clone(),
                        error,
                    });
                }
                self.transmit(EncodedFrame::silence());
                self.start_next();
            }
            Pulled::Ended => {
                if let Some(ctx) = self.current.take() {
                    info!(
                        "[channel {}] Finished {} after {} frames ({} fillers so far)",
                        self.channel_id,
                        ctx.track,
                        ctx.frames_sent,
                        self.pacer.fillers()
                    );
                    if self.repeat {
                        self.queue.push(ctx.track.clone(), Placement::Next);
                    }
                    self.emit(SessionEvent::TrackFinished(ctx.track.clone()));
                }
                self.transmit(EncodedFrame::silence());
                self.start_next();
            }
        }
    }

    fn transmit(&mut self, frame: EncodedFrame) {
        if !self.state.may_transmit() {
            return;
        }
        let Some(link) = self.link.as_mut() else { return };
        if link.media.send(&mut self.counters, frame) == SendOutcome::Dropped {
            trace!("[channel {}] Frame dropped", self.channel_id);
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        if let Some(ctx) = self.current.as_mut() {
            ctx.frames_sent += 1;
        }
    }

    /// Starts the head of the queue, or settles in Ready when it is empty.
    fn start_next(&mut self) {
        self.dirty = true;
        if !self.state.is_connected() {
            return;
        }
        let Some(track) = self.queue.pop() else {
            if matches!(self.state, SessionState::Playing | SessionState::Paused) {
                self.apply(Transition::QueueDrained);
            }
            return;
        };

        info!("[channel {}] Playing {}", self.channel_id, track);
        // keep the cadence across back-to-back tracks
        if self.state != SessionState::Playing {
            self.pacer.start(Instant::now());
        }
        self.current = Some(PlaybackContext::start(track.clone(), &self.parts));
        self.apply(Transition::TrackStarted);
        self.emit(SessionEvent::TrackStarted(track));
    }

    // Commands

    fn on_command(&mut self, command: Command) {
        self.dirty = true;
        match command {
            Command::Enqueue {
                track,
                placement,
                reply,
            } => {
                self.enqueue(track, placement);
                let _ = reply.send(());
            }
            Command::Skip { count, reply } => {
                let _ = reply.send(self.skip(count));
            }
            Command::Clear { reply } => {
                let removed = self.queue.clear();
                debug!("[channel {}] Cleared {} queued tracks", self.channel_id, removed);
                let _ = reply.send(removed);
            }
            Command::Remove { position, reply } => {
                let removed = self
                    .queue
                    .remove(position)
                    .ok_or(CommandError::NoSuchPosition(position));
                let _ = reply.send(removed);
            }
            Command::Move { from, to, reply } => {
                let invalid = if from >= self.queue.len() { from } else { to };
                let moved = if self.queue.move_track(from, to) {
                    Ok(())
                } else {
                    Err(CommandError::NoSuchPosition(invalid))
                };
                let _ = reply.send(moved);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            Command::TogglePause { reply } => {
                let toggled = match self.state {
                    SessionState::Paused => self.resume(),
                    _ => self.pause(),
                };
                let _ = reply.send(toggled.map(|()| self.state));
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::SetVolume { volume, reply } => {
                let volume = if volume.is_nan() {
                    0.0
                } else {
                    volume.clamp(0.0, MAX_VOLUME)
                };
                self.parts.volume.set(volume);
                let _ = reply.send(volume);
            }
            Command::SetRepeat { repeat, reply } => {
                self.repeat = repeat;
                let _ = reply.send(());
            }
            Command::Shuffle { reply } => {
                self.queue.shuffle();
                let _ = reply.send(());
            }
            Command::Leave { reply } => {
                self.shutdown(LeaveReason::Requested);
                let _ = reply.send(());
            }
        }
    }

    fn enqueue(&mut self, track: Track, placement: Placement) {
        if placement == Placement::Now {
            if let Some(ctx) = self.current.take() {
                self.queue.push(ctx.track.clone(), Placement::Next);
            }
            self.queue.push(track, Placement::Now);
            self.start_next();
            return;
        }

        self.queue.push(track, placement);
        if self.state == SessionState::Ready {
            self.start_next();
        }
    }

    fn skip(&mut self, count: usize) -> Result<SkipReport, CommandError> {
        // dropping the context discards every frame it buffered
        let skipped = match self.current.take() {
            Some(ctx) => ctx.track.clone(),
            None => return Err(CommandError::NothingPlaying),
        };
        let dropped = self.queue.drop_front(count.saturating_sub(1));
        info!(
            "[channel {}] Skipped {} (+{} queued)",
            self.channel_id,
            skipped,
            dropped.len()
        );
        self.emit(SessionEvent::TrackSkipped(skipped.clone()));
        self.start_next();

        Ok(SkipReport {
            skipped,
            dropped,
            now_playing: self.current.as_ref().map(|ctx| ctx.track.clone()),
        })
    }

    fn pause(&mut self) -> Result<(), CommandError> {
        match self.state {
            SessionState::Paused => Ok(()),
            SessionState::Playing => {
                self.apply(Transition::Pause);
                Ok(())
            }
            state => Err(CommandError::InvalidState(state)),
        }
    }

    fn resume(&mut self) -> Result<(), CommandError> {
        match self.state {
            SessionState::Playing => Ok(()),
            SessionState::Paused => {
                self.pacer.start(Instant::now());
                self.apply(Transition::Resume);
                Ok(())
            }
            state => Err(CommandError::InvalidState(state)),
        }
    }

    fn stop(&mut self) {
        let removed = self.queue.clear();
        if let Some(ctx) = self.current.take() {
            info!("[channel {}] Stopped {} ({} queued removed)", self.channel_id, ctx.track, removed);
            self.emit(SessionEvent::TrackSkipped(ctx.track.clone()));
        }
        if matches!(self.state, SessionState::Playing | SessionState::Paused) {
            self.apply(Transition::QueueDrained);
        }
    }

    fn shutdown(&mut self, reason: LeaveReason) {
        if self.closed.is_some() {
            return;
        }
        self.current = None;
        if !reason.is_involuntary() {
            self.queue.clear();
        }
        self.apply(Transition::Leave);

        if let Some(link) = self.link.take() {
            // dropping our end lets the socket task flush LEAVE before it stops
            if let Err(e) = link.control.try_send(Packet::Leave {
                channel_id: self.channel_id,
            }) {
                debug!("[channel {}] LEAVE not sent: {}", self.channel_id, e);
            }
        }
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.idle_since = None;
        self.dirty = true;
        self.closed = Some(reason);
    }
}

async fn join_pending(
    pending: &mut Option<JoinHandle<Result<Connection, VoiceError>>>,
) -> Result<Connection, VoiceError> {
    match pending {
        Some(handle) => handle
            .await
            .unwrap_or_else(|e| Err(VoiceError::Handshake(format!("handshake task failed: {e}")))),
        None => std::future::pending().await,
    }
}

async fn recv_control(control: Option<&ControlLink>) -> Result<Packet, VoiceError> {
    match control {
        Some(control) => control.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
