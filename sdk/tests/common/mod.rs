//! In-process voice endpoint and helpers shared by the session tests.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voicebot_protocol::{
    parse_keepalive, MediaCipher, MediaHeader, Packet, MODE_CHACHA20_POLY1305, SECRET_KEY_LEN,
};
use voicebot_sdk::voice::{AudioCodec, CodecFactory, MemoryTranscoder, FRAME_SAMPLES};
use voicebot_sdk::{
    BotConfig, Connector, ControlLink, EncodeError, MediaSink, ResolutionError, ResolvedSource,
    SessionEvent, SessionHandle, SessionState, SourceResolver, VoiceError, VoiceManager,
};

pub const KEY: [u8; SECRET_KEY_LEN] = [7; SECRET_KEY_LEN];

/// Ssrc of the first identified session; each later `IDENTIFY` gets the next one.
pub const SSRC: u32 = 4242;

#[derive(Default)]
struct Inner {
    packets: Mutex<Vec<Packet>>,
    datagrams: Mutex<Vec<Vec<u8>>>,
    links: Mutex<Vec<ControlLink>>,
    silent: AtomicBool,
    ignore_heartbeats: AtomicBool,
    reject_resume: AtomicBool,
    identified: AtomicU32,
    sessions: Mutex<HashMap<String, u32>>,
}

/// Connector whose control links end in a scripted endpoint task and whose
/// media sink records every datagram.
#[derive(Clone, Default)]
pub struct MockEndpoint {
    inner: Arc<Inner>,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// An endpoint that accepts connections but never answers.
    pub fn silent() -> Self {
        let endpoint = Self::default();
        endpoint.inner.silent.store(true, Ordering::SeqCst);
        endpoint
    }

    /// An endpoint that never acknowledges heartbeats.
    pub fn deaf_to_heartbeats() -> Self {
        let endpoint = Self::default();
        endpoint.inner.ignore_heartbeats.store(true, Ordering::SeqCst);
        endpoint
    }

    /// An endpoint that answers every `RESUME` with `INVALID_SESSION`.
    pub fn rejecting_resume() -> Self {
        let endpoint = Self::default();
        endpoint.inner.reject_resume.store(true, Ordering::SeqCst);
        endpoint
    }

    /// Closes every control link, as if the network dropped.
    pub fn drop_connections(&self) {
        for link in self.inner.links.lock().unwrap().drain(..) {
            link.close();
        }
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.inner.packets.lock().unwrap().clone()
    }

    /// Every media datagram, decrypted, in send order. Keep-alives are skipped.
    pub fn media(&self) -> Vec<(MediaHeader, Vec<u8>)> {
        let cipher = MediaCipher::new(&KEY);
        self.inner
            .datagrams
            .lock()
            .unwrap()
            .iter()
            .filter(|d| parse_keepalive(d).is_none())
            .map(|d| cipher.open(d).unwrap())
            .collect()
    }

    pub fn keepalives(&self) -> usize {
        self.inner
            .datagrams
            .lock()
            .unwrap()
            .iter()
            .filter(|d| parse_keepalive(d).is_some())
            .count()
    }

    /// Tags of the media payloads: `Some(tag)` for audio, `None` for silence.
    pub fn tags(&self) -> Vec<Option<i16>> {
        self.media().iter().map(|(_, payload)| tag_of(payload)).collect()
    }
}

async fn serve(link: ControlLink, inner: Arc<Inner>) {
    while let Ok(packet) = link.recv().await {
        inner.packets.lock().unwrap().push(packet.clone());
        let reply = match packet {
            Packet::Identify { .. } => {
                let n = inner.identified.fetch_add(1, Ordering::SeqCst);
                let session_id = format!("session-{}", n + 1);
                let ssrc = SSRC + n;
                inner.sessions.lock().unwrap().insert(session_id.clone(), ssrc);
                Some(ready(session_id, ssrc))
            }
            Packet::Resume { session_id, .. } => {
                let known = inner.sessions.lock().unwrap().get(&session_id).copied();
                match known {
                    Some(ssrc) if !inner.reject_resume.load(Ordering::SeqCst) => {
                        Some(ready(session_id, ssrc))
                    }
                    _ => Some(Packet::InvalidSession {
                        reason: format!("unknown session {session_id}"),
                    }),
                }
            }
            Packet::SelectProtocol { mode, .. } => Some(Packet::SessionDescription {
                mode,
                secret_key: KEY,
            }),
            Packet::Heartbeat { .. } if inner.ignore_heartbeats.load(Ordering::SeqCst) => None,
            Packet::Heartbeat { nonce } => Some(Packet::HeartbeatAck { nonce }),
            _ => None,
        };
        if let Some(reply) = reply {
            if link.send(reply).await.is_err() {
                break;
            }
        }
    }
}

fn ready(session_id: String, ssrc: u32) -> Packet {
    Packet::Ready {
        session_id,
        ssrc,
        ip: "127.0.0.1".to_string(),
        port: 5004,
        modes: vec!["xsalsa20_poly1305".to_string(), MODE_CHACHA20_POLY1305.to_string()],
        heartbeat_interval_ms: 5_000,
    }
}

impl Connector for MockEndpoint {
    fn open_control<'a>(
        &'a self,
        _endpoint: &'a str,
    ) -> BoxFuture<'a, Result<ControlLink, VoiceError>> {
        let (client, server) = ControlLink::pair();
        self.inner.links.lock().unwrap().push(server.clone());
        if !self.inner.silent.load(Ordering::SeqCst) {
            tokio::spawn(serve(server, Arc::clone(&self.inner)));
        }
        async move { Ok(client) }.boxed()
    }

    fn open_media(
        &self,
        _remote: SocketAddr,
    ) -> BoxFuture<'_, Result<Box<dyn MediaSink>, VoiceError>> {
        let sink: Box<dyn MediaSink> = Box::new(RecordingSink {
            inner: Arc::clone(&self.inner),
        });
        async move { Ok(sink) }.boxed()
    }
}

struct RecordingSink {
    inner: Arc<Inner>,
}

impl MediaSink for RecordingSink {
    fn local_addr(&self) -> SocketAddr {
        ([127, 0, 0, 1], 40_000).into()
    }

    fn try_send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.inner.datagrams.lock().unwrap().push(datagram.to_vec());
        Ok(())
    }
}

/// Encodes a frame as the little-endian bytes of its first sample.
struct TagCodec;

impl AudioCodec for TagCodec {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, EncodeError> {
        out[..2].copy_from_slice(&pcm[0].to_le_bytes());
        Ok(2)
    }
}

pub fn tag_codec() -> CodecFactory {
    Arc::new(|| {
        let codec: Box<dyn AudioCodec> = Box::new(TagCodec);
        Ok(codec)
    })
}

pub fn tag_of(payload: &[u8]) -> Option<i16> {
    (payload.len() == 2).then(|| i16::from_le_bytes([payload[0], payload[1]]))
}

/// `frames` frames of constant PCM carrying `tag`.
pub fn tone(tag: i16, frames: usize) -> Vec<i16> {
    vec![tag; frames * FRAME_SAMPLES]
}

/// Resolves any locator to itself; `long:` locators report five hours.
pub struct EchoResolver;

impl SourceResolver for EchoResolver {
    fn resolve<'a>(
        &'a self,
        locator: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedSource, ResolutionError>> {
        let hours = if locator.starts_with("long:") { 5 * 3600 } else { 60 };
        async move {
            Ok(ResolvedSource {
                stream_locator: locator.to_string(),
                title: locator.to_string(),
                duration: Some(Duration::from_secs(hours)),
            })
        }
        .boxed()
    }
}

pub fn test_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.audio.volume = 1.0;
    config
}

pub fn manager(endpoint: &MockEndpoint, transcoder: MemoryTranscoder, config: BotConfig) -> VoiceManager {
    VoiceManager::new(config)
        .with_connector(endpoint.clone())
        .with_transcoder(transcoder)
        .with_resolver(EchoResolver)
        .with_codec(tag_codec())
}

/// Polls `check` every 10 ms of (virtual) time, failing after `limit`.
pub async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_state(session: &SessionHandle, state: SessionState) {
    wait_for(Duration::from_secs(30), || session.state() == state).await;
}

/// Every event received so far.
pub fn drain_events(session: &SessionHandle) -> Vec<SessionEvent> {
    let events = session.events();
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

/// Asserts consecutive sequence numbers and 960-sample timestamp steps
/// within one ssrc.
pub fn assert_contiguous(media: &[(MediaHeader, Vec<u8>)]) {
    for pair in media.windows(2) {
        let (a, b) = (pair[0].0, pair[1].0);
        assert_eq!(b.ssrc, a.ssrc, "ssrc changed after {a:?}");
        assert_eq!(b.sequence, a.sequence.wrapping_add(1), "sequence gap after {a:?}");
        assert_eq!(b.timestamp, a.timestamp.wrapping_add(960), "timestamp gap after {a:?}");
    }
}

/// Media of one ssrc, in send order.
pub fn media_of(media: &[(MediaHeader, Vec<u8>)], ssrc: u32) -> Vec<(MediaHeader, Vec<u8>)> {
    media.iter().filter(|(h, _)| h.ssrc == ssrc).cloned().collect()
}

/// How many control packets `matches` accepts.
pub fn count_packets(endpoint: &MockEndpoint, matches: impl Fn(&Packet) -> bool) -> usize {
    endpoint.packets().iter().filter(|p| matches(p)).count()
}
