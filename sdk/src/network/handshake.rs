use std::time::Duration;
use tokio::net::lookup_host;
use tracing::debug;
use voicebot_protocol::{MediaCipher, Packet, SUPPORTED_MODES};

use super::media::MediaTransport;
use super::{Connector, ControlLink};
use crate::error::VoiceError;
use crate::track::{ChannelId, UserId};

/// Who is connecting where, and whether to resume an earlier session.
#[derive(Debug, Clone)]
pub(crate) struct HandshakeRequest {
    pub(crate) endpoint: String,
    pub(crate) channel_id: ChannelId,
    pub(crate) user_id: UserId,
    pub(crate) resume: Option<String>,
}

/// A fully negotiated voice connection.
pub(crate) struct Connection {
    pub(crate) control: ControlLink,
    pub(crate) media: MediaTransport,
    pub(crate) session_id: String,
    pub(crate) heartbeat_interval: Duration,
    /// The endpoint accepted `resume` and kept the session alive.
    pub(crate) resumed: bool,
}

/// Runs the handshake, giving up after `timeout`.
pub(crate) async fn connect(
    connector: &dyn Connector,
    request: &HandshakeRequest,
    timeout: Duration,
) -> Result<Connection, VoiceError> {
    tokio::time::timeout(timeout, negotiate(connector, request))
        .await
        .map_err(|_| VoiceError::HandshakeTimeout(timeout))?
}

/// Waits for the first packet `pick` accepts, skipping unrelated traffic.
async fn expect<T>(
    control: &ControlLink,
    what: &str,
    mut pick: impl FnMut(Packet) -> Option<T>,
) -> Result<T, VoiceError> {
    loop {
        match control.recv().await? {
            Packet::InvalidSession { reason } => return Err(VoiceError::InvalidSession(reason)),
            packet => {
                let name = packet.name();
                if let Some(value) = pick(packet) {
                    return Ok(value);
                }
                debug!("Ignoring {} while waiting for {}", name, what);
            }
        }
    }
}

struct Ready {
    session_id: String,
    ssrc: u32,
    ip: String,
    port: u16,
    modes: Vec<String>,
    heartbeat_interval_ms: u32,
}

async fn negotiate(
    connector: &dyn Connector,
    request: &HandshakeRequest,
) -> Result<Connection, VoiceError> {
    let control = connector.open_control(&request.endpoint).await?;
    let result = exchange(connector, request, &control).await;
    if result.is_err() {
        control.close();
    }
    result.map(|(media, ready)| Connection {
        resumed: request.resume.as_deref() == Some(ready.session_id.as_str()),
        control,
        media,
        session_id: ready.session_id,
        heartbeat_interval: Duration::from_millis(u64::from(ready.heartbeat_interval_ms.max(1))),
    })
}

async fn exchange(
    connector: &dyn Connector,
    request: &HandshakeRequest,
    control: &ControlLink,
) -> Result<(MediaTransport, Ready), VoiceError> {
    let opening = match &request.resume {
        Some(session_id) => Packet::Resume {
            channel_id: request.channel_id,
            user_id: request.user_id,
            session_id: session_id.clone(),
        },
        None => Packet::Identify {
            channel_id: request.channel_id,
            user_id: request.user_id,
        },
    };
    debug!("Handshake: sending {}", opening.name());
    control.send(opening).await?;

    let ready = expect(control, "READY", |packet| match packet {
        Packet::Ready {
            session_id,
            ssrc,
            ip,
            port,
            modes,
            heartbeat_interval_ms,
        } => Some(Ready {
            session_id,
            ssrc,
            ip,
            port,
            modes,
            heartbeat_interval_ms,
        }),
        _ => None,
    })
    .await?;
    debug!(
        "Handshake: READY ssrc={} media={}:{} modes={:?}",
        ready.ssrc, ready.ip, ready.port, ready.modes
    );

    let mode = SUPPORTED_MODES
        .iter()
        .find(|supported| ready.modes.iter().any(|offered| offered == *supported))
        .ok_or_else(|| {
            VoiceError::Handshake(format!("no supported encryption mode in {:?}", ready.modes))
        })?;

    let remote = lookup_host((ready.ip.as_str(), ready.port))
        .await
        .map_err(|e| VoiceError::Handshake(format!("bad media address {}: {e}", ready.ip)))?
        .next()
        .ok_or_else(|| VoiceError::Handshake(format!("no address for {}", ready.ip)))?;
    let sink = connector.open_media(remote).await?;
    let local = sink.local_addr();

    control
        .send(Packet::SelectProtocol {
            mode: (*mode).to_string(),
            address: local.ip().to_string(),
            port: local.port(),
        })
        .await?;

    let (chosen, secret_key) = expect(control, "SESSION_DESCRIPTION", |packet| match packet {
        Packet::SessionDescription { mode, secret_key } => Some((mode, secret_key)),
        _ => None,
    })
    .await?;
    if chosen != *mode {
        return Err(VoiceError::Handshake(format!(
            "endpoint chose {chosen}, expected {mode}"
        )));
    }
    debug!("Handshake: SESSION_DESCRIPTION received, mode {}", chosen);

    let media = MediaTransport::new(sink, MediaCipher::new(&secret_key), ready.ssrc);
    Ok((media, ready))
}
