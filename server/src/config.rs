//! Configuration constants for the voice endpoint.

use std::env;
use std::net::IpAddr;

/// Default port for the control (TCP) server.
pub const DEFAULT_CONTROL_PORT: u16 = 9001;

/// Default port for the media (UDP) server.
pub const DEFAULT_MEDIA_PORT: u16 = 9002;

/// Buffer size for reading packets.
pub const PACKET_BUFFER_SIZE: usize = 4096;

/// Largest media datagram accepted.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Heartbeat interval announced in READY.
pub const HEARTBEAT_INTERVAL_MS: u32 = 5_000;

/// Capacity of the signal channel shared by control handlers.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Returns the control server port from `CONTROL_PORT` env var or default.
#[must_use]
pub fn control_port() -> u16 {
    env::var("CONTROL_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONTROL_PORT)
}

/// Returns the media server port from `MEDIA_PORT` env var or default.
#[must_use]
pub fn media_port() -> u16 {
    env::var("MEDIA_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MEDIA_PORT)
}

/// Address announced to clients for media, from `PUBLIC_IP` if set.
#[must_use]
pub fn public_ip() -> Option<IpAddr> {
    env::var("PUBLIC_IP").ok().and_then(|v| v.parse().ok())
}
