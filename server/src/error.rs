//! Error types for the voice endpoint.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur in the endpoint.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] voicebot_protocol::ProtocolError),

    #[error("Packet out of order from {0}: {1}")]
    UnexpectedPacket(SocketAddr, &'static str),
}
