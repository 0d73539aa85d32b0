use voicebot_protocol::SECRET_KEY_LEN;

/// Events emitted by the control server for media server synchronization.
#[derive(Debug, Clone)]
pub enum Event {
    /// A stream completed SELECT_PROTOCOL and got a fresh key.
    StreamKeyed {
        ssrc: u32,
        secret_key: [u8; SECRET_KEY_LEN],
    },
    /// The session left; datagrams for this ssrc are now rejected.
    StreamClosed { ssrc: u32 },
}

/// Broadcast to every control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Close the TCP connection without ending the session, so it can be resumed.
    DropConnection,
}
