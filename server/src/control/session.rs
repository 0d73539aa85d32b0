/// A voice session as the endpoint remembers it, keyed by session id.
///
/// Outlives the TCP connection so a client can RESUME after a network drop.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub channel_id: u64,
    pub user_id: u64,
    pub ssrc: u32,
    pub speaking: bool,
    /// Set once SELECT_PROTOCOL succeeded.
    pub mode: Option<String>,
}
