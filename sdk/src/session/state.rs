use std::fmt;

/// Lifecycle of one voice connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Ready,
    Playing,
    Paused,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Inputs that move a session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connect,
    Handshaked,
    HandshakeFailed,
    TrackStarted,
    QueueDrained,
    Pause,
    Resume,
    ConnectionLost,
    /// Automatic retry after a transient fault.
    Reconnect,
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub input: Transition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not valid while {}", self.input, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl SessionState {
    /// The state reached by applying `input`, if that input is allowed here.
    ///
    /// # Errors
    /// Returns [`InvalidTransition`] for inputs the current state does not accept.
    pub fn transition(self, input: Transition) -> Result<Self, InvalidTransition> {
        use SessionState as S;
        use Transition as T;

        let next = match (self, input) {
            (S::Idle, T::Connect) | (S::Disconnected, T::Reconnect) => S::Connecting,
            (S::Connecting, T::Handshaked) => S::Ready,
            (S::Connecting, T::HandshakeFailed) => S::Disconnected,
            (S::Ready | S::Playing | S::Paused, T::TrackStarted) => S::Playing,
            (S::Playing | S::Paused, T::QueueDrained) => S::Ready,
            (S::Playing | S::Paused, T::Pause) => S::Paused,
            (S::Paused | S::Playing, T::Resume) => S::Playing,
            (S::Connecting | S::Ready | S::Playing | S::Paused, T::ConnectionLost) => {
                S::Disconnected
            }
            (_, T::Leave) => S::Disconnected,
            (from, input) => return Err(InvalidTransition { from, input }),
        };
        Ok(next)
    }

    /// Whether media may be sent in this state.
    #[must_use]
    pub fn may_transmit(self) -> bool {
        self == Self::Playing
    }

    /// Whether the session holds a live connection.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::Playing | Self::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState as S;
    use super::Transition as T;
    use super::*;

    fn run(inputs: &[Transition]) -> Result<SessionState, InvalidTransition> {
        inputs
            .iter()
            .try_fold(S::Idle, |state, input| state.transition(*input))
    }

    #[test]
    fn normal_lifecycle() {
        assert_eq!(
            run(&[T::Connect, T::Handshaked, T::TrackStarted, T::Pause, T::Resume]),
            Ok(S::Playing)
        );
        assert_eq!(
            run(&[T::Connect, T::Handshaked, T::TrackStarted, T::QueueDrained]),
            Ok(S::Ready)
        );
    }

    #[test]
    fn pause_twice_stays_paused() {
        let paused = run(&[T::Connect, T::Handshaked, T::TrackStarted, T::Pause]).unwrap();
        assert_eq!(paused.transition(T::Pause), Ok(S::Paused));
    }

    #[test]
    fn connection_loss_can_be_retried() {
        let lost = run(&[T::Connect, T::Handshaked, T::TrackStarted, T::ConnectionLost]).unwrap();
        assert_eq!(lost, S::Disconnected);
        assert_eq!(lost.transition(T::Reconnect), Ok(S::Connecting));
    }

    #[test]
    fn handshake_timeout_disconnects() {
        assert_eq!(run(&[T::Connect, T::HandshakeFailed]), Ok(S::Disconnected));
    }

    #[test]
    fn cannot_pause_or_play_without_a_connection() {
        assert!(S::Idle.transition(T::Pause).is_err());
        assert!(S::Ready.transition(T::Pause).is_err());
        assert!(S::Connecting.transition(T::TrackStarted).is_err());
        assert!(S::Disconnected.transition(T::Resume).is_err());
    }

    #[test]
    fn only_playing_may_transmit() {
        for state in [S::Idle, S::Connecting, S::Ready, S::Paused, S::Disconnected] {
            assert!(!state.may_transmit());
        }
        assert!(S::Playing.may_transmit());
    }
}
