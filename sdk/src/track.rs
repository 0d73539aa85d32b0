use std::fmt;
use std::time::Duration;

/// Voice channel a session lives in.
pub type ChannelId = u64;

/// Chat user that requested a track.
pub type UserId = u64;

/// Identifier handed back by `enqueue`, unique per [`crate::VoiceManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One playable item. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    /// What the transcoder opens: a file path or a stream URL.
    pub source_locator: String,
    pub title: String,
    /// `None` for live streams.
    pub duration: Option<Duration>,
    pub requested_by: UserId,
}

impl Track {
    /// Duration as `m:ss` or `h:mm:ss`, or `LIVE` when unknown.
    #[must_use]
    pub fn display_duration(&self) -> String {
        format_duration(self.duration)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.display_duration())
    }
}

#[must_use]
pub fn format_duration(duration: Option<Duration>) -> String {
    let secs = match duration {
        Some(d) if d.as_secs() > 0 => d.as_secs(),
        _ => return "LIVE".to_string(),
    };
    let (m, s) = (secs / 60, secs % 60);
    let (h, m) = (m / 60, m % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(None), "LIVE");
        assert_eq!(format_duration(Some(Duration::ZERO)), "LIVE");
        assert_eq!(format_duration(Some(Duration::from_secs(5))), "0:05");
        assert_eq!(format_duration(Some(Duration::from_secs(754))), "12:34");
        assert_eq!(format_duration(Some(Duration::from_secs(3_723))), "1:02:03");
    }
}
