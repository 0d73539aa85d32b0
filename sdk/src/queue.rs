//! Pending tracks of one session.

use rand::seq::SliceRandom;
use std::collections::VecDeque;

use crate::track::Track;

/// Where `enqueue` puts a new track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Behind everything already queued.
    #[default]
    End,
    /// Ahead of everything already queued.
    Next,
    /// Interrupts the current track; it resumes after the new one.
    Now,
}

/// FIFO of pending tracks. Never holds the track that is playing.
#[derive(Debug, Clone, Default)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
}

impl TrackQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, track: Track, placement: Placement) {
        match placement {
            Placement::End => self.tracks.push_back(track),
            Placement::Next | Placement::Now => self.tracks.push_front(track),
        }
    }

    pub fn pop(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn remove(&mut self, position: usize) -> Option<Track> {
        self.tracks.remove(position)
    }

    /// Moves the track at `from` so it ends up at `to`.
    pub fn move_track(&mut self, from: usize, to: usize) -> bool {
        if to >= self.tracks.len() {
            return false;
        }
        match self.tracks.remove(from) {
            Some(track) => {
                self.tracks.insert(to, track);
                true
            }
            None => false,
        }
    }

    /// Removes up to `count` tracks from the front.
    pub fn drop_front(&mut self, count: usize) -> Vec<Track> {
        let count = count.min(self.tracks.len());
        self.tracks.drain(..count).collect()
    }

    /// Empties the queue, returning how many tracks were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.tracks.len();
        self.tracks.clear();
        removed
    }

    pub fn shuffle(&mut self) {
        self.tracks.make_contiguous().shuffle(&mut rand::rng());
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
