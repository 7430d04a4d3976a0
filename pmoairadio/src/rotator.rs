//! Shuffled playlist rotation.
//!
//! The rotator holds two things: the *staged* track set (replaced by
//! [`PlaylistRotator::reset`] at any time) and the *current pass*, a fixed
//! permutation of the staged set taken by
//! [`PlaylistRotator::shuffle_for_new_pass`]. The pass never changes while it
//! is being played; a new staged set only takes effect at the next shuffle.

use crate::error::PlaylistError;
use crate::track::Track;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Result of [`PlaylistRotator::next`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookahead {
    pub track: Track,
    /// `true` when `track` is the first of a freshly shuffled pass
    pub new_pass: bool,
}

pub struct PlaylistRotator {
    staged: Vec<Track>,
    sequence: Vec<Track>,
    pass: u64,
    rng: StdRng,
}

impl PlaylistRotator {
    /// Rotator seeded from the wall clock
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_seed(seed)
    }

    /// Deterministic rotator, for tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            staged: Vec::new(),
            sequence: Vec::new(),
            pass: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Stores the track set used by the next shuffle.
    ///
    /// A path listed twice is kept once, at its first occurrence.
    pub fn reset(&mut self, mut tracks: Vec<Track>) {
        let mut seen = HashSet::new();
        tracks.retain(|t| seen.insert(t.path.clone()));
        self.staged = tracks;
    }

    /// Starts a new pass with a uniformly random permutation of the staged set
    pub fn shuffle_for_new_pass(&mut self) -> Result<&[Track], PlaylistError> {
        if self.staged.is_empty() {
            self.sequence.clear();
            return Err(PlaylistError::Empty);
        }

        let mut sequence = self.staged.clone();
        sequence.shuffle(&mut self.rng);
        self.sequence = sequence;
        self.pass += 1;
        Ok(&self.sequence)
    }

    /// Order of the current pass
    pub fn sequence(&self) -> Result<&[Track], PlaylistError> {
        if self.sequence.is_empty() {
            Err(PlaylistError::Empty)
        } else {
            Ok(&self.sequence)
        }
    }

    /// First track of the current pass
    pub fn first(&self) -> Result<Track, PlaylistError> {
        self.sequence()?
            .first()
            .cloned()
            .ok_or(PlaylistError::Empty)
    }

    pub fn position(&self, track: &Track) -> Option<usize> {
        self.sequence.iter().position(|t| t.path == track.path)
    }

    /// `true` if `track` closes the current pass
    pub fn is_last(&self, track: &Track) -> bool {
        self.position(track)
            .is_some_and(|i| i + 1 == self.sequence.len())
    }

    /// Track following `track` in the current pass.
    ///
    /// Called on the last track, it shuffles a new pass and returns its first
    /// track with `new_pass` set.
    pub fn next(&mut self, track: &Track) -> Result<Lookahead, PlaylistError> {
        if self.sequence.is_empty() && self.staged.is_empty() {
            return Err(PlaylistError::Empty);
        }

        let index = self
            .position(track)
            .ok_or_else(|| PlaylistError::UnknownTrack(track.path.clone()))?;

        if let Some(next) = self.sequence.get(index + 1) {
            return Ok(Lookahead {
                track: next.clone(),
                new_pass: false,
            });
        }

        let first = self
            .shuffle_for_new_pass()?
            .first()
            .cloned()
            .ok_or(PlaylistError::Empty)?;
        Ok(Lookahead {
            track: first,
            new_pass: true,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.sequence.is_empty()
    }

    /// Number of passes shuffled so far (1 for the first pass)
    pub fn pass_number(&self) -> u64 {
        self.pass
    }
}

impl Default for PlaylistRotator {
    fn default() -> Self {
        Self::new()
    }
}
