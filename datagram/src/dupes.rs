//! Replay suppression over two rotating generations of sequence numbers.

use std::collections::HashSet;

/// Returns whether `a` comes after `b` on the wrapping sequence space.
fn after(a: u64, b: u64) -> bool {
    (a.wrapping_sub(b) as i64) > 0
}

/// Remembers recently seen sequence numbers.
///
/// An identifier is remembered for at least one and at most two rotation periods: `rotate`
/// discards the older generation and starts a new one.
#[derive(Debug, Default)]
pub struct DupeWindow {
    current: HashSet<u64>,
    previous: HashSet<u64>,
}

impl DupeWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `sequence` was already recorded.
    pub fn contains(&self, sequence: u64) -> bool {
        self.current.contains(&sequence) || self.previous.contains(&sequence)
    }

    /// Record `sequence`.
    pub fn insert(&mut self, sequence: u64) {
        self.current.insert(sequence);
    }

    /// Forget the oldest generation.
    pub fn rotate(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }
}

/// A [DupeWindow] for packets from a single sender counter.
///
/// When a generation is forgotten, the newest sequence it held becomes a floor: nothing at or
/// before the floor is accepted again, so replays older than the window are still rejected.
#[derive(Debug, Default)]
pub struct OrderedWindow {
    window: DupeWindow,
    newest_current: Option<u64>,
    newest_previous: Option<u64>,
    floor: Option<u64>,
}

impl OrderedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `sequence` was recorded or precedes everything still remembered.
    pub fn contains(&self, sequence: u64) -> bool {
        if let Some(floor) = self.floor {
            if !after(sequence, floor) {
                return true;
            }
        }
        self.window.contains(sequence)
    }

    /// Record `sequence`.
    pub fn insert(&mut self, sequence: u64) {
        self.window.insert(sequence);
        self.newest_current = match self.newest_current {
            Some(newest) if !after(sequence, newest) => Some(newest),
            _ => Some(sequence),
        };
    }

    /// Forget the oldest generation, raising the floor to the newest sequence it held.
    pub fn rotate(&mut self) {
        if let Some(discarded) = self.newest_previous {
            self.floor = match self.floor {
                Some(floor) if after(floor, discarded) => Some(floor),
                _ => Some(discarded),
            };
        }
        self.newest_previous = self.newest_current.take();
        self.window.rotate();
    }
}
