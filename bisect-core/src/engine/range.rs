//! Search range of the bisection state machine

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Closed interval `[low, high]` of candidate indices still under
/// consideration.
///
/// Stored as `low` plus an exclusive `end = high + 1`, so the empty range
/// (`low > high`) needs no signed index. Values are immutable: every
/// transition returns a new range, with `low` never decreasing and `end`
/// never increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRange {
    low: usize,
    end: usize,
}

impl SearchRange {
    /// Range over a whole list of `len` revisions
    pub fn full(len: usize) -> Self {
        Self { low: 0, end: len }
    }

    /// Range `[low, end)`; an `end <= low` range is already concluded
    pub fn new(low: usize, end: usize) -> Self {
        Self { low, end }
    }

    /// Restrict the upper bound to a list of `len` revisions
    pub fn clamp_to(self, len: usize) -> Self {
        Self {
            low: self.low,
            end: self.end.min(len),
        }
    }

    pub fn low(&self) -> usize {
        self.low
    }

    /// Inclusive upper bound, `None` when it would be negative
    pub fn high(&self) -> Option<usize> {
        self.end.checked_sub(1)
    }

    /// Number of candidates left
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.low)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminal state: `low > high`
    pub fn is_concluded(&self) -> bool {
        self.low >= self.end
    }

    /// `(low + high) / 2`, or `None` once concluded
    pub fn midpoint(&self) -> Option<usize> {
        if self.is_concluded() {
            return None;
        }
        Some(self.low + (self.end - 1 - self.low) / 2)
    }

    /// Uniformly random index in `[low, high]`, or `None` once concluded
    pub fn random_index<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.is_concluded() {
            return None;
        }
        Some(rng.gen_range(self.low..self.end))
    }

    /// Keep `[low, mid - 1]`: the transition is at `mid` or earlier
    pub fn keep_below(self, mid: usize) -> Self {
        debug_assert!(mid >= self.low && mid < self.end);
        Self {
            low: self.low,
            end: mid,
        }
    }

    /// Keep `[mid + 1, high]`: the transition is after `mid`
    pub fn keep_above(self, mid: usize) -> Self {
        debug_assert!(mid >= self.low && mid < self.end);
        Self {
            low: mid + 1,
            end: self.end,
        }
    }
}

impl std::fmt::Display for SearchRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.low, self.end as i64 - 1)
    }
}
