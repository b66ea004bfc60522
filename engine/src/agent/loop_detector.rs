//! Repetition detection
//!
//! Watches the calls of a single run and reports when the model is stuck:
//!
//! - the same call (name and canonical arguments) `threshold` times in a row
//! - two different calls alternating over the last four attempts (A, B, A, B)
//!
//! Longer cycles are not detected.

use sdk::types::{call_signature, CallParams};
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

/// Smallest window kept regardless of threshold
const MIN_WINDOW: usize = 32;

/// Calls needed to recognize an alternation
const ALTERNATION_SPAN: usize = 4;

/// A detected repetition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopPattern {
    Identical { name: String, count: usize },
    Alternating { first: String, second: String },
}

impl fmt::Display for LoopPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPattern::Identical { name, count } => write!(
                f,
                "'{}' was called {} times in a row with identical arguments",
                name, count
            ),
            LoopPattern::Alternating { first, second } => write!(
                f,
                "calls keep alternating between '{}' and '{}'",
                first, second
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attempt {
    name: String,
    signature: String,
}

/// Bounded window of recent call attempts
#[derive(Debug, Clone)]
pub struct LoopDetector {
    enabled: bool,
    threshold: usize,
    capacity: usize,
    window: VecDeque<Attempt>,
}

impl LoopDetector {
    /// Thresholds below 2 are raised to 2
    pub fn new(threshold: usize, enabled: bool) -> Self {
        let threshold = threshold.max(2);
        let capacity = MIN_WINDOW.max(threshold).max(ALTERNATION_SPAN);
        Self {
            enabled,
            threshold,
            capacity,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// A detector that never triggers
    pub fn disabled() -> Self {
        Self::new(2, false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of attempts currently in the window
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Record an attempt and report a repetition if one is now visible
    pub fn check(&mut self, name: &str, params: &CallParams) -> Option<LoopPattern> {
        if !self.enabled {
            return None;
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(Attempt {
            name: name.to_string(),
            signature: call_signature(name, params),
        });

        let pattern = self.identical().or_else(|| self.alternating());
        if let Some(pattern) = &pattern {
            warn!("Repetition detected: {}", pattern);
        }
        pattern
    }

    fn identical(&self) -> Option<LoopPattern> {
        if self.window.len() < self.threshold {
            return None;
        }
        let last = self.window.back()?;
        let all_same = self
            .window
            .iter()
            .rev()
            .take(self.threshold)
            .all(|attempt| attempt == last);
        all_same.then(|| LoopPattern::Identical {
            name: last.name.clone(),
            count: self.threshold,
        })
    }

    fn alternating(&self) -> Option<LoopPattern> {
        let n = self.window.len();
        if n < ALTERNATION_SPAN {
            return None;
        }
        let a = &self.window[n - 4];
        let b = &self.window[n - 3];
        let is_cycle = a != b && self.window[n - 2] == *a && self.window[n - 1] == *b;
        is_cycle.then(|| LoopPattern::Alternating {
            first: a.name.clone(),
            second: b.name.clone(),
        })
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(3, true)
    }
}
