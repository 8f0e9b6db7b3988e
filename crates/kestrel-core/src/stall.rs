//! Stall detection
//!
//! A stall is a rate drop to zero while the session intends to play and
//! the position is strictly inside the item. Each check either resolves
//! (enough data buffered), re-arms after the poll interval, or escalates
//! once the retry budget is spent.

use crate::time::{MediaTime, TimeRange};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Message reported to the host when the retry budget is exhausted
pub const STALL_MESSAGE: &str = "Failed to load video: playback stalled";

/// Result of one stall check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallVerdict {
    /// Playback can continue; the loop ends
    Transient,
    /// Check again after the poll interval
    Retry,
    /// Budget just ran out: report the fatal error once
    Escalate,
    /// Already escalated for this source
    Exhausted,
}

/// True when a rate change should start the stall loop
pub fn is_unexpected_stop(
    rate: f32,
    position: MediaTime,
    duration: MediaTime,
    is_playing: bool,
) -> bool {
    rate == 0.0 && is_playing && position > MediaTime::ZERO && position < duration
}

/// Buffered seconds past `position`, measured against the first reported range
pub fn buffered_ahead(ranges: &[TimeRange], position: MediaTime) -> f64 {
    let loaded = ranges.first().map(TimeRange::end_secs).unwrap_or(0.0);
    let position = position.as_secs_f64();
    if position.is_nan() {
        return loaded;
    }
    loaded - position
}

#[derive(Debug)]
pub struct StallDetector {
    count: u32,
    max_retries: u32,
    buffer_ahead_secs: f64,
    pending: Option<JoinHandle<()>>,
}

impl StallDetector {
    pub fn new(max_retries: u32, buffer_ahead_secs: f64) -> Self {
        Self {
            count: 0,
            max_retries,
            buffer_ahead_secs,
            pending: None,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Classifies the current engine state and advances the retry count
    pub fn evaluate(&mut self, likely_to_keep_up: bool, ahead_secs: f64) -> StallVerdict {
        if likely_to_keep_up || ahead_secs > self.buffer_ahead_secs {
            debug!(ahead_secs, "Stall is transient");
            return StallVerdict::Transient;
        }
        if self.count > self.max_retries {
            return StallVerdict::Exhausted;
        }
        self.count += 1;
        if self.count > self.max_retries {
            warn!(stalled_count = self.count, "Stall retry budget exhausted");
            StallVerdict::Escalate
        } else {
            debug!(stalled_count = self.count, "Playback stalled, re-checking");
            StallVerdict::Retry
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// True from [`arm`](Self::arm) until the re-check is handled
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Stores the scheduled re-check, replacing any previous one
    pub fn arm(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.pending.replace(task) {
            previous.abort();
        }
    }

    /// Marks the scheduled re-check as fired
    pub fn fired(&mut self) {
        self.pending = None;
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}

impl Drop for StallDetector {
    fn drop(&mut self) {
        self.cancel();
    }
}
