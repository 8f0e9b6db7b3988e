//! Buffering and readiness tracking
//!
//! Pure derivations over engine state used by the session when property
//! notifications arrive: the buffered-range report and the readiness
//! decision that gates the single `initialized` event.

use crate::{
    engine::ItemStatus,
    events::BufferedRange,
    time::{MediaTime, TimeRange},
    transform::{self, Size, TrackGeometry},
};

/// Builds the full buffered-range report in engine order.
///
/// Range ends are clipped to `forward_end` when the item has one.
pub fn buffered_ranges(ranges: &[TimeRange], forward_end: Option<MediaTime>) -> Vec<BufferedRange> {
    let end_limit = forward_end
        .filter(MediaTime::is_valid)
        .map(|end| end.to_millis());

    ranges
        .iter()
        .map(|range| {
            let start = range.start.to_millis();
            let mut end = start + range.duration.to_millis();
            if let Some(limit) = end_limit {
                end = end.min(limit);
            }
            BufferedRange(start, end)
        })
        .collect()
}

/// Playback duration: the forward end time when set, else the item's duration
pub fn playback_duration(item_duration: MediaTime, forward_end: Option<MediaTime>) -> MediaTime {
    match forward_end {
        Some(end) if end.is_valid() => end,
        _ => item_duration,
    }
}

/// Engine state read by the readiness decision
#[derive(Debug, Clone)]
pub struct ReadinessInputs {
    pub status: ItemStatus,
    pub has_video: bool,
    pub presentation_size: Size,
    pub item_duration: MediaTime,
    pub duration_ms: i64,
    pub first_track: Option<TrackGeometry>,
}

/// Why the readiness transition was postponed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    StatusNotReady,
    SizeUnknown,
    DurationUnknown,
    NoTrack,
}

/// Payload of the `initialized` event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readiness {
    pub duration_ms: i64,
    pub size: Size,
}

/// Decides whether the item can be reported as initialized
pub fn check_readiness(inputs: &ReadinessInputs) -> Result<Readiness, Deferral> {
    if inputs.status != ItemStatus::ReadyToPlay {
        return Err(Deferral::StatusNotReady);
    }
    if inputs.has_video && inputs.presentation_size.is_zero() {
        return Err(Deferral::SizeUnknown);
    }
    let is_live = inputs.item_duration.is_indefinite();
    if !is_live && inputs.duration_ms == 0 {
        return Err(Deferral::DurationUnknown);
    }
    let track = inputs.first_track.as_ref().ok_or(Deferral::NoTrack)?;

    Ok(Readiness {
        duration_ms: inputs.duration_ms,
        size: transform::display_size(track, inputs.presentation_size),
    })
}
