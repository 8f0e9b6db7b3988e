//! Decoding engine capability
//!
//! The controller never decodes media itself. It drives an engine through
//! [`DecodingEngine`], reads its live properties, and learns about changes
//! through an [`Observer`] registered per source.

pub mod sim;

use crate::{
    time::{MediaTime, TimeRange},
    transform::{Size, TrackGeometry, VideoComposition},
    Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

/// Identifies one source assignment of a session.
///
/// Notifications and deferred completions are tagged with it so that work
/// belonging to a replaced source is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Item status as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    Unknown,
    ReadyToPlay,
    /// Carries the engine's localized failure description
    Failed(String),
}

/// Observed property group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Property {
    Rate,
    LoadedTimeRanges,
    Status,
    PresentationSize,
    PlaybackLikelyToKeepUp,
    PlaybackBufferEmpty,
    PlaybackBufferFull,
}

impl Property {
    pub const ALL: [Property; 7] = [
        Property::Rate,
        Property::LoadedTimeRanges,
        Property::Status,
        Property::PresentationSize,
        Property::PlaybackLikelyToKeepUp,
        Property::PlaybackBufferEmpty,
        Property::PlaybackBufferFull,
    ];
}

/// Change notification delivered by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineNotification {
    Changed(Property),
    PlayedToEnd,
}

/// Delivery endpoint handed to the engine when observers are attached
#[derive(Debug, Clone)]
pub struct Observer {
    source: SourceId,
    tx: mpsc::UnboundedSender<(SourceId, EngineNotification)>,
}

impl Observer {
    pub fn new(source: SourceId, tx: mpsc::UnboundedSender<(SourceId, EngineNotification)>) -> Self {
        Self { source, tx }
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Posts a notification; returns false once the session is gone
    pub fn notify(&self, notification: EngineNotification) -> bool {
        self.tx.send((self.source, notification)).is_ok()
    }
}

/// Registration returned by [`DecodingEngine::add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(pub u64);

/// What the engine needs to open an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub url: Url,
    pub headers: HashMap<String, String>,
    /// Set for uncached network sources
    pub preferred_forward_buffer: Option<Duration>,
    /// Overridden end of playback
    pub forward_playback_end: Option<MediaTime>,
}

/// Media type of an asset track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// Container-level track descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTrack {
    pub id: u32,
    pub kind: TrackKind,
}

/// Asynchronously loadable container metadata of the current item
#[async_trait]
pub trait MediaAsset: Send + Sync {
    /// Waits until container-level track metadata is available
    async fn load_tracks(&self) -> Result<Vec<AssetTrack>>;

    /// Waits until a track's orientation metadata is available
    async fn load_geometry(&self, track: &AssetTrack) -> Result<TrackGeometry>;

    /// Full duration of the asset
    fn duration(&self) -> MediaTime;
}

/// Optional engine capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_play_fast_forward: bool,
    pub can_play_slow_forward: bool,
    pub supports_maximum_resolution: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_play_fast_forward: true,
            can_play_slow_forward: true,
            supports_maximum_resolution: true,
        }
    }
}

/// Entry of the audible media-selection group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOption {
    /// Common "title" metadata
    pub title: Option<String>,
}

/// Decoded BGRA frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Bytes) -> Self {
        Self { width, height, data }
    }

    /// Fully transparent frame with the same dimensions
    pub fn transparent(&self) -> Frame {
        let len = self.width as usize * self.height as usize * 4;
        Frame {
            width: self.width,
            height: self.height,
            data: Bytes::from(vec![0u8; len]),
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }
}

/// Result of pulling a frame from the video output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePull {
    /// A frame newer than the last delivered one
    New(Frame),
    /// The output reported a new frame but copying it failed
    Missing,
    /// Nothing new for the requested host time
    Unchanged,
}

/// Called once when an engine seek finishes (`true` if it reached the target)
pub type SeekCompletion = Box<dyn FnOnce(bool) + Send>;

/// Opaque media decoding/rendering engine owned by one session
pub trait DecodingEngine: Send {
    /// Replaces the current item with one opened from `request`
    fn load(&mut self, request: &SourceRequest) -> Result<Arc<dyn MediaAsset>>;

    fn has_item(&self) -> bool;

    /// Re-assigns the current item to itself to nudge scheduling
    fn reattach_current_item(&mut self);

    /// Stops any metadata loading of the current item
    fn cancel_loading(&mut self);

    /// Registers for every [`Property`] and end-of-stream
    fn add_observer(&mut self, observer: Observer) -> ObserverToken;

    fn remove_observer(&mut self, token: ObserverToken);

    fn status(&self) -> ItemStatus;

    fn current_time(&self) -> MediaTime;

    /// Wall-clock date of the current frame, if the stream carries one
    fn current_date(&self) -> Option<DateTime<Utc>>;

    fn item_duration(&self) -> MediaTime;

    fn forward_playback_end_time(&self) -> Option<MediaTime>;

    /// Buffered ranges in engine report order
    fn loaded_time_ranges(&self) -> Vec<TimeRange>;

    fn presentation_size(&self) -> Size;

    fn has_video_track(&self) -> bool;

    /// Geometry of the first track of the current item
    fn first_track_geometry(&self) -> Option<TrackGeometry>;

    fn is_playback_likely_to_keep_up(&self) -> bool;

    fn is_playback_buffer_empty(&self) -> bool;

    fn is_playback_buffer_full(&self) -> bool;

    fn rate(&self) -> f32;

    fn play_immediately(&mut self, rate: f32);

    fn set_rate(&mut self, rate: f32);

    fn pause(&mut self);

    fn seek(
        &mut self,
        target: MediaTime,
        tolerance_before: MediaTime,
        tolerance_after: MediaTime,
        on_complete: SeekCompletion,
    );

    fn set_volume(&mut self, volume: f32);

    fn set_composition(&mut self, composition: VideoComposition);

    fn capabilities(&self) -> Capabilities;

    fn set_preferred_peak_bit_rate(&mut self, bits_per_second: f64);

    /// [`Size::ZERO`] removes the cap
    fn set_preferred_maximum_resolution(&mut self, size: Size);

    /// `None` when the item has no audible selection group
    fn audio_options(&self) -> Option<Vec<AudioOption>>;

    fn select_audio_option(&mut self, index: usize);

    fn attach_video_output(&mut self);

    fn detach_video_output(&mut self);

    fn has_video_output(&self) -> bool;

    fn copy_frame(&mut self, host_time: Instant) -> FramePull;
}

/// Creates one engine per session
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn DecodingEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Box<dyn DecodingEngine> + Send + Sync,
{
    fn create(&self) -> Box<dyn DecodingEngine> {
        self()
    }
}
