//! Scripted in-process engine
//!
//! [`SimEngine`] implements [`DecodingEngine`] over shared state that a
//! [`SimController`] mutates from the outside: resolving metadata loads,
//! flipping item status, reporting buffered ranges and firing property
//! notifications exactly like a real engine would. Every mutating call the
//! controller makes on the engine is recorded in a [`SimLog`].

use super::{
    AssetTrack, AudioOption, Capabilities, DecodingEngine, EngineFactory, EngineNotification,
    FramePull, ItemStatus, MediaAsset, Observer, ObserverToken, Property, SeekCompletion,
    SourceRequest, TrackKind,
};
use crate::{
    time::{MediaTime, TimeRange},
    transform::{AffineTransform, Size, TrackGeometry, VideoComposition},
    Error, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::debug;

type Pending<T> = Option<std::result::Result<T, String>>;

/// Calls recorded by the simulated engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimLog {
    pub loads: Vec<SourceRequest>,
    /// Seek targets in milliseconds
    pub seeks: Vec<i64>,
    pub play_calls: u32,
    pub pause_calls: u32,
    pub rates: Vec<f32>,
    pub volume: Option<f32>,
    pub compositions: Vec<VideoComposition>,
    pub peak_bit_rate: Option<f64>,
    pub maximum_resolution: Option<Size>,
    pub selected_audio: Option<usize>,
    pub reattach_count: u32,
    pub cancel_loading_count: u32,
    pub observers_added: u32,
    pub observers_removed: u32,
    pub output_attach_count: u32,
    pub output_detach_count: u32,
}

struct SimItem {
    status: ItemStatus,
    current_time: MediaTime,
    current_date: Option<DateTime<Utc>>,
    duration: MediaTime,
    forward_end: Option<MediaTime>,
    ranges: Vec<TimeRange>,
    presentation_size: Size,
    has_video: bool,
    geometry: Option<TrackGeometry>,
    likely_to_keep_up: bool,
    buffer_empty: bool,
    buffer_full: bool,
    audio_options: Option<Vec<AudioOption>>,
    video_output: bool,
    tracks_tx: watch::Sender<Pending<Vec<AssetTrack>>>,
    geometry_tx: watch::Sender<Pending<TrackGeometry>>,
    asset_duration: Arc<Mutex<MediaTime>>,
}

struct SimState {
    item: Option<SimItem>,
    observers: BTreeMap<u64, Observer>,
    next_token: u64,
    capabilities: Capabilities,
    rate: f32,
    auto_complete_seeks: bool,
    pending_seeks: Vec<SeekCompletion>,
    frames: VecDeque<FramePull>,
    log: SimLog,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            item: None,
            observers: BTreeMap::new(),
            next_token: 1,
            capabilities: Capabilities::default(),
            rate: 0.0,
            auto_complete_seeks: true,
            pending_seeks: Vec::new(),
            frames: VecDeque::new(),
            log: SimLog::default(),
        }
    }
}

/// Simulated engine handed to a session
pub struct SimEngine {
    state: Arc<Mutex<SimState>>,
}

/// External driver of a [`SimEngine`]
#[derive(Clone)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
}

impl SimEngine {
    pub fn new() -> (SimEngine, SimController) {
        let state = Arc::new(Mutex::new(SimState::default()));
        (
            SimEngine {
                state: state.clone(),
            },
            SimController { state },
        )
    }
}

struct SimAsset {
    tracks: watch::Receiver<Pending<Vec<AssetTrack>>>,
    geometry: watch::Receiver<Pending<TrackGeometry>>,
    duration: Arc<Mutex<MediaTime>>,
}

#[async_trait]
impl MediaAsset for SimAsset {
    async fn load_tracks(&self) -> Result<Vec<AssetTrack>> {
        let mut rx = self.tracks.clone();
        if rx.wait_for(Option::is_some).await.is_err() {
            return Err(Error::MetadataUnavailable("item released".into()));
        }
        let value = rx.borrow().clone();
        match value {
            Some(Ok(tracks)) => Ok(tracks),
            Some(Err(reason)) => Err(Error::MetadataUnavailable(reason)),
            None => Err(Error::MetadataUnavailable("tracks".into())),
        }
    }

    async fn load_geometry(&self, _track: &AssetTrack) -> Result<TrackGeometry> {
        let mut rx = self.geometry.clone();
        if rx.wait_for(Option::is_some).await.is_err() {
            return Err(Error::MetadataUnavailable("item released".into()));
        }
        let value = rx.borrow().clone();
        match value {
            Some(Ok(geometry)) => Ok(geometry),
            Some(Err(reason)) => Err(Error::MetadataUnavailable(reason)),
            None => Err(Error::MetadataUnavailable("preferredTransform".into())),
        }
    }

    fn duration(&self) -> MediaTime {
        *self.duration.lock()
    }
}

impl DecodingEngine for SimEngine {
    fn load(&mut self, request: &SourceRequest) -> Result<Arc<dyn MediaAsset>> {
        let (tracks_tx, tracks) = watch::channel(None);
        let (geometry_tx, geometry) = watch::channel(None);
        let asset_duration = Arc::new(Mutex::new(MediaTime::Invalid));

        let mut state = self.state.lock();
        state.log.loads.push(request.clone());
        state.item = Some(SimItem {
            status: ItemStatus::Unknown,
            current_time: MediaTime::ZERO,
            current_date: None,
            duration: MediaTime::Invalid,
            forward_end: request.forward_playback_end,
            ranges: Vec::new(),
            presentation_size: Size::ZERO,
            has_video: false,
            geometry: None,
            likely_to_keep_up: false,
            buffer_empty: false,
            buffer_full: false,
            audio_options: None,
            video_output: false,
            tracks_tx,
            geometry_tx,
            asset_duration: asset_duration.clone(),
        });
        debug!(url = %request.url, "Simulated item loaded");

        Ok(Arc::new(SimAsset {
            tracks,
            geometry,
            duration: asset_duration,
        }))
    }

    fn has_item(&self) -> bool {
        self.state.lock().item.is_some()
    }

    fn reattach_current_item(&mut self) {
        self.state.lock().log.reattach_count += 1;
    }

    fn cancel_loading(&mut self) {
        self.state.lock().log.cancel_loading_count += 1;
    }

    fn add_observer(&mut self, observer: Observer) -> ObserverToken {
        let mut state = self.state.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.observers.insert(token, observer);
        state.log.observers_added += 1;
        ObserverToken(token)
    }

    fn remove_observer(&mut self, token: ObserverToken) {
        let mut state = self.state.lock();
        if state.observers.remove(&token.0).is_some() {
            state.log.observers_removed += 1;
        }
    }

    fn status(&self) -> ItemStatus {
        self.with_item(|item| item.status.clone()).unwrap_or_default()
    }

    fn current_time(&self) -> MediaTime {
        self.with_item(|item| item.current_time)
            .unwrap_or(MediaTime::ZERO)
    }

    fn current_date(&self) -> Option<DateTime<Utc>> {
        self.with_item(|item| item.current_date).flatten()
    }

    fn item_duration(&self) -> MediaTime {
        self.with_item(|item| item.duration)
            .unwrap_or(MediaTime::Invalid)
    }

    fn forward_playback_end_time(&self) -> Option<MediaTime> {
        self.with_item(|item| item.forward_end).flatten()
    }

    fn loaded_time_ranges(&self) -> Vec<TimeRange> {
        self.with_item(|item| item.ranges.clone()).unwrap_or_default()
    }

    fn presentation_size(&self) -> Size {
        self.with_item(|item| item.presentation_size)
            .unwrap_or(Size::ZERO)
    }

    fn has_video_track(&self) -> bool {
        self.with_item(|item| item.has_video).unwrap_or(false)
    }

    fn first_track_geometry(&self) -> Option<TrackGeometry> {
        self.with_item(|item| item.geometry).flatten()
    }

    fn is_playback_likely_to_keep_up(&self) -> bool {
        self.with_item(|item| item.likely_to_keep_up)
            .unwrap_or(false)
    }

    fn is_playback_buffer_empty(&self) -> bool {
        self.with_item(|item| item.buffer_empty).unwrap_or(false)
    }

    fn is_playback_buffer_full(&self) -> bool {
        self.with_item(|item| item.buffer_full).unwrap_or(false)
    }

    fn rate(&self) -> f32 {
        self.state.lock().rate
    }

    fn play_immediately(&mut self, rate: f32) {
        let mut state = self.state.lock();
        state.rate = rate;
        state.log.play_calls += 1;
    }

    fn set_rate(&mut self, rate: f32) {
        let mut state = self.state.lock();
        state.rate = rate;
        state.log.rates.push(rate);
    }

    fn pause(&mut self) {
        let mut state = self.state.lock();
        state.rate = 0.0;
        state.log.pause_calls += 1;
    }

    fn seek(
        &mut self,
        target: MediaTime,
        _tolerance_before: MediaTime,
        _tolerance_after: MediaTime,
        on_complete: SeekCompletion,
    ) {
        let auto_complete = {
            let mut state = self.state.lock();
            state.log.seeks.push(target.to_millis());
            if let Some(item) = state.item.as_mut() {
                item.current_time = target;
            }
            if !state.auto_complete_seeks {
                state.pending_seeks.push(on_complete);
                return;
            }
            on_complete
        };
        auto_complete(true);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().log.volume = Some(volume);
    }

    fn set_composition(&mut self, composition: VideoComposition) {
        self.state.lock().log.compositions.push(composition);
    }

    fn capabilities(&self) -> Capabilities {
        self.state.lock().capabilities
    }

    fn set_preferred_peak_bit_rate(&mut self, bits_per_second: f64) {
        self.state.lock().log.peak_bit_rate = Some(bits_per_second);
    }

    fn set_preferred_maximum_resolution(&mut self, size: Size) {
        self.state.lock().log.maximum_resolution = Some(size);
    }

    fn audio_options(&self) -> Option<Vec<AudioOption>> {
        self.with_item(|item| item.audio_options.clone()).flatten()
    }

    fn select_audio_option(&mut self, index: usize) {
        self.state.lock().log.selected_audio = Some(index);
    }

    fn attach_video_output(&mut self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(item) = state.item.as_mut() {
            item.video_output = true;
            state.log.output_attach_count += 1;
        }
    }

    fn detach_video_output(&mut self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(item) = state.item.as_mut() {
            if item.video_output {
                item.video_output = false;
                state.log.output_detach_count += 1;
            }
        }
    }

    fn has_video_output(&self) -> bool {
        self.with_item(|item| item.video_output).unwrap_or(false)
    }

    fn copy_frame(&mut self, _host_time: Instant) -> FramePull {
        let mut state = self.state.lock();
        let has_output = state.item.as_ref().is_some_and(|item| item.video_output);
        if !has_output {
            return FramePull::Unchanged;
        }
        state.frames.pop_front().unwrap_or(FramePull::Unchanged)
    }
}

impl SimEngine {
    fn with_item<T>(&self, f: impl FnOnce(&SimItem) -> T) -> Option<T> {
        self.state.lock().item.as_ref().map(f)
    }
}

impl SimController {
    fn update_item(&self, f: impl FnOnce(&mut SimItem)) {
        if let Some(item) = self.state.lock().item.as_mut() {
            f(item);
        }
    }

    /// Fires a notification through every registered observer
    pub fn notify(&self, notification: EngineNotification) {
        let observers: Vec<Observer> = self.state.lock().observers.values().cloned().collect();
        for observer in observers {
            observer.notify(notification);
        }
    }

    pub fn notify_changed(&self, property: Property) {
        self.notify(EngineNotification::Changed(property));
    }

    /// Completes both metadata stages with one video track and one audio track
    pub fn resolve_video_tracks(&self, geometry: TrackGeometry, duration: MediaTime) {
        self.update_item(|item| {
            item.has_video = true;
            item.geometry = Some(geometry);
            *item.asset_duration.lock() = duration;
            let _ = item.tracks_tx.send(Some(Ok(vec![
                AssetTrack {
                    id: 1,
                    kind: TrackKind::Video,
                },
                AssetTrack {
                    id: 2,
                    kind: TrackKind::Audio,
                },
            ])));
            let _ = item.geometry_tx.send(Some(Ok(geometry)));
        });
    }

    /// Completes stage one with a single audio track
    pub fn resolve_audio_only(&self, duration: MediaTime) {
        self.update_item(|item| {
            item.has_video = false;
            item.geometry = Some(TrackGeometry {
                natural_size: Size::ZERO,
                preferred_transform: AffineTransform::IDENTITY,
            });
            *item.asset_duration.lock() = duration;
            let _ = item.tracks_tx.send(Some(Ok(vec![AssetTrack {
                id: 1,
                kind: TrackKind::Audio,
            }])));
        });
    }

    /// Completes stage one with video tracks, leaving stage two pending
    pub fn resolve_tracks_only(&self, geometry: TrackGeometry) {
        self.update_item(|item| {
            item.has_video = true;
            item.geometry = Some(geometry);
            let _ = item.tracks_tx.send(Some(Ok(vec![AssetTrack {
                id: 1,
                kind: TrackKind::Video,
            }])));
        });
    }

    pub fn fail_tracks(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.update_item(|item| {
            let _ = item.tracks_tx.send(Some(Err(reason)));
        });
    }

    pub fn fail_geometry(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.update_item(|item| {
            let _ = item.geometry_tx.send(Some(Err(reason)));
        });
    }

    /// Marks the item ready and fires status and presentation-size changes
    pub fn set_ready(&self, duration: MediaTime, presentation: Size) {
        self.update_item(|item| {
            item.status = ItemStatus::ReadyToPlay;
            item.duration = duration;
            item.presentation_size = presentation;
        });
        self.notify_changed(Property::Status);
        self.notify_changed(Property::PresentationSize);
    }

    pub fn set_status(&self, status: ItemStatus) {
        self.update_item(|item| item.status = status);
        self.notify_changed(Property::Status);
    }

    pub fn set_presentation_size(&self, size: Size) {
        self.update_item(|item| item.presentation_size = size);
        self.notify_changed(Property::PresentationSize);
    }

    pub fn set_duration(&self, duration: MediaTime) {
        self.update_item(|item| item.duration = duration);
    }

    pub fn set_loaded_ranges(&self, ranges: Vec<TimeRange>) {
        self.update_item(|item| item.ranges = ranges);
        self.notify_changed(Property::LoadedTimeRanges);
    }

    pub fn set_likely_to_keep_up(&self, likely: bool) {
        self.update_item(|item| item.likely_to_keep_up = likely);
        self.notify_changed(Property::PlaybackLikelyToKeepUp);
    }

    pub fn set_buffer_empty(&self, empty: bool) {
        self.update_item(|item| item.buffer_empty = empty);
        self.notify_changed(Property::PlaybackBufferEmpty);
    }

    pub fn set_buffer_full(&self, full: bool) {
        self.update_item(|item| item.buffer_full = full);
        self.notify_changed(Property::PlaybackBufferFull);
    }

    pub fn set_current_time(&self, time: MediaTime) {
        self.update_item(|item| item.current_time = time);
    }

    pub fn set_current_date(&self, date: Option<DateTime<Utc>>) {
        self.update_item(|item| item.current_date = date);
    }

    pub fn set_audio_options(&self, options: Option<Vec<AudioOption>>) {
        self.update_item(|item| item.audio_options = options);
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.state.lock().capabilities = capabilities;
    }

    /// Drops the rate to zero and fires the rate change
    pub fn stall(&self) {
        self.state.lock().rate = 0.0;
        self.notify_changed(Property::Rate);
    }

    pub fn play_to_end(&self) {
        self.notify(EngineNotification::PlayedToEnd);
    }

    /// Holds seek completions until [`SimController::complete_seeks`]
    pub fn set_auto_complete_seeks(&self, auto: bool) {
        self.state.lock().auto_complete_seeks = auto;
    }

    pub fn complete_seeks(&self, finished: bool) {
        let pending = std::mem::take(&mut self.state.lock().pending_seeks);
        for completion in pending {
            completion(finished);
        }
    }

    pub fn push_frame(&self, pull: FramePull) {
        self.state.lock().frames.push_back(pull);
    }

    pub fn rate(&self) -> f32 {
        self.state.lock().rate
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    pub fn has_video_output(&self) -> bool {
        self.state
            .lock()
            .item
            .as_ref()
            .is_some_and(|item| item.video_output)
    }

    pub fn log(&self) -> SimLog {
        self.state.lock().log.clone()
    }

    /// Applies a scripted action
    pub fn apply(&self, action: SimAction) {
        debug!(?action, "Applying simulated action");
        match action {
            SimAction::Video {
                natural_width,
                natural_height,
                rotation_degrees,
                duration_ms,
            } => self.resolve_video_tracks(
                TrackGeometry {
                    natural_size: Size::new(natural_width, natural_height),
                    preferred_transform: AffineTransform::rotation(rotation_degrees),
                },
                MediaTime::from_millis(duration_ms),
            ),
            SimAction::AudioOnly { duration_ms } => {
                self.resolve_audio_only(MediaTime::from_millis(duration_ms))
            }
            SimAction::FailTracks { reason } => self.fail_tracks(reason),
            SimAction::Ready {
                duration_ms,
                width,
                height,
            } => {
                let duration = match duration_ms {
                    Some(ms) => MediaTime::from_millis(ms),
                    None => MediaTime::Indefinite,
                };
                self.set_ready(duration, Size::new(width, height))
            }
            SimAction::Fail { description } => self.set_status(ItemStatus::Failed(description)),
            SimAction::Buffered { ranges } => self.set_loaded_ranges(
                ranges
                    .into_iter()
                    .map(|[start, end]| TimeRange::from_millis(start, end))
                    .collect(),
            ),
            SimAction::LikelyToKeepUp { value } => self.set_likely_to_keep_up(value),
            SimAction::BufferEmpty => self.set_buffer_empty(true),
            SimAction::BufferFull => self.set_buffer_full(true),
            SimAction::Position { position_ms } => {
                self.set_current_time(MediaTime::from_millis(position_ms))
            }
            SimAction::Stall => self.stall(),
            SimAction::PlayToEnd => self.play_to_end(),
        }
    }
}

/// Script step for a [`SimController`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SimAction {
    Video {
        natural_width: f64,
        natural_height: f64,
        #[serde(default)]
        rotation_degrees: f64,
        duration_ms: i64,
    },
    AudioOnly {
        duration_ms: i64,
    },
    FailTracks {
        reason: String,
    },
    Ready {
        /// Absent for live streams
        duration_ms: Option<i64>,
        width: f64,
        height: f64,
    },
    Fail {
        description: String,
    },
    Buffered {
        ranges: Vec<[i64; 2]>,
    },
    LikelyToKeepUp {
        value: bool,
    },
    BufferEmpty,
    BufferFull,
    Position {
        position_ms: i64,
    },
    Stall,
    PlayToEnd,
}

/// Factory that keeps a controller for every engine it creates
#[derive(Clone, Default)]
pub struct SimFactory {
    controllers: Arc<Mutex<Vec<SimController>>>,
}

impl SimFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controllers in creation order
    pub fn controllers(&self) -> Vec<SimController> {
        self.controllers.lock().clone()
    }

    pub fn last(&self) -> Option<SimController> {
        self.controllers.lock().last().cloned()
    }
}

impl EngineFactory for SimFactory {
    fn create(&self) -> Box<dyn DecodingEngine> {
        let (engine, controller) = SimEngine::new();
        self.controllers.lock().push(controller);
        Box::new(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SourceId;
    use tokio::sync::mpsc;
    use url::Url;

    fn request() -> SourceRequest {
        SourceRequest {
            url: Url::parse("http://example.com/a.m3u8").unwrap(),
            headers: Default::default(),
            preferred_forward_buffer: None,
            forward_playback_end: None,
        }
    }

    #[tokio::test]
    async fn test_tracks_resolve_after_load() {
        let (mut engine, controller) = SimEngine::new();
        let asset = engine.load(&request()).unwrap();
        let geometry = TrackGeometry {
            natural_size: Size::new(640.0, 480.0),
            preferred_transform: AffineTransform::IDENTITY,
        };
        controller.resolve_video_tracks(geometry, MediaTime::from_millis(1000));

        let tracks = asset.load_tracks().await.unwrap();
        assert_eq!(tracks[0].kind, TrackKind::Video);
        assert_eq!(asset.load_geometry(&tracks[0]).await.unwrap(), geometry);
        assert_eq!(asset.duration(), MediaTime::from_millis(1000));
    }

    #[tokio::test]
    async fn test_replaced_item_fails_pending_load() {
        let (mut engine, _controller) = SimEngine::new();
        let asset = engine.load(&request()).unwrap();
        engine.load(&request()).unwrap();
        assert!(asset.load_tracks().await.is_err());
    }

    #[test]
    fn test_notifications_reach_observers() {
        let (mut engine, controller) = SimEngine::new();
        engine.load(&request()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = SourceId::new();
        let token = engine.add_observer(Observer::new(source, tx));
        controller.set_buffer_empty(true);
        assert_eq!(
            rx.try_recv().unwrap(),
            (source, EngineNotification::Changed(Property::PlaybackBufferEmpty))
        );
        engine.remove_observer(token);
        controller.set_buffer_full(true);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_held_seeks() {
        let (mut engine, controller) = SimEngine::new();
        engine.load(&request()).unwrap();
        controller.set_auto_complete_seeks(false);
        let done = Arc::new(Mutex::new(None));
        let flag = done.clone();
        engine.seek(
            MediaTime::from_millis(500),
            MediaTime::ZERO,
            MediaTime::ZERO,
            Box::new(move |finished| *flag.lock() = Some(finished)),
        );
        assert!(done.lock().is_none());
        controller.complete_seeks(true);
        assert_eq!(*done.lock(), Some(true));
        assert_eq!(controller.log().seeks, vec![500]);
    }

    #[test]
    fn test_script_action_parse() {
        let action: SimAction =
            serde_json::from_str(r#"{"action": "ready", "duration_ms": 5000, "width": 640, "height": 360}"#)
                .unwrap();
        assert_eq!(
            action,
            SimAction::Ready {
                duration_ms: Some(5000),
                width: 640.0,
                height: 360.0
            }
        );
    }
}
