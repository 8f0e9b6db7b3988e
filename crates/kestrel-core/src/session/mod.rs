//! Playback session controller
//!
//! One [`PlaybackSession`] drives one decoding engine for one texture. It is
//! owned by a single task (see [`SessionHandle`]); commands, engine
//! notifications and deferred continuations are all processed there, one at
//! a time, so the session state is never touched concurrently.
//!
//! Deferred work (metadata loads, stall re-checks, seek settling) runs on
//! spawned tasks that only post a [`Continuation`] back. Each continuation
//! carries the [`SourceId`] or seek epoch it was started for and is dropped
//! when that source has been replaced or the session disposed.

mod handle;

pub use handle::SessionHandle;

use crate::{
    asset::{self, AssetOrientation},
    clock::FrameClock,
    config::SessionConfig,
    engine::{
        DecodingEngine, EngineNotification, Frame, FramePull, ItemStatus, Observer, ObserverToken,
        Property, SourceId, SourceRequest,
    },
    events::{EventSink, EventStream, PlayerEvent, SessionEvent},
    platform::Platform,
    seek::SeekCoordinator,
    stall::{self, StallDetector, StallVerdict},
    time::MediaTime,
    tracker::{self, ReadinessInputs},
    transform::{AffineTransform, Size},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Work posted back to the session by its own spawned tasks
#[derive(Debug)]
pub(crate) enum Continuation {
    AssetResolved {
        source: SourceId,
        outcome: Result<AssetOrientation>,
    },
    StallRecheck {
        source: SourceId,
    },
    SeekCompleted {
        epoch: u64,
        finished: bool,
    },
    SeekSettled {
        epoch: u64,
    },
}

/// The source currently assigned to the engine
#[derive(Debug)]
struct ActiveSource {
    id: SourceId,
    /// Cancels every task started for this source
    token: CancellationToken,
    composition_attached: bool,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub texture_id: i64,
    pub key: Option<String>,
    pub is_initialized: bool,
    pub is_playing: bool,
    pub is_looping: bool,
    pub is_seeking: bool,
    pub is_disposed: bool,
    pub player_rate: f32,
    pub stalled_count: u32,
    pub failed_count: u32,
    pub position_ms: i64,
    pub duration_ms: i64,
    pub preferred_transform: AffineTransform,
    pub clock_paused: bool,
}

pub struct PlaybackSession {
    texture_id: i64,
    config: SessionConfig,
    engine: Box<dyn DecodingEngine>,
    platform: Arc<dyn Platform>,
    continuations: mpsc::UnboundedSender<Continuation>,
    notifications: mpsc::UnboundedSender<(SourceId, EngineNotification)>,
    events: EventSink,
    clock: FrameClock,

    key: Option<String>,
    source: Option<ActiveSource>,
    observer: Option<ObserverToken>,

    is_playing: bool,
    is_looping: bool,
    is_initialized: bool,
    disposed: bool,
    /// Rate applied on play, set by `set_speed`
    player_rate: f32,
    preferred_transform: AffineTransform,

    stall: StallDetector,
    seek: SeekCoordinator,

    /// Last delivered frame, returned while no new frame is available
    last_frame: Option<Frame>,
    failed_count: u32,

    lifetime: CancellationToken,
}

impl PlaybackSession {
    pub(crate) fn new(
        texture_id: i64,
        config: SessionConfig,
        engine: Box<dyn DecodingEngine>,
        platform: Arc<dyn Platform>,
        continuations: mpsc::UnboundedSender<Continuation>,
        notifications: mpsc::UnboundedSender<(SourceId, EngineNotification)>,
    ) -> Self {
        let clock = FrameClock::start(texture_id, config.frame_interval(), platform.clone());
        let stall = StallDetector::new(config.max_stall_retries, config.stall_buffer_ahead_secs);

        Self {
            texture_id,
            config,
            engine,
            platform,
            continuations,
            notifications,
            events: EventSink::default(),
            clock,
            key: None,
            source: None,
            observer: None,
            is_playing: false,
            is_looping: false,
            is_initialized: false,
            disposed: false,
            player_rate: 1.0,
            preferred_transform: AffineTransform::IDENTITY,
            stall,
            seek: SeekCoordinator::new(),
            last_frame: None,
            failed_count: 0,
            lifetime: CancellationToken::new(),
        }
    }

    pub fn texture_id(&self) -> i64 {
        self.texture_id
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_looping(&self) -> bool {
        self.is_looping
    }

    pub fn is_seeking(&self) -> bool {
        self.seek.is_seeking()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn player_rate(&self) -> f32 {
        self.player_rate
    }

    pub fn stalled_count(&self) -> u32 {
        self.stall.count()
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_count
    }

    pub fn preferred_transform(&self) -> AffineTransform {
        self.preferred_transform
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            texture_id: self.texture_id,
            key: self.key.clone(),
            is_initialized: self.is_initialized,
            is_playing: self.is_playing,
            is_looping: self.is_looping,
            is_seeking: self.seek.is_seeking(),
            is_disposed: self.disposed,
            player_rate: self.player_rate,
            stalled_count: self.stall.count(),
            failed_count: self.failed_count,
            position_ms: self.position(),
            duration_ms: self.duration(),
            preferred_transform: self.preferred_transform,
            clock_paused: self.clock.is_paused(),
        }
    }

    // =========================================================================
    // Event listener
    // =========================================================================

    /// Starts delivering events to a new stream.
    ///
    /// Readiness is re-attempted right away since the engine may have
    /// become ready before anyone listened.
    pub fn listen(&mut self) -> EventStream {
        let stream = self.events.listen();
        self.on_ready_to_play();
        stream
    }

    pub fn cancel_listen(&mut self) {
        self.events.cancel();
    }

    /// Emits an event on behalf of the host (remote-control commands)
    pub fn emit(&self, event: PlayerEvent) {
        self.events.emit(event);
    }

    // =========================================================================
    // Source lifecycle
    // =========================================================================

    /// Assigns a new source, resetting all per-source state
    #[instrument(skip(self, request), fields(texture_id = self.texture_id, url = %request.url))]
    pub fn set_data_source(&mut self, request: &SourceRequest, key: String) -> Result<()> {
        if self.disposed {
            return Err(Error::SessionClosed(self.texture_id));
        }

        self.clear();
        self.blank_frame();

        let asset = self.engine.load(request)?;

        self.key = Some(key);
        self.stall.reset();
        self.player_rate = 1.0;
        self.preferred_transform = AffineTransform::IDENTITY;

        let id = SourceId::new();
        let token = self.lifetime.child_token();
        self.source = Some(ActiveSource {
            id,
            token: token.clone(),
            composition_attached: false,
        });

        let tx = self.continuations.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => trace!(source = %id, "Asset resolution cancelled"),
                outcome = asset::load_orientation(asset.as_ref()) => {
                    let _ = tx.send(Continuation::AssetResolved { source: id, outcome });
                }
            }
        });

        self.add_observers();
        info!(source = %id, key = self.key(), "Data source set");
        Ok(())
    }

    /// Resets playback state and detaches from the current item
    pub fn clear(&mut self) {
        self.clock.set_paused(true);
        self.is_initialized = false;
        self.is_playing = false;
        self.failed_count = 0;
        self.key = None;
        self.engine.detach_video_output();
        self.stall.cancel();
        self.seek.cancel();

        if let Some(source) = self.source.take() {
            source.token.cancel();
        }
        if self.engine.has_item() {
            self.remove_observers();
            self.engine.cancel_loading();
        }
    }

    /// Tears the session down. Returns false if it was already disposed.
    #[instrument(skip(self), fields(texture_id = self.texture_id))]
    pub fn dispose(&mut self) -> bool {
        if !self.shutdown() {
            return false;
        }
        self.events.cancel();
        info!("Session disposed");
        true
    }

    /// Like [`dispose`](Self::dispose) but leaves the event listener alone,
    /// for hosts whose event channel is already gone.
    pub fn dispose_keeping_listener(&mut self) -> bool {
        if !self.shutdown() {
            return false;
        }
        info!(texture_id = self.texture_id, "Session disposed without touching listener");
        true
    }

    fn shutdown(&mut self) -> bool {
        if self.disposed {
            debug!(texture_id = self.texture_id, "Session already disposed");
            return false;
        }
        self.clear();
        self.clock.invalidate();
        self.lifetime.cancel();
        self.disposed = true;
        true
    }

    fn is_current(&self, source: SourceId) -> bool {
        !self.disposed && self.source.as_ref().is_some_and(|s| s.id == source)
    }

    fn add_observers(&mut self) {
        if self.observer.is_some() {
            return;
        }
        let Some(source) = self.source.as_ref() else {
            return;
        };
        let observer = Observer::new(source.id, self.notifications.clone());
        self.observer = Some(self.engine.add_observer(observer));
        trace!(texture_id = self.texture_id, "Observers attached");
    }

    fn remove_observers(&mut self) {
        if let Some(token) = self.observer.take() {
            self.engine.remove_observer(token);
            trace!(texture_id = self.texture_id, "Observers removed");
        }
    }

    // =========================================================================
    // Control surface
    // =========================================================================

    #[instrument(skip(self), fields(texture_id = self.texture_id))]
    pub fn play(&mut self) {
        if self.disposed {
            return;
        }
        self.stall.reset();
        self.is_playing = true;
        if !self.is_initialized || self.key.is_none() {
            warn!("play() before initialization, deferring");
            self.clock.set_paused(true);
            return;
        }

        self.add_observers();
        self.engine.play_immediately(1.0);
        self.engine.set_rate(self.player_rate);
        self.clock.set_paused(false);
        // Re-assigning the item makes some engines start promptly
        self.engine.reattach_current_item();
    }

    #[instrument(skip(self), fields(texture_id = self.texture_id))]
    pub fn pause(&mut self) {
        if self.disposed {
            return;
        }
        self.is_playing = false;
        if !self.is_initialized || self.key.is_none() {
            warn!("pause() before initialization");
            self.clock.set_paused(true);
            return;
        }

        self.add_observers();
        self.engine.pause();
        self.clock.set_paused(true);
    }

    /// Seeks with zero tolerance; only needs an item, not initialization
    #[instrument(skip(self), fields(texture_id = self.texture_id))]
    pub fn seek_to(&mut self, position_ms: i64) {
        if self.disposed {
            return;
        }
        if !self.engine.has_item() {
            warn!("seek_to() without an item");
            return;
        }

        let epoch = self.seek.begin(position_ms);
        // Keep frames flowing so intermediate seek frames are shown
        self.clock.set_paused(false);

        let tx = self.continuations.clone();
        self.engine.seek(
            MediaTime::from_millis(position_ms),
            MediaTime::ZERO,
            MediaTime::ZERO,
            Box::new(move |finished| {
                let _ = tx.send(Continuation::SeekCompleted { epoch, finished });
            }),
        );
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.is_looping = looping;
    }

    pub fn set_volume(&mut self, volume: f64) {
        if !self.is_initialized {
            warn!(texture_id = self.texture_id, volume, "set_volume() before initialization");
            return;
        }
        self.engine.set_volume(volume.clamp(0.0, 1.0) as f32);
    }

    /// Validates and stores the playback rate.
    ///
    /// 1.0 and 0.0 both mean normal speed. The stored rate is re-applied
    /// to a playing engine even when validation fails.
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        let capabilities = self.engine.capabilities();
        let result = if speed == 1.0 || speed == 0.0 {
            self.player_rate = 1.0;
            Ok(())
        } else if !(0.0..=2.0).contains(&speed) {
            Err(Error::UnsupportedSpeed { speed })
        } else if (speed > 1.0 && capabilities.can_play_fast_forward)
            || (speed < 1.0 && capabilities.can_play_slow_forward)
        {
            self.player_rate = speed as f32;
            Ok(())
        } else if speed > 1.0 {
            Err(Error::UnsupportedFastForward { speed })
        } else {
            Err(Error::UnsupportedSlowForward { speed })
        };

        if self.is_playing {
            self.engine.set_rate(self.player_rate);
        }
        result
    }

    /// Caps bitrate and, where supported, resolution. `0x0` lifts the cap.
    pub fn set_track_parameters(&mut self, width: u32, height: u32, bitrate: u64) {
        if !self.is_initialized {
            warn!(texture_id = self.texture_id, "set_track_parameters() before initialization");
            return;
        }
        self.engine.set_preferred_peak_bit_rate(bitrate as f64);
        if self.engine.capabilities().supports_maximum_resolution {
            let size = if width == 0 && height == 0 {
                Size::ZERO
            } else {
                Size::new(f64::from(width), f64::from(height))
            };
            self.engine.set_preferred_maximum_resolution(size);
        }
    }

    /// Selects the audio option at `index` if its title is `name`
    pub fn set_audio_track(&mut self, name: &str, index: usize) {
        if !self.is_initialized {
            warn!(texture_id = self.texture_id, "set_audio_track() before initialization");
            return;
        }
        let Some(options) = self.engine.audio_options() else {
            debug!(texture_id = self.texture_id, "No audible selection group");
            return;
        };
        let matches = options
            .get(index)
            .and_then(|option| option.title.as_deref())
            .is_some_and(|title| title == name);
        if matches {
            self.engine.select_audio_option(index);
        } else {
            debug!(texture_id = self.texture_id, name, index, "No matching audio option");
        }
    }

    /// Current position in milliseconds
    pub fn position(&self) -> i64 {
        self.engine.current_time().to_millis()
    }

    /// Wall-clock time of the current frame in epoch milliseconds, 0 if unknown
    pub fn absolute_position(&self) -> i64 {
        self.engine
            .current_date()
            .map(|date| date.timestamp_millis())
            .unwrap_or(0)
    }

    /// Duration in milliseconds, bounded by the forward end time when set
    pub fn duration(&self) -> i64 {
        tracker::playback_duration(
            self.engine.item_duration(),
            self.engine.forward_playback_end_time(),
        )
        .to_millis()
    }

    // =========================================================================
    // Frame delivery
    // =========================================================================

    /// Pulls the frame for "now" from the video output.
    ///
    /// Falls back to the last delivered frame; a long run of misses
    /// re-attaches the output.
    pub fn copy_frame(&mut self) -> Option<Frame> {
        if !self.engine.has_video_output() {
            return self.last_frame.clone();
        }
        match self.engine.copy_frame(Instant::now()) {
            FramePull::New(frame) => {
                self.failed_count = 0;
                self.last_frame = Some(frame.clone());
                Some(frame)
            }
            FramePull::Missing => {
                self.failed_count = 0;
                None
            }
            FramePull::Unchanged => {
                self.failed_count += 1;
                if self.failed_count > self.config.frame_failure_limit {
                    debug!(texture_id = self.texture_id, "Re-attaching video output");
                    self.failed_count = 0;
                    self.engine.detach_video_output();
                    self.engine.attach_video_output();
                }
                self.last_frame.clone()
            }
        }
    }

    fn blank_frame(&mut self) {
        if let Some(frame) = self.last_frame.as_mut() {
            *frame = frame.transparent();
        }
        self.platform.frame_available(self.texture_id);
    }

    // =========================================================================
    // Engine notifications
    // =========================================================================

    pub(crate) fn handle_notification(&mut self, source: SourceId, notification: EngineNotification) {
        if !self.is_current(source) {
            trace!(texture_id = self.texture_id, %source, "Dropping stale notification");
            return;
        }
        match notification {
            EngineNotification::PlayedToEnd => self.on_played_to_end(),
            EngineNotification::Changed(property) => self.on_property_changed(source, property),
        }
    }

    fn on_property_changed(&mut self, source: SourceId, property: Property) {
        match property {
            Property::Rate => {
                let unexpected = stall::is_unexpected_stop(
                    self.engine.rate(),
                    self.engine.current_time(),
                    self.engine.item_duration(),
                    self.is_playing,
                );
                if unexpected && !self.stall.is_pending() {
                    self.check_stall(source);
                }
            }
            Property::LoadedTimeRanges => {
                let Some(key) = self.key.clone() else {
                    return;
                };
                if !self.is_initialized {
                    return;
                }
                let values = tracker::buffered_ranges(
                    &self.engine.loaded_time_ranges(),
                    self.engine.forward_playback_end_time(),
                );
                self.events.emit(PlayerEvent::BufferingUpdate { values, key });
            }
            Property::Status => match self.engine.status() {
                ItemStatus::Failed(description) => {
                    error!(texture_id = self.texture_id, %description, "Failed to load video");
                    self.events.emit(SessionEvent::video_error(format!(
                        "Failed to load video: {description}"
                    )));
                }
                ItemStatus::ReadyToPlay => self.on_ready_to_play(),
                ItemStatus::Unknown => {}
            },
            Property::PresentationSize => self.on_ready_to_play(),
            Property::PlaybackLikelyToKeepUp => {
                if self.engine.is_playback_likely_to_keep_up() {
                    self.update_playing_state();
                    if let Some(key) = self.key.clone() {
                        self.events.emit(PlayerEvent::BufferingEnd { key });
                    }
                }
            }
            Property::PlaybackBufferEmpty => {
                if self.engine.is_playback_buffer_empty() {
                    if let Some(key) = self.key.clone() {
                        self.events.emit(PlayerEvent::BufferingStart { key });
                    }
                }
            }
            Property::PlaybackBufferFull => {
                if self.engine.is_playback_buffer_full() {
                    if let Some(key) = self.key.clone() {
                        self.events.emit(PlayerEvent::BufferingEnd { key });
                    }
                }
            }
        }
    }

    fn on_played_to_end(&mut self) {
        if self.is_looping {
            // Seeking to 0 would drop the data buffered at the start
            self.seek_to(self.config.loop_restart_ms);
            return;
        }
        if let Some(key) = self.key.clone() {
            if self.is_initialized {
                self.events.emit(PlayerEvent::Completed { key });
            }
            self.remove_observers();
        }
        self.engine.pause();
        self.is_playing = false;
        self.clock.set_paused(true);
    }

    /// The one-time transition to initialized
    fn on_ready_to_play(&mut self) {
        if self.is_initialized || self.disposed || self.source.is_none() {
            return;
        }
        if !self.events.is_listening() {
            debug!(texture_id = self.texture_id, "No listener yet, deferring initialization");
            return;
        }
        let Some(key) = self.key.clone() else {
            return;
        };

        let inputs = ReadinessInputs {
            status: self.engine.status(),
            has_video: self.engine.has_video_track(),
            presentation_size: self.engine.presentation_size(),
            item_duration: self.engine.item_duration(),
            duration_ms: self.duration(),
            first_track: self.engine.first_track_geometry(),
        };
        let ready = match tracker::check_readiness(&inputs) {
            Ok(ready) => ready,
            Err(deferral) => {
                debug!(texture_id = self.texture_id, ?deferral, "Not ready yet");
                return;
            }
        };

        self.is_initialized = true;
        self.engine.attach_video_output();
        self.update_playing_state();

        info!(
            texture_id = self.texture_id,
            key = %key,
            duration_ms = ready.duration_ms,
            size = %ready.size,
            "Player initialized"
        );
        self.events.emit(PlayerEvent::Initialized {
            duration: ready.duration_ms,
            width: ready.size.width,
            height: ready.size.height,
            key,
        });
    }

    /// Applies the playing intent to the engine and the clock
    fn update_playing_state(&mut self) {
        if !self.is_initialized || self.key.is_none() {
            debug!(texture_id = self.texture_id, "Not initialized, clock paused");
            self.clock.set_paused(true);
            return;
        }

        self.add_observers();
        if self.is_playing {
            self.engine.play_immediately(1.0);
            self.engine.set_rate(self.player_rate);
            self.clock.set_paused(false);
        } else {
            self.engine.pause();
            // A seek keeps the clock running until it settles
            if !self.seek.is_seeking() {
                self.clock.set_paused(true);
            }
        }
    }

    // =========================================================================
    // Continuations
    // =========================================================================

    pub(crate) fn handle_continuation(&mut self, continuation: Continuation) {
        if self.disposed {
            trace!(texture_id = self.texture_id, ?continuation, "Dropping continuation of disposed session");
            return;
        }
        match continuation {
            Continuation::AssetResolved { source, outcome } => {
                self.on_asset_resolved(source, outcome)
            }
            Continuation::StallRecheck { source } => {
                if !self.is_current(source) {
                    return;
                }
                self.stall.fired();
                if !self.is_playing {
                    debug!(texture_id = self.texture_id, "No longer playing, stall loop ends");
                    return;
                }
                self.check_stall(source);
            }
            Continuation::SeekCompleted { epoch, finished } => {
                if !self.seek.is_current(epoch) {
                    return;
                }
                debug!(texture_id = self.texture_id, epoch, finished, "Seek completed, settling");
                let tx = self.continuations.clone();
                let token = self.lifetime.clone();
                let delay = self.config.seek_settle_delay();
                let task = tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(Continuation::SeekSettled { epoch });
                        }
                    }
                });
                self.seek.schedule_settle(task);
            }
            Continuation::SeekSettled { epoch } => {
                if self.seek.settle(epoch) {
                    self.clock.set_paused(!self.is_playing);
                }
            }
        }
    }

    fn on_asset_resolved(&mut self, source: SourceId, outcome: Result<AssetOrientation>) {
        if !self.is_current(source) {
            trace!(texture_id = self.texture_id, %source, "Dropping stale asset resolution");
            return;
        }
        match outcome {
            Ok(AssetOrientation::AudioOnly) => {
                debug!(texture_id = self.texture_id, "Audio-only asset, no composition");
            }
            Ok(AssetOrientation::Video { geometry, duration }) => {
                let Some(active) = self.source.as_mut() else {
                    return;
                };
                if active.composition_attached {
                    return;
                }
                let (resolved, composition) = asset::orientation_composition(
                    &geometry,
                    duration,
                    self.config.composition_frame_rate,
                );
                debug!(
                    texture_id = self.texture_id,
                    rotation = ?resolved.rotation,
                    render_size = %composition.render_size,
                    "Attaching orientation composition"
                );
                active.composition_attached = true;
                self.preferred_transform = resolved.transform;
                self.engine.set_composition(composition);
            }
            Err(err) => {
                warn!(
                    texture_id = self.texture_id,
                    error = %err,
                    "Track metadata unavailable, playing without orientation correction"
                );
            }
        }
    }

    /// One cycle of the stall loop
    fn check_stall(&mut self, source: SourceId) {
        let ahead = stall::buffered_ahead(
            &self.engine.loaded_time_ranges(),
            self.engine.current_time(),
        );
        match self
            .stall
            .evaluate(self.engine.is_playback_likely_to_keep_up(), ahead)
        {
            StallVerdict::Transient | StallVerdict::Exhausted => {}
            StallVerdict::Escalate => {
                error!(
                    texture_id = self.texture_id,
                    stalled_count = self.stall.count(),
                    "Playback stalled"
                );
                self.events
                    .emit(SessionEvent::video_error(stall::STALL_MESSAGE));
            }
            StallVerdict::Retry => {
                let Some(active) = self.source.as_ref() else {
                    return;
                };
                let token = active.token.clone();
                let tx = self.continuations.clone();
                let delay = self.config.stall_poll_interval();
                let task = tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(Continuation::StallRecheck { source });
                        }
                    }
                });
                self.stall.arm(task);
            }
        }
    }
}
