//! Host platform services
//!
//! Everything the controller needs from the embedding UI runtime: texture
//! registration and redraw signalling, bundled asset lookup, the audio
//! session and the lock-screen surfaces.

use crate::now_playing::NowPlayingInfo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// Services provided by the embedding runtime
pub trait Platform: Send + Sync {
    /// Allocates a texture slot; `None` when the registry is unavailable
    fn register_texture(&self) -> Option<i64>;

    fn unregister_texture(&self, _texture_id: i64) {}

    /// Tells the host a new frame can be pulled for `texture_id`
    fn frame_available(&self, _texture_id: i64) {}

    /// Resolves a bundled asset to a file path
    fn lookup_asset(&self, _asset: &str, _package: Option<&str>) -> Option<PathBuf> {
        None
    }

    fn set_audio_mix_with_others(&self, _mix: bool) {}

    fn set_audio_session_active(&self, _active: bool) {}

    /// Starts or stops receiving remote-control (lock-screen) commands
    fn set_remote_control_active(&self, _active: bool) {}

    /// Publishes lock-screen metadata; `None` clears it
    fn publish_now_playing(&self, _info: Option<NowPlayingInfo>) {}
}

#[derive(Debug, Default)]
struct Recorded {
    unregistered: Vec<i64>,
    frames: HashMap<i64, u64>,
    assets: HashMap<String, PathBuf>,
    mix_with_others: Vec<bool>,
    audio_session_active: Option<bool>,
    remote_control_active: Option<bool>,
    now_playing: Vec<Option<NowPlayingInfo>>,
}

/// In-process platform that records every call
#[derive(Debug)]
pub struct HeadlessPlatform {
    next_texture: AtomicI64,
    recorded: Mutex<Recorded>,
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self {
            next_texture: AtomicI64::new(1),
            recorded: Mutex::new(Recorded::default()),
        }
    }
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bundled asset path for [`Platform::lookup_asset`]
    pub fn add_asset(&self, asset: impl Into<String>, path: impl Into<PathBuf>) {
        self.recorded.lock().assets.insert(asset.into(), path.into());
    }

    pub fn frame_count(&self, texture_id: i64) -> u64 {
        self.recorded
            .lock()
            .frames
            .get(&texture_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn unregistered(&self) -> Vec<i64> {
        self.recorded.lock().unregistered.clone()
    }

    pub fn mix_with_others(&self) -> Vec<bool> {
        self.recorded.lock().mix_with_others.clone()
    }

    pub fn audio_session_active(&self) -> Option<bool> {
        self.recorded.lock().audio_session_active
    }

    pub fn remote_control_active(&self) -> Option<bool> {
        self.recorded.lock().remote_control_active
    }

    /// Every now-playing publication, oldest first
    pub fn now_playing(&self) -> Vec<Option<NowPlayingInfo>> {
        self.recorded.lock().now_playing.clone()
    }

    pub fn last_now_playing(&self) -> Option<NowPlayingInfo> {
        self.recorded.lock().now_playing.last().cloned().flatten()
    }
}

impl Platform for HeadlessPlatform {
    fn register_texture(&self) -> Option<i64> {
        Some(self.next_texture.fetch_add(1, Ordering::SeqCst))
    }

    fn unregister_texture(&self, texture_id: i64) {
        self.recorded.lock().unregistered.push(texture_id);
    }

    fn frame_available(&self, texture_id: i64) {
        *self.recorded.lock().frames.entry(texture_id).or_default() += 1;
    }

    fn lookup_asset(&self, asset: &str, package: Option<&str>) -> Option<PathBuf> {
        let recorded = self.recorded.lock();
        let key = match package {
            Some(package) => format!("packages/{package}/{asset}"),
            None => asset.to_string(),
        };
        recorded.assets.get(&key).cloned()
    }

    fn set_audio_mix_with_others(&self, mix: bool) {
        self.recorded.lock().mix_with_others.push(mix);
    }

    fn set_audio_session_active(&self, active: bool) {
        debug!(active, "Audio session");
        self.recorded.lock().audio_session_active = Some(active);
    }

    fn set_remote_control_active(&self, active: bool) {
        self.recorded.lock().remote_control_active = Some(active);
    }

    fn publish_now_playing(&self, info: Option<NowPlayingInfo>) {
        self.recorded.lock().now_playing.push(info);
    }
}
