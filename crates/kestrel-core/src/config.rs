//! Host, session and cache configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-session tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay between stall re-checks (milliseconds)
    pub stall_poll_interval_ms: u64,
    /// Stall re-checks before the fatal playback error
    pub max_stall_retries: u32,
    /// Buffered-ahead time that makes a rate drop transient (seconds)
    pub stall_buffer_ahead_secs: f64,
    /// Frame-delivery clock period (milliseconds)
    pub frame_interval_ms: f64,
    /// Clock periods to wait after a seek completes
    pub seek_settle_frames: u32,
    /// Consecutive frame misses before the video output is re-attached
    pub frame_failure_limit: u32,
    /// Preferred forward buffer for uncached network sources (seconds)
    pub preferred_forward_buffer_secs: f64,
    /// Frame rate of the orientation composition
    pub composition_frame_rate: i32,
    /// Seek target used when looping back to the start (milliseconds)
    pub loop_restart_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stall_poll_interval_ms: 1000,
            max_stall_retries: 50,
            stall_buffer_ahead_secs: 10.0,
            frame_interval_ms: 1000.0 / 60.0,
            seek_settle_frames: 2,
            frame_failure_limit: 100,
            preferred_forward_buffer_secs: 3.0,
            composition_frame_rate: 30,
            loop_restart_ms: 1,
        }
    }
}

impl SessionConfig {
    pub fn stall_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stall_poll_interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frame_interval_ms / 1000.0)
    }

    pub fn preferred_forward_buffer(&self) -> Duration {
        Duration::from_secs_f64(self.preferred_forward_buffer_secs.max(0.0))
    }

    /// Wait applied after a seek completes before trusting frames again
    pub fn seek_settle_delay(&self) -> Duration {
        self.frame_interval() * self.seek_settle_frames
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_interval_ms <= 0.0 || !self.frame_interval_ms.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "frame_interval_ms must be positive, got {}",
                self.frame_interval_ms
            )));
        }
        if self.composition_frame_rate <= 0 {
            return Err(Error::InvalidConfig(format!(
                "composition_frame_rate must be positive, got {}",
                self.composition_frame_rate
            )));
        }
        if self.stall_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "stall_poll_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Caching reverse-proxy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Address the proxy serves on
    pub host: String,
    pub port: u16,
    /// Store capacity in bytes
    pub byte_limit: u64,
    /// Maximum nested playlist hops followed by pre-caching
    pub max_playlist_depth: usize,
    /// Cap on segments fetched per media playlist (`None` fetches all)
    pub max_precache_segments: Option<usize>,
    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            byte_limit: 3 * 1024 * 1024 * 1024,
            max_playlist_depth: 4,
            max_precache_segments: None,
            request_timeout_ms: 10_000,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub session: SessionConfig,
    pub cache: CacheConfig,
    /// Now-playing refresh period (milliseconds)
    pub now_playing_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            cache: CacheConfig::default(),
            now_playing_interval_ms: 1000,
        }
    }
}

impl HostConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(json)?;
        config.session.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn now_playing_interval(&self) -> Duration {
        Duration::from_millis(self.now_playing_interval_ms.max(1))
    }
}
