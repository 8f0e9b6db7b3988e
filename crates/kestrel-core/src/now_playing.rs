//! Lock-screen metadata and remote control
//!
//! While a session with `showNotification` plays, a [`NowPlayingNotifier`]
//! republishes its title, progress and artwork every interval. Remote
//! commands from the lock screen come back as events on the session stream.

use crate::{
    events::PlayerEvent,
    platform::Platform,
    session::{PlaybackSession, SessionHandle},
    time::interval_to_millis,
    Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cover image shown on the lock screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artwork {
    /// Path or URL the image was loaded from
    pub source: String,
    #[serde(skip)]
    pub bytes: Bytes,
}

/// Lock-screen metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlayingInfo {
    pub title: String,
    pub author: String,
    pub elapsed_secs: f64,
    pub duration_secs: f64,
    pub playback_rate: f64,
    pub artwork: Option<Artwork>,
}

/// Static part of the lock-screen metadata, taken from the data source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NowPlayingMetadata {
    pub title: String,
    pub author: String,
    pub image_url: Option<String>,
}

/// Loads artwork bytes from a local path or an http(s) URL
#[async_trait]
pub trait ArtworkLoader: Send + Sync {
    async fn load(&self, location: &str) -> Result<Bytes>;
}

/// Default loader: HTTP for anything that looks like a URL, filesystem otherwise
pub struct HttpArtworkLoader {
    client: Client,
}

impl HttpArtworkLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtworkLoader for HttpArtworkLoader {
    async fn load(&self, location: &str) -> Result<Bytes> {
        if location.contains("http") {
            let response = self.client.get(location).send().await?;
            let response = response.error_for_status()?;
            Ok(response.bytes().await?)
        } else {
            Ok(Bytes::from(tokio::fs::read(location).await?))
        }
    }
}

/// Artwork loaded per session, shared with the running notifier
#[derive(Debug, Clone, Default)]
pub struct ArtworkCache {
    entries: Arc<Mutex<HashMap<i64, Artwork>>>,
}

impl ArtworkCache {
    pub fn get(&self, texture_id: i64) -> Option<Artwork> {
        self.entries.lock().get(&texture_id).cloned()
    }

    pub fn insert(&self, texture_id: i64, artwork: Artwork) {
        self.entries.lock().insert(texture_id, artwork);
    }

    pub fn remove(&self, texture_id: i64) -> Option<Artwork> {
        self.entries.lock().remove(&texture_id)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Everything a notifier needs to republish metadata
pub struct NotifierContext {
    pub session: SessionHandle,
    pub platform: Arc<dyn Platform>,
    pub metadata: NowPlayingMetadata,
    pub artwork: ArtworkCache,
    pub loader: Arc<dyn ArtworkLoader>,
}

/// Periodic now-playing publisher for one session
pub struct NowPlayingNotifier {
    texture_id: i64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl NowPlayingNotifier {
    /// Publishes immediately, then every `interval` until cancelled
    pub fn spawn(context: NotifierContext, interval: Duration) -> Self {
        let texture_id = context.session.texture_id();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // A cancelled notifier must not publish, even mid artwork load
                let outcome = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    outcome = publish(&context, &cancelled) => outcome,
                };
                if let Err(err) = outcome {
                    debug!(texture_id, error = %err, "Now-playing notifier stopped");
                    break;
                }
            }
        });

        Self {
            texture_id,
            token,
            task,
        }
    }

    pub fn texture_id(&self) -> i64 {
        self.texture_id
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for NowPlayingNotifier {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Publishes the current metadata of `context.session` once.
///
/// Nothing is cached or published once `cancelled` fires.
pub async fn publish(context: &NotifierContext, cancelled: &CancellationToken) -> Result<()> {
    let texture_id = context.session.texture_id();
    let (position, duration) = context
        .session
        .with(|s| (s.position(), s.duration()))
        .await?;

    let mut info = NowPlayingInfo {
        title: context.metadata.title.clone(),
        author: context.metadata.author.clone(),
        elapsed_secs: position as f64 / 1000.0,
        duration_secs: duration as f64 / 1000.0,
        playback_rate: 1.0,
        artwork: None,
    };

    if let Some(location) = &context.metadata.image_url {
        info.artwork = match context.artwork.get(texture_id) {
            Some(artwork) => Some(artwork),
            None => match context.loader.load(location).await {
                Ok(_) if cancelled.is_cancelled() => return Ok(()),
                Ok(bytes) => {
                    let artwork = Artwork {
                        source: location.clone(),
                        bytes,
                    };
                    context.artwork.insert(texture_id, artwork.clone());
                    Some(artwork)
                }
                Err(err) => {
                    warn!(texture_id, location, error = %err, "Failed to load artwork");
                    None
                }
            },
        };
    }

    if cancelled.is_cancelled() {
        debug!(texture_id, "Notifier cancelled, dropping now-playing update");
        return Ok(());
    }
    context.platform.publish_now_playing(Some(info));
    Ok(())
}

/// Command received from the lock screen or a headset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum RemoteCommand {
    TogglePlayPause,
    Play,
    Pause,
    #[serde(rename_all = "camelCase")]
    ChangePlaybackPosition {
        position_secs: f64,
    },
}

impl RemoteCommand {
    /// Applies the command to `session`, reporting it on the event stream
    pub fn apply(self, session: &mut PlaybackSession) {
        match self {
            RemoteCommand::TogglePlayPause => {
                let event = if session.is_playing() {
                    PlayerEvent::Play
                } else {
                    PlayerEvent::Pause
                };
                session.emit(event);
            }
            RemoteCommand::Play => session.emit(PlayerEvent::Play),
            RemoteCommand::Pause => session.emit(PlayerEvent::Pause),
            RemoteCommand::ChangePlaybackPosition { position_secs } => {
                let position = remote_position_millis(position_secs);
                session.seek_to(position);
                session.emit(PlayerEvent::Seek { position });
            }
        }
    }
}

/// Remote positions are whole seconds
pub fn remote_position_millis(position_secs: f64) -> i64 {
    if !position_secs.is_finite() {
        return 0;
    }
    interval_to_millis(position_secs.trunc())
}
