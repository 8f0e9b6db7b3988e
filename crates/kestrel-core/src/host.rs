//! Host method-call router
//!
//! Translates named method calls with JSON arguments into session, cache
//! and platform operations. Calls without a known `textureId` resolve to
//! [`Error::NotImplemented`], the answer hosts expect for unsupported
//! methods.

use crate::{
    asset::DataSource,
    cache::CacheManager,
    config::HostConfig,
    engine::EngineFactory,
    events::EventStream,
    now_playing::{
        ArtworkLoader, HttpArtworkLoader, NotifierContext, NowPlayingMetadata, NowPlayingNotifier,
        RemoteCommand,
    },
    platform::Platform,
    registry::SessionRegistry,
    session::SessionHandle,
    Error, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// One call from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

pub struct PlayerHost {
    config: HostConfig,
    platform: Arc<dyn Platform>,
    engines: Arc<dyn EngineFactory>,
    cache: Arc<CacheManager>,
    artwork_loader: Arc<dyn ArtworkLoader>,
    registry: Arc<RwLock<SessionRegistry>>,
}

impl PlayerHost {
    pub fn new(
        config: HostConfig,
        platform: Arc<dyn Platform>,
        engines: Arc<dyn EngineFactory>,
    ) -> Result<Self> {
        config.session.validate()?;
        let cache = Arc::new(CacheManager::new(config.cache.clone()));
        let timeout = Duration::from_millis(config.cache.request_timeout_ms);
        let artwork_loader = Arc::new(HttpArtworkLoader::new(timeout)?);
        Ok(Self::with_parts(
            config,
            platform,
            engines,
            cache,
            artwork_loader,
        ))
    }

    pub fn with_parts(
        config: HostConfig,
        platform: Arc<dyn Platform>,
        engines: Arc<dyn EngineFactory>,
        cache: Arc<CacheManager>,
        artwork_loader: Arc<dyn ArtworkLoader>,
    ) -> Self {
        Self {
            config,
            platform,
            engines,
            cache,
            artwork_loader,
            registry: Arc::new(RwLock::new(SessionRegistry::new())),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<RwLock<SessionRegistry>> {
        &self.registry
    }

    pub async fn session(&self, texture_id: i64) -> Option<SessionHandle> {
        self.registry.read().await.get(texture_id)
    }

    /// Routes one method call
    #[instrument(skip(self, call), fields(method = %call.method))]
    pub async fn handle(&self, call: MethodCall) -> Result<Value> {
        match call.method.as_str() {
            "init" => {
                self.init().await;
                Ok(Value::Null)
            }
            "create" => {
                let texture_id = self.create().await?;
                Ok(json!({ "textureId": texture_id }))
            }
            "clearCache" => {
                self.cache.clear();
                Ok(Value::Null)
            }
            "preCache" => {
                let url = arg_str(&call.args, "dataSource")
                    .ok_or_else(|| Error::invalid_argument("dataSource", "expected a URL string"))?;
                self.spawn_pre_cache(Url::parse(url)?);
                Ok(Value::Null)
            }
            method => {
                let session = match texture_id_arg(&call.args) {
                    Some(texture_id) => self.session(texture_id).await,
                    None => None,
                };
                match session {
                    Some(session) => self.dispatch(method, &call.args, session).await,
                    None if method == "dispose" && self.was_released(&call.args).await => {
                        Ok(Value::Null)
                    }
                    None => Err(Error::NotImplemented(method.to_string())),
                }
            }
        }
    }

    async fn was_released(&self, args: &Value) -> bool {
        match texture_id_arg(args) {
            Some(texture_id) => self.registry.read().await.was_released(texture_id),
            None => false,
        }
    }

    async fn dispatch(&self, method: &str, args: &Value, session: SessionHandle) -> Result<Value> {
        let texture_id = session.texture_id();
        match method {
            "setDataSource" => {
                let Some(source) = args.get("dataSource").filter(|v| v.is_object()) else {
                    return Err(Error::NotImplemented(method.to_string()));
                };
                let source: DataSource = serde_json::from_value(source.clone())?;
                self.set_data_source(&session, source).await?;
            }
            "dispose" => self.dispose(texture_id).await?,
            "setLooping" => {
                if let Some(looping) = arg_bool(args, "looping") {
                    session.set_looping(looping).await?;
                }
            }
            "setVolume" => {
                if let Some(volume) = arg_f64(args, "volume") {
                    session.set_volume(volume).await?;
                }
            }
            "play" => {
                self.setup_remote_notification(&session).await;
                session.play().await?;
            }
            "position" => return Ok(json!(session.position().await?)),
            "absolutePosition" => return Ok(json!(session.absolute_position().await?)),
            "seekTo" => {
                if let Some(location) = arg_i64(args, "location") {
                    session.seek_to(location).await?;
                }
            }
            "pause" => session.pause().await?,
            "getIsPlaying" => return Ok(json!(session.is_playing().await?)),
            "setSpeed" => {
                let speed = arg_f64(args, "speed")
                    .ok_or_else(|| Error::invalid_argument("speed", "expected a number"))?;
                session.set_speed(speed).await?;
            }
            "setTrackParameters" => {
                let width = u32::try_from(arg_i64(args, "width").unwrap_or(0)).unwrap_or(0);
                let height = u32::try_from(arg_i64(args, "height").unwrap_or(0)).unwrap_or(0);
                let bitrate = u64::try_from(arg_i64(args, "bitrate").unwrap_or(0)).unwrap_or(0);
                session.set_track_parameters(width, height, bitrate).await?;
            }
            "setAudioTrack" => {
                let name = arg_str(args, "name");
                let index = arg_i64(args, "index").and_then(|i| usize::try_from(i).ok());
                if let (Some(name), Some(index)) = (name, index) {
                    session.set_audio_track(name.to_string(), index).await?;
                }
            }
            "setMixWithOthers" => {
                if let Some(mix) = arg_bool(args, "mixWithOthers") {
                    self.platform.set_audio_mix_with_others(mix);
                }
            }
            _ => return Err(Error::NotImplemented(method.to_string())),
        }
        Ok(Value::Null)
    }

    /// Disposes every session, unregistering its texture
    pub async fn init(&self) {
        let removed = self.registry.write().await.drain();
        for entry in removed {
            let texture_id = entry.handle.texture_id();
            self.platform.unregister_texture(texture_id);
            if let Err(err) = entry.handle.dispose().await {
                debug!(texture_id, error = %err, "Session already stopped");
            }
        }
        info!("Host initialized");
    }

    /// Registers a texture and starts a session for it
    pub async fn create(&self) -> Result<i64> {
        let texture_id = self
            .platform
            .register_texture()
            .ok_or_else(|| Error::PlayerCreation("texture registry is not available".into()))?;

        let handle = SessionHandle::spawn(
            texture_id,
            self.config.session.clone(),
            self.engines.create(),
            self.platform.clone(),
        );
        self.platform.set_audio_mix_with_others(false);
        self.registry.write().await.insert(handle);
        info!(texture_id, "Session created");
        Ok(texture_id)
    }

    /// Clears the session, remembers `source` and loads it.
    ///
    /// The session stays cleared when the source cannot be resolved.
    pub async fn set_data_source(&self, session: &SessionHandle, source: DataSource) -> Result<()> {
        let texture_id = session.texture_id();
        session.clear().await?;
        self.registry
            .write()
            .await
            .set_data_source(texture_id, source.clone());

        let request = source.to_request(self.platform.as_ref(), &self.cache, &self.config.session)?;
        session
            .set_data_source(request, source.key().to_string())
            .await
    }

    /// Tears a session down and releases everything held for it.
    ///
    /// Disposing a texture that is already torn down is a no-op.
    pub async fn dispose(&self, texture_id: i64) -> Result<()> {
        if self.teardown(texture_id, true).await {
            info!(texture_id, "Session disposed");
            return Ok(());
        }
        if self.registry.read().await.was_released(texture_id) {
            debug!(texture_id, "Session already disposed");
            return Ok(());
        }
        Err(Error::UnknownTexture(texture_id))
    }

    /// Disposes a session whose texture the host dropped on its own
    pub async fn on_texture_unregistered(&self, texture_id: i64) {
        if self.teardown(texture_id, false).await {
            info!(texture_id, "Session released with its texture");
        }
    }

    /// Shared by both disposal paths; returns false when no session was live
    async fn teardown(&self, texture_id: i64, unregister_texture: bool) -> bool {
        let Some(session) = self.session(texture_id).await else {
            return false;
        };
        if let Err(err) = session.clear().await {
            debug!(texture_id, error = %err, "Session already stopped");
        }

        let (removed, now_empty) = {
            let mut registry = self.registry.write().await;
            let removed = registry.remove(texture_id);
            (removed, registry.is_empty())
        };
        let Some(removed) = removed else {
            // Lost a race with the other disposal path
            return false;
        };
        self.platform.publish_now_playing(None);
        self.platform.set_remote_control_active(false);
        if unregister_texture {
            self.platform.unregister_texture(texture_id);
        }

        if removed.had_notifier {
            debug!(texture_id, "Now-playing notifier removed");
        }
        if let Err(err) = removed.handle.dispose().await {
            debug!(texture_id, error = %err, "Session already stopped");
        }
        if now_empty {
            self.platform.set_audio_session_active(false);
        }
        true
    }

    /// Disposes every session without closing the event streams
    pub async fn detach(&self) {
        let removed = self.registry.write().await.drain();
        for entry in removed {
            if let Err(err) = entry.handle.dispose_keeping_listener().await {
                debug!(texture_id = entry.handle.texture_id(), error = %err, "Session already stopped");
            }
        }
    }

    pub async fn listen(&self, texture_id: i64) -> Result<EventStream> {
        self.session(texture_id)
            .await
            .ok_or(Error::UnknownTexture(texture_id))?
            .listen()
            .await
    }

    pub async fn cancel_listen(&self, texture_id: i64) -> Result<()> {
        self.session(texture_id)
            .await
            .ok_or(Error::UnknownTexture(texture_id))?
            .cancel_listen()
            .await
    }

    /// Applies a remote command to the session owning the active notifier.
    ///
    /// Returns false when no notifier is running.
    pub async fn handle_remote_command(&self, command: RemoteCommand) -> Result<bool> {
        let session = {
            let registry = self.registry.read().await;
            registry
                .active_notifier()
                .and_then(|texture_id| registry.get(texture_id))
        };
        let Some(session) = session else {
            debug!(?command, "No active notifier for remote command");
            return Ok(false);
        };
        session.with(move |s| command.apply(s)).await?;
        Ok(true)
    }

    async fn setup_remote_notification(&self, session: &SessionHandle) {
        let texture_id = session.texture_id();
        let mut registry = self.registry.write().await;
        registry.stop_other_notifiers(texture_id);

        let Some(source) = registry.data_source(texture_id).cloned() else {
            return;
        };
        if !source.show_notification {
            return;
        }

        self.platform.set_audio_session_active(true);
        self.platform.set_remote_control_active(true);

        let context = NotifierContext {
            session: session.clone(),
            platform: self.platform.clone(),
            metadata: NowPlayingMetadata {
                title: source.title.unwrap_or_default(),
                author: source.author.unwrap_or_default(),
                image_url: source.image_url,
            },
            artwork: registry.artwork().clone(),
            loader: self.artwork_loader.clone(),
        };
        registry.install_notifier(NowPlayingNotifier::spawn(
            context,
            self.config.now_playing_interval(),
        ));
        debug!(texture_id, "Now-playing notifier installed");
    }

    fn spawn_pre_cache(&self, url: Url) {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            if let Err(err) = cache.pre_cache(&url).await {
                warn!(%url, error = %err, "Pre-cache failed");
            }
        });
    }
}

fn texture_id_arg(args: &Value) -> Option<i64> {
    args.get("textureId").and_then(Value::as_i64)
}

fn arg_bool(args: &Value, name: &str) -> Option<bool> {
    args.get(name).and_then(Value::as_bool)
}

fn arg_f64(args: &Value, name: &str) -> Option<f64> {
    args.get(name).and_then(Value::as_f64)
}

fn arg_i64(args: &Value, name: &str) -> Option<i64> {
    args.get(name).and_then(Value::as_i64)
}

fn arg_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}
