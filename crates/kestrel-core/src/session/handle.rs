//! Session task and its handle

use super::{Continuation, PlaybackSession, SessionSnapshot};
use crate::{
    config::SessionConfig,
    engine::{DecodingEngine, EngineNotification, Frame, SourceId, SourceRequest},
    events::{EventStream, PlayerEvent},
    platform::Platform,
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, Instrument};

type Command = Box<dyn FnOnce(&mut PlaybackSession) + Send>;

/// Cloneable handle to a session running on its own task.
///
/// Every call is queued and executed in order on the session task. Calls
/// fail with [`Error::SessionClosed`] once the task has stopped.
#[derive(Clone)]
pub struct SessionHandle {
    texture_id: i64,
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("texture_id", &self.texture_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl SessionHandle {
    /// Creates a session and spawns its task on the current runtime
    pub fn spawn(
        texture_id: i64,
        config: SessionConfig,
        engine: Box<dyn DecodingEngine>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        let (continuation_tx, continuations) = mpsc::unbounded_channel();
        let (notification_tx, notifications) = mpsc::unbounded_channel();

        let session = PlaybackSession::new(
            texture_id,
            config,
            engine,
            platform,
            continuation_tx,
            notification_tx,
        );
        let span = tracing::info_span!("session", texture_id);
        tokio::spawn(run(session, commands, continuations, notifications).instrument(span));

        Self { texture_id, tx }
    }

    pub fn texture_id(&self) -> i64 {
        self.texture_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Runs `f` on the session task and returns its result
    pub async fn with<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut PlaybackSession) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |session| {
                let _ = reply_tx.send(f(session));
            }))
            .map_err(|_| Error::SessionClosed(self.texture_id))?;
        reply_rx
            .await
            .map_err(|_| Error::SessionClosed(self.texture_id))
    }

    pub async fn set_data_source(&self, request: SourceRequest, key: String) -> Result<()> {
        self.with(move |s| s.set_data_source(&request, key)).await?
    }

    pub async fn clear(&self) -> Result<()> {
        self.with(|s| s.clear()).await
    }

    pub async fn listen(&self) -> Result<EventStream> {
        self.with(|s| s.listen()).await
    }

    pub async fn cancel_listen(&self) -> Result<()> {
        self.with(|s| s.cancel_listen()).await
    }

    pub async fn play(&self) -> Result<()> {
        self.with(|s| s.play()).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.with(|s| s.pause()).await
    }

    pub async fn seek_to(&self, position_ms: i64) -> Result<()> {
        self.with(move |s| s.seek_to(position_ms)).await
    }

    pub async fn set_looping(&self, looping: bool) -> Result<()> {
        self.with(move |s| s.set_looping(looping)).await
    }

    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        self.with(move |s| s.set_volume(volume)).await
    }

    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        self.with(move |s| s.set_speed(speed)).await?
    }

    pub async fn set_track_parameters(&self, width: u32, height: u32, bitrate: u64) -> Result<()> {
        self.with(move |s| s.set_track_parameters(width, height, bitrate))
            .await
    }

    pub async fn set_audio_track(&self, name: String, index: usize) -> Result<()> {
        self.with(move |s| s.set_audio_track(&name, index)).await
    }

    pub async fn position(&self) -> Result<i64> {
        self.with(|s| s.position()).await
    }

    pub async fn absolute_position(&self) -> Result<i64> {
        self.with(|s| s.absolute_position()).await
    }

    pub async fn duration(&self) -> Result<i64> {
        self.with(|s| s.duration()).await
    }

    pub async fn is_playing(&self) -> Result<bool> {
        self.with(|s| s.is_playing()).await
    }

    pub async fn copy_frame(&self) -> Result<Option<Frame>> {
        self.with(|s| s.copy_frame()).await
    }

    pub async fn emit(&self, event: PlayerEvent) -> Result<()> {
        self.with(move |s| s.emit(event)).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.with(|s| s.snapshot()).await
    }

    /// Returns false if the session was already disposed
    pub async fn dispose(&self) -> Result<bool> {
        self.with(|s| s.dispose()).await
    }

    pub async fn dispose_keeping_listener(&self) -> Result<bool> {
        self.with(|s| s.dispose_keeping_listener()).await
    }
}

/// Session task: drains continuations and notifications before commands so
/// a command observes every change already reported by the engine.
async fn run(
    mut session: PlaybackSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut continuations: mpsc::UnboundedReceiver<Continuation>,
    mut notifications: mpsc::UnboundedReceiver<(SourceId, EngineNotification)>,
) {
    loop {
        tokio::select! {
            biased;
            Some(continuation) = continuations.recv() => session.handle_continuation(continuation),
            Some((source, notification)) = notifications.recv() => {
                session.handle_notification(source, notification)
            }
            command = commands.recv() => match command {
                Some(command) => command(&mut session),
                None => break,
            },
        }
    }

    session.dispose();
    debug!("Session task finished");
}
