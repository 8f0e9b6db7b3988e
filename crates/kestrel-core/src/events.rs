//! Events delivered to the host
//!
//! Records serialize to the JSON shape the host expects, tagged by
//! `"event"`. Errors travel on the same stream as `{code, message}`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Buffered span in milliseconds, serialized as `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedRange(pub i64, pub i64);

impl BufferedRange {
    pub fn start(&self) -> i64 {
        self.0
    }

    pub fn end(&self) -> i64 {
        self.1
    }
}

/// Playback lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PlayerEvent {
    Initialized {
        duration: i64,
        width: f64,
        height: f64,
        key: String,
    },
    Completed {
        key: String,
    },
    BufferingUpdate {
        values: Vec<BufferedRange>,
        key: String,
    },
    BufferingStart {
        key: String,
    },
    BufferingEnd {
        key: String,
    },
    Play,
    Pause,
    Seek {
        position: i64,
    },
}

impl PlayerEvent {
    /// Name of the event as seen by the host
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Initialized { .. } => "initialized",
            PlayerEvent::Completed { .. } => "completed",
            PlayerEvent::BufferingUpdate { .. } => "bufferingUpdate",
            PlayerEvent::BufferingStart { .. } => "bufferingStart",
            PlayerEvent::BufferingEnd { .. } => "bufferingEnd",
            PlayerEvent::Play => "play",
            PlayerEvent::Pause => "pause",
            PlayerEvent::Seek { .. } => "seek",
        }
    }
}

/// One item on a session's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionEvent {
    Event(PlayerEvent),
    Error { code: String, message: String },
}

impl SessionEvent {
    pub const VIDEO_ERROR: &'static str = "VideoError";

    pub fn video_error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            code: Self::VIDEO_ERROR.to_string(),
            message: message.into(),
        }
    }

    pub fn as_event(&self) -> Option<&PlayerEvent> {
        match self {
            SessionEvent::Event(event) => Some(event),
            SessionEvent::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionEvent::Error { .. })
    }
}

impl From<PlayerEvent> for SessionEvent {
    fn from(event: PlayerEvent) -> Self {
        SessionEvent::Event(event)
    }
}

/// Receiving half handed to the host when it starts listening
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

/// Sending half held by a session while the host listens.
///
/// Fire-and-forget: a closed receiver drops the event.
#[derive(Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    /// Installs a fresh channel, replacing any previous listener
    pub fn listen(&mut self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    pub fn cancel(&mut self) {
        self.tx = None;
    }

    pub fn is_listening(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn emit(&self, event: impl Into<SessionEvent>) {
        let event = event.into();
        match &self.tx {
            Some(tx) => {
                trace!(?event, "Emitting event");
                let _ = tx.send(event);
            }
            None => trace!(?event, "No listener, event dropped"),
        }
    }
}
