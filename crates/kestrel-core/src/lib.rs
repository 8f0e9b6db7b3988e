//! Kestrel Core - playback session controller
//!
//! This crate drives a platform decoding engine on behalf of a host UI:
//! - Asset resolution and orientation correction
//! - Buffering and readiness tracking
//! - Stall detection with bounded retries
//! - Seek coordination and frame delivery
//! - Per-session event streams
//! - Caching reverse-proxy collaborator
//! - Method-call routing for the host
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          PlayerHost                             │
//! │        (method calls, registry, cache, now-playing)             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │    Asset     │  │   Buffer /   │  │    Stall     │          │
//! │  │  Resolution  │  │  Readiness   │  │   Detector   │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │  ◄── one task per texture    │
//! │                    │   Session   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │    Seek      │  │    Event    │  │    Frame     │           │
//! │  │ Coordinator  │  │    Sink     │  │    Clock     │           │
//! │  └──────────────┘  └─────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod asset;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod now_playing;
pub mod platform;
pub mod registry;
pub mod seek;
pub mod session;
pub mod stall;
pub mod time;
pub mod tracker;
pub mod transform;

pub use asset::DataSource;
pub use cache::{CacheManager, PreCacheReport};
pub use config::{CacheConfig, HostConfig, SessionConfig};
pub use engine::{DecodingEngine, EngineFactory, SourceRequest};
pub use error::{Error, Result};
pub use events::{BufferedRange, EventStream, PlayerEvent, SessionEvent};
pub use host::{MethodCall, PlayerHost};
pub use now_playing::RemoteCommand;
pub use platform::{HeadlessPlatform, Platform};
pub use registry::SessionRegistry;
pub use session::{PlaybackSession, SessionHandle, SessionSnapshot};
pub use time::{MediaTime, TimeRange};
pub use transform::{AffineTransform, Size};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the controller library
pub fn init() {
    tracing::info!(version = VERSION, "Kestrel Core initialized");
}
