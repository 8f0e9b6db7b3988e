//! Shared fixtures for the integration tests

#![allow(dead_code)]

use kestrel_core::engine::sim::{SimController, SimEngine};
use kestrel_core::transform::TrackGeometry;
use kestrel_core::{
    AffineTransform, EventStream, HeadlessPlatform, MediaTime, SessionConfig, SessionEvent,
    SessionHandle, Size, SourceRequest,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const TEXTURE_ID: i64 = 7;

pub struct Harness {
    pub handle: SessionHandle,
    pub controller: SimController,
    pub platform: Arc<HeadlessPlatform>,
}

pub fn spawn_session() -> Harness {
    spawn_session_with(SessionConfig::default())
}

pub fn spawn_session_with(config: SessionConfig) -> Harness {
    let (engine, controller) = SimEngine::new();
    let platform = Arc::new(HeadlessPlatform::new());
    let handle = SessionHandle::spawn(TEXTURE_ID, config, Box::new(engine), platform.clone());
    Harness {
        handle,
        controller,
        platform,
    }
}

pub fn request(url: &str) -> SourceRequest {
    SourceRequest {
        url: Url::parse(url).unwrap(),
        headers: Default::default(),
        preferred_forward_buffer: None,
        forward_playback_end: None,
    }
}

pub fn landscape() -> TrackGeometry {
    TrackGeometry {
        natural_size: Size::new(1920.0, 1080.0),
        preferred_transform: AffineTransform::IDENTITY,
    }
}

/// 1080x1920 stored with a 90° rotation and no translation
pub fn portrait() -> TrackGeometry {
    TrackGeometry {
        natural_size: Size::new(1080.0, 1920.0),
        preferred_transform: AffineTransform::rotation(90.0),
    }
}

/// Lets every runnable task finish. Needs the paused test clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain(events: &mut EventStream) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Loads a landscape source, listens and drives it to `initialized`
pub async fn initialized(harness: &Harness, key: &str) -> EventStream {
    harness
        .handle
        .set_data_source(request("http://127.0.0.1:8080/a.m3u8"), key.to_string())
        .await
        .unwrap();
    let mut events = harness.handle.listen().await.unwrap();
    harness
        .controller
        .resolve_video_tracks(landscape(), MediaTime::from_millis(10_000));
    harness
        .controller
        .set_ready(MediaTime::from_millis(10_000), Size::new(1920.0, 1080.0));
    settle().await;
    let initial = drain(&mut events);
    assert_eq!(initial.len(), 1, "expected a single initialized event: {initial:?}");
    events
}
