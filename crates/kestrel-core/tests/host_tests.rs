//! Host router tests

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{drain, landscape, settle};
use kestrel_core::engine::sim::SimFactory;
use kestrel_core::now_playing::ArtworkLoader;
use kestrel_core::{
    CacheConfig, CacheManager, Error, HeadlessPlatform, HostConfig, MediaTime, MethodCall,
    PlayerEvent, PlayerHost, RemoteCommand, SessionEvent, Size,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct TestHost {
    host: PlayerHost,
    platform: Arc<HeadlessPlatform>,
    engines: SimFactory,
}

fn host() -> TestHost {
    let platform = Arc::new(HeadlessPlatform::new());
    let engines = SimFactory::new();
    let host = PlayerHost::new(
        HostConfig::default(),
        platform.clone(),
        Arc::new(engines.clone()),
    )
    .unwrap();
    TestHost {
        host,
        platform,
        engines,
    }
}

async fn call(host: &PlayerHost, method: &str, args: Value) -> kestrel_core::Result<Value> {
    host.handle(MethodCall::new(method, args)).await
}

async fn create(host: &PlayerHost) -> i64 {
    let created = call(host, "create", Value::Null).await.unwrap();
    created["textureId"].as_i64().unwrap()
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_returns_texture_id() {
    let t = host();
    let created = call(&t.host, "create", Value::Null).await.unwrap();
    assert_eq!(created, json!({"textureId": 1}));
    assert_eq!(create(&t.host).await, 2);
    assert_eq!(t.platform.mix_with_others(), vec![false, false]);
    assert_eq!(t.host.registry().read().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_calls_are_not_implemented() {
    let t = host();
    let id = create(&t.host).await;

    let unknown = call(&t.host, "fly", json!({"textureId": id})).await;
    assert!(matches!(unknown, Err(Error::NotImplemented(m)) if m == "fly"));

    let missing_id = call(&t.host, "play", json!({})).await;
    assert!(matches!(missing_id, Err(Error::NotImplemented(_))));

    let wrong_id = call(&t.host, "play", json!({"textureId": 99})).await;
    assert!(matches!(wrong_id, Err(Error::NotImplemented(_))));

    let no_source = call(&t.host, "setDataSource", json!({"textureId": id})).await;
    assert!(matches!(no_source, Err(Error::NotImplemented(_))));
}

#[tokio::test(start_paused = true)]
async fn test_set_data_source_routes_through_cache() {
    let t = host();
    let id = create(&t.host).await;

    call(
        &t.host,
        "setDataSource",
        json!({
            "textureId": id,
            "dataSource": {
                "key": "movie",
                "uri": "http://cdn.example.com/movie/index.m3u8",
                "headers": {"Authorization": "token"},
                "useCache": true
            }
        }),
    )
    .await
    .unwrap();

    let controller = t.engines.last().unwrap();
    let load = &controller.log().loads[0];
    assert_eq!(load.url.host_str(), Some("127.0.0.1"));
    assert_eq!(load.url.path(), "/movie/index.m3u8");
    assert!(load.headers.is_empty());
    assert_eq!(load.preferred_forward_buffer, None);
    assert_eq!(
        t.host.cache().origin_of(&load.url).unwrap().as_str(),
        "http://cdn.example.com/movie/index.m3u8"
    );

    let session = t.host.session(id).await.unwrap();
    assert_eq!(session.snapshot().await.unwrap().key.as_deref(), Some("movie"));
}

#[tokio::test(start_paused = true)]
async fn test_uncached_source_keeps_headers_and_buffer() {
    let t = host();
    let id = create(&t.host).await;
    call(
        &t.host,
        "setDataSource",
        json!({
            "textureId": id,
            "dataSource": {
                "uri": "file:///tmp/movie.mp4",
                "headers": {"Authorization": "token"},
                "overriddenDuration": 5000
            }
        }),
    )
    .await
    .unwrap();

    let load = t.engines.last().unwrap().log().loads[0].clone();
    assert_eq!(load.url.as_str(), "file:///tmp/movie.mp4");
    assert_eq!(load.headers.get("Authorization").map(String::as_str), Some("token"));
    assert_eq!(load.preferred_forward_buffer, Some(Duration::from_secs(3)));
    assert_eq!(load.forward_playback_end, Some(MediaTime::from_millis(5_000)));

    let session = t.host.session(id).await.unwrap();
    assert_eq!(session.snapshot().await.unwrap().key.as_deref(), Some(""));
}

#[tokio::test(start_paused = true)]
async fn test_missing_asset_leaves_session_cleared() {
    let t = host();
    let id = create(&t.host).await;
    let result = call(
        &t.host,
        "setDataSource",
        json!({"textureId": id, "dataSource": {"asset": "intro.mp4"}}),
    )
    .await;
    assert!(matches!(result, Err(Error::AssetNotFound(a)) if a == "intro.mp4"));
    assert!(t.engines.last().unwrap().log().loads.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bundled_asset_resolves_through_platform() {
    let t = host();
    t.platform
        .add_asset("packages/ui/intro.mp4", "/bundle/intro.mp4");
    let id = create(&t.host).await;
    call(
        &t.host,
        "setDataSource",
        json!({"textureId": id, "dataSource": {"asset": "intro.mp4", "package": "ui"}}),
    )
    .await
    .unwrap();

    let load = t.engines.last().unwrap().log().loads[0].clone();
    assert_eq!(load.url.as_str(), "file:///bundle/intro.mp4");
}

#[tokio::test(start_paused = true)]
async fn test_queries_and_speed_errors() {
    let t = host();
    let id = create(&t.host).await;
    call(
        &t.host,
        "setDataSource",
        json!({"textureId": id, "dataSource": {"uri": "http://x/a.m3u8", "key": "q"}}),
    )
    .await
    .unwrap();

    let controller = t.engines.last().unwrap();
    controller.set_current_time(MediaTime::from_millis(1_500));
    assert_eq!(
        call(&t.host, "position", json!({"textureId": id})).await.unwrap(),
        json!(1_500)
    );
    assert_eq!(
        call(&t.host, "absolutePosition", json!({"textureId": id}))
            .await
            .unwrap(),
        json!(0)
    );
    assert_eq!(
        call(&t.host, "getIsPlaying", json!({"textureId": id}))
            .await
            .unwrap(),
        json!(false)
    );

    let err = call(&t.host, "setSpeed", json!({"textureId": id, "speed": 3.0}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unsupported_speed");
    assert!(err.is_validation());

    call(&t.host, "seekTo", json!({"textureId": id, "location": 4_000}))
        .await
        .unwrap();
    assert_eq!(controller.log().seeks, vec![4_000]);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_dispose_releases_everything() {
    let t = host();
    let id = create(&t.host).await;
    let handle = t.host.session(id).await.unwrap();

    call(&t.host, "dispose", json!({"textureId": id})).await.unwrap();

    assert_eq!(t.platform.unregistered(), vec![id]);
    assert_eq!(t.platform.audio_session_active(), Some(false));
    assert_eq!(t.platform.remote_control_active(), Some(false));
    assert_eq!(t.platform.now_playing().last(), Some(&None));
    assert!(t.host.session(id).await.is_none());
    assert!(handle.snapshot().await.unwrap().is_disposed);

    let again = call(&t.host, "dispose", json!({"textureId": id})).await;
    assert_eq!(again.unwrap(), Value::Null);
    assert_eq!(t.platform.unregistered(), vec![id]);

    let never_created = call(&t.host, "dispose", json!({"textureId": 42})).await;
    assert!(matches!(never_created, Err(Error::NotImplemented(_))));
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_texture_releases_like_dispose() {
    let t = host();
    let id = playing_with_notification(&t, "Gone").await;
    let handle = t.host.session(id).await.unwrap();

    t.host.on_texture_unregistered(id).await;

    assert!(handle.snapshot().await.unwrap().is_disposed);
    assert_eq!(t.platform.now_playing().last(), Some(&None));
    assert_eq!(t.platform.remote_control_active(), Some(false));
    assert_eq!(t.platform.audio_session_active(), Some(false));
    assert_eq!(t.host.registry().read().await.active_notifier(), None);
    // The host already dropped the texture
    assert!(t.platform.unregistered().is_empty());

    let disposed = call(&t.host, "dispose", json!({"textureId": id})).await;
    assert_eq!(disposed.unwrap(), Value::Null);
    assert!(t.platform.unregistered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unregister_after_dispose_is_noop() {
    let t = host();
    let id = playing_with_notification(&t, "Twice").await;

    call(&t.host, "dispose", json!({"textureId": id})).await.unwrap();
    let published = t.platform.now_playing().len();

    t.host.on_texture_unregistered(id).await;

    assert_eq!(t.platform.now_playing().len(), published);
    assert_eq!(t.platform.unregistered(), vec![id]);
    assert!(t.host.registry().read().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_audio_session_stays_active_while_sessions_remain() {
    let t = host();
    let first = create(&t.host).await;
    let _second = create(&t.host).await;

    call(&t.host, "dispose", json!({"textureId": first}))
        .await
        .unwrap();
    assert_eq!(t.platform.audio_session_active(), None);
}

#[tokio::test(start_paused = true)]
async fn test_init_disposes_all_sessions() {
    let t = host();
    let first = create(&t.host).await;
    let second = create(&t.host).await;
    let handle = t.host.session(first).await.unwrap();

    call(&t.host, "init", Value::Null).await.unwrap();

    assert!(t.host.registry().read().await.is_empty());
    assert_eq!(t.platform.unregistered(), vec![first, second]);
    assert!(handle.snapshot().await.unwrap().is_disposed);
}

#[tokio::test(start_paused = true)]
async fn test_detach_keeps_event_streams_open() {
    let t = host();
    let id = create(&t.host).await;
    let handle = t.host.session(id).await.unwrap();
    let mut events = t.host.listen(id).await.unwrap();

    t.host.detach().await;

    assert!(handle.snapshot().await.unwrap().is_disposed);
    handle.emit(PlayerEvent::Pause).await.unwrap();
    assert_eq!(drain(&mut events), vec![SessionEvent::Event(PlayerEvent::Pause)]);
}

// =============================================================================
// Cache commands
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cache_commands_need_no_texture() {
    let t = host();
    call(&t.host, "clearCache", Value::Null).await.unwrap();

    let bad = call(&t.host, "preCache", json!({})).await;
    assert!(matches!(bad, Err(Error::InvalidArgument { .. })));
}

// =============================================================================
// Now playing
// =============================================================================

async fn playing_with_notification(t: &TestHost, title: &str) -> i64 {
    let id = create(&t.host).await;
    call(
        &t.host,
        "setDataSource",
        json!({
            "textureId": id,
            "dataSource": {
                "uri": "http://x/a.m3u8",
                "key": title,
                "showNotification": true,
                "title": title,
                "author": "Kestrel"
            }
        }),
    )
    .await
    .unwrap();
    call(&t.host, "play", json!({"textureId": id})).await.unwrap();
    settle().await;
    id
}

#[tokio::test(start_paused = true)]
async fn test_play_publishes_now_playing() {
    let t = host();
    let id = playing_with_notification(&t, "First").await;

    assert_eq!(t.platform.remote_control_active(), Some(true));
    assert_eq!(t.platform.audio_session_active(), Some(true));
    let info = t.platform.last_now_playing().unwrap();
    assert_eq!(info.title, "First");
    assert_eq!(info.author, "Kestrel");
    assert_eq!(info.playback_rate, 1.0);
    assert_eq!(t.host.registry().read().await.active_notifier(), Some(id));

    let published = t.platform.now_playing().len();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(t.platform.now_playing().len() >= published + 2);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_notifier_is_active() {
    let t = host();
    let first = playing_with_notification(&t, "First").await;
    let second = playing_with_notification(&t, "Second").await;
    assert_ne!(first, second);

    assert_eq!(t.host.registry().read().await.active_notifier(), Some(second));
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let titles: Vec<String> = t
        .platform
        .now_playing()
        .into_iter()
        .rev()
        .take(3)
        .flatten()
        .map(|info| info.title)
        .collect();
    assert_eq!(titles, vec!["Second", "Second", "Second"]);
}

#[tokio::test(start_paused = true)]
async fn test_remote_commands_reach_active_session() {
    let t = host();
    assert!(!t
        .host
        .handle_remote_command(RemoteCommand::Play)
        .await
        .unwrap());

    let id = playing_with_notification(&t, "Remote").await;
    let mut events = t.host.listen(id).await.unwrap();

    t.host
        .handle_remote_command(RemoteCommand::TogglePlayPause)
        .await
        .unwrap();
    t.host
        .handle_remote_command(RemoteCommand::ChangePlaybackPosition { position_secs: 12.7 })
        .await
        .unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::Event(PlayerEvent::Play),
            SessionEvent::Event(PlayerEvent::Seek { position: 12_000 }),
        ]
    );
    assert_eq!(t.engines.last().unwrap().log().seeks, vec![12_000]);
}

#[tokio::test(start_paused = true)]
async fn test_full_flow_through_router() {
    let t = host();
    let id = create(&t.host).await;
    let mut events = t.host.listen(id).await.unwrap();
    call(
        &t.host,
        "setDataSource",
        json!({"textureId": id, "dataSource": {"uri": "http://x/a.m3u8", "key": "flow"}}),
    )
    .await
    .unwrap();

    let controller = t.engines.last().unwrap();
    controller.resolve_video_tracks(landscape(), MediaTime::from_millis(8_000));
    controller.set_ready(MediaTime::from_millis(8_000), Size::new(1920.0, 1080.0));
    settle().await;
    call(&t.host, "play", json!({"textureId": id})).await.unwrap();
    call(&t.host, "setVolume", json!({"textureId": id, "volume": 0.25}))
        .await
        .unwrap();

    assert!(matches!(
        drain(&mut events).as_slice(),
        [SessionEvent::Event(PlayerEvent::Initialized { duration: 8_000, .. })]
    ));
    assert_eq!(
        call(&t.host, "getIsPlaying", json!({"textureId": id}))
            .await
            .unwrap(),
        json!(true)
    );
    assert_eq!(controller.log().volume, Some(0.25));
}

/// Artwork loader that takes longer than any test waits before disposing
struct SlowArtwork {
    loads: AtomicUsize,
}

#[async_trait]
impl ArtworkLoader for SlowArtwork {
    async fn load(&self, _location: &str) -> kestrel_core::Result<Bytes> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Bytes::from_static(b"cover"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_dispose_during_artwork_load_publishes_nothing() {
    let platform = Arc::new(HeadlessPlatform::new());
    let loader = Arc::new(SlowArtwork {
        loads: AtomicUsize::new(0),
    });
    let host = PlayerHost::with_parts(
        HostConfig::default(),
        platform.clone(),
        Arc::new(SimFactory::new()),
        Arc::new(CacheManager::new(CacheConfig::default())),
        loader.clone(),
    );
    let id = create(&host).await;
    call(
        &host,
        "setDataSource",
        json!({
            "textureId": id,
            "dataSource": {
                "uri": "http://x/a.m3u8",
                "key": "cover",
                "showNotification": true,
                "title": "Cover",
                "imageUrl": "http://x/cover.png"
            }
        }),
    )
    .await
    .unwrap();
    call(&host, "play", json!({"textureId": id})).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    call(&host, "dispose", json!({"textureId": id})).await.unwrap();
    assert_eq!(platform.now_playing(), vec![None]);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(platform.now_playing(), vec![None]);
    assert!(platform.last_now_playing().is_none());
    assert!(host.registry().read().await.artwork().get(id).is_none());
}
