//! Caching reverse-proxy collaborator
//!
//! Origin URLs are rewritten to a locally served form carrying the origin
//! in the `__hls_origin_url` query parameter. Pre-caching walks an HLS
//! playlist (first variant of a master, then the media segments) and keeps
//! the fetched bodies in a byte-bounded LRU store.

mod fetch;
mod store;

pub use fetch::{Fetch, HttpFetcher};
pub use store::CacheStore;

use crate::{config::CacheConfig, Error, Result};
use bytes::Bytes;
use m3u8_rs::Playlist;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Query parameter holding the origin URL of a proxied request
pub const ORIGIN_PARAM: &str = "__hls_origin_url";

/// Outcome of a pre-cache walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreCacheReport {
    pub playlists: usize,
    pub segments: usize,
    pub failed: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

pub struct CacheManager {
    config: CacheConfig,
    store: Mutex<CacheStore>,
    fetcher: Arc<dyn Fetch>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let fetcher = HttpFetcher::new(Duration::from_millis(config.request_timeout_ms));
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    pub fn with_fetcher(config: CacheConfig, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            store: Mutex::new(CacheStore::new(config.byte_limit)),
            config,
            fetcher,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Routes `origin` through the local proxy
    pub fn rewrite(&self, origin: &Url) -> Result<Url> {
        if self.is_proxied(origin) {
            return Ok(origin.clone());
        }
        let mut local = Url::parse(&format!("http://{}:{}", self.config.host, self.config.port))?;
        local.set_path(origin.path());
        local
            .query_pairs_mut()
            .append_pair(ORIGIN_PARAM, origin.as_str());
        Ok(local)
    }

    /// Recovers the origin URL from a rewritten one
    pub fn origin_of(&self, local: &Url) -> Result<Url> {
        let origin = local
            .query_pairs()
            .find(|(name, _)| name == ORIGIN_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| Error::NotProxied(local.to_string()))?;
        Ok(Url::parse(&origin)?)
    }

    pub fn is_proxied(&self, url: &Url) -> bool {
        url.query_pairs().any(|(name, _)| name == ORIGIN_PARAM)
    }

    /// Fetches `url` and, for playlists, the first variant and its segments.
    ///
    /// Only a failure on the top-level URL is returned; nested failures are
    /// logged and counted in the report.
    #[instrument(skip(self))]
    pub async fn pre_cache(&self, url: &Url) -> Result<PreCacheReport> {
        let origin = match self.origin_of(url) {
            Ok(origin) => origin,
            Err(_) => url.clone(),
        };
        let mut report = PreCacheReport::default();

        let body = self.fetch_and_store(&origin, &mut report).await?;
        if !is_playlist(&origin, &body) {
            report.segments += 1;
            return Ok(report);
        }

        let mut current = origin;
        let mut body = body;
        let mut depth = 0;
        loop {
            report.playlists += 1;
            let playlist = m3u8_rs::parse_playlist_res(&body).map_err(|e| Error::PlaylistParse {
                url: current.to_string(),
                reason: format!("{:?}", e),
            });
            let playlist = match playlist {
                Ok(playlist) => playlist,
                Err(err) if depth == 0 => return Err(err),
                Err(err) => {
                    warn!(error = %err, "Skipping nested playlist");
                    report.failed += 1;
                    break;
                }
            };

            match playlist {
                Playlist::MasterPlaylist(master) => {
                    let Some(variant) = master.variants.first() else {
                        debug!("Master playlist has no variants");
                        break;
                    };
                    depth += 1;
                    if depth > self.config.max_playlist_depth {
                        warn!(depth, "Playlist nesting too deep");
                        break;
                    }
                    let next = current.join(&variant.uri)?;
                    match self.fetch_and_store(&next, &mut report).await {
                        Ok(next_body) => {
                            current = next;
                            body = next_body;
                        }
                        Err(err) => {
                            warn!(variant = %next, error = %err, "Failed to fetch variant playlist");
                            report.failed += 1;
                            break;
                        }
                    }
                }
                Playlist::MediaPlaylist(media) => {
                    let limit = self.config.max_precache_segments.unwrap_or(usize::MAX);
                    for segment in media.segments.iter().take(limit) {
                        let segment_url = match current.join(&segment.uri) {
                            Ok(segment_url) => segment_url,
                            Err(err) => {
                                warn!(uri = %segment.uri, error = %err, "Invalid segment URI");
                                report.failed += 1;
                                continue;
                            }
                        };
                        match self.fetch_and_store(&segment_url, &mut report).await {
                            Ok(_) => report.segments += 1,
                            Err(err) => {
                                warn!(segment = %segment_url, error = %err, "Failed to pre-cache segment");
                                report.failed += 1;
                            }
                        }
                    }
                    break;
                }
            }
        }

        info!(
            playlists = report.playlists,
            segments = report.segments,
            failed = report.failed,
            "Pre-cache finished"
        );
        Ok(report)
    }

    async fn fetch_and_store(&self, url: &Url, report: &mut PreCacheReport) -> Result<Bytes> {
        let body = self.fetcher.get(url).await?;
        report.bytes += body.len() as u64;
        self.store.lock().insert(url.to_string(), body.clone());
        Ok(body)
    }

    /// Cached body for an origin or rewritten URL
    pub fn cached(&self, url: &Url) -> Option<Bytes> {
        let origin = self.origin_of(url).unwrap_or_else(|_| url.clone());
        self.store.lock().get(origin.as_str())
    }

    pub fn contains(&self, url: &Url) -> bool {
        let origin = self.origin_of(url).unwrap_or_else(|_| url.clone());
        self.store.lock().contains(origin.as_str())
    }

    pub fn stats(&self) -> CacheStats {
        let store = self.store.lock();
        CacheStats {
            entries: store.len(),
            bytes: store.size_bytes(),
        }
    }

    pub fn clear(&self) {
        self.store.lock().clear();
        debug!("Cache cleared");
    }
}

fn is_playlist(url: &Url, body: &[u8]) -> bool {
    url.path().ends_with(".m3u8") || body.starts_with(b"#EXTM3U")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeFetcher {
        bodies: HashMap<String, &'static str>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(bodies: &[(&str, &'static str)]) -> Arc<Self> {
            Arc::new(Self {
                bodies: bodies.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Fetch for FakeFetcher {
        async fn get(&self, url: &Url) -> Result<Bytes> {
            self.requests.lock().push(url.to_string());
            self.bodies
                .get(url.as_str())
                .map(|body| Bytes::from_static(body.as_bytes()))
                .ok_or_else(|| Error::Fetch {
                    url: url.to_string(),
                    reason: "404".into(),
                })
        }
    }

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720
hi/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=640000,RESOLUTION=640x360
lo/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:6.0,
seg0.ts
#EXTINF:6.0,
seg1.ts
#EXTINF:6.0,
seg2.ts
#EXT-X-ENDLIST
";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_rewrite_and_origin_round_trip() {
        let cache = CacheManager::new(CacheConfig::default());
        let origin = url("https://cdn.example.com/vod/a.m3u8?token=abc");
        let local = cache.rewrite(&origin).unwrap();

        assert_eq!(local.host_str(), Some("127.0.0.1"));
        assert_eq!(local.port(), Some(8080));
        assert_eq!(local.path(), "/vod/a.m3u8");
        assert_eq!(cache.origin_of(&local).unwrap(), origin);
        assert_eq!(cache.rewrite(&local).unwrap(), local);
    }

    #[test]
    fn test_origin_of_plain_url() {
        let cache = CacheManager::new(CacheConfig::default());
        let result = cache.origin_of(&url("http://x/a.m3u8"));
        assert!(matches!(result, Err(Error::NotProxied(_))));
    }

    #[tokio::test]
    async fn test_pre_cache_follows_first_variant() {
        let fetcher = FakeFetcher::new(&[
            ("http://x/master.m3u8", MASTER),
            ("http://x/hi/index.m3u8", MEDIA),
            ("http://x/hi/seg0.ts", "s0"),
            ("http://x/hi/seg1.ts", "s1"),
            ("http://x/hi/seg2.ts", "s2"),
        ]);
        let cache = CacheManager::with_fetcher(CacheConfig::default(), fetcher.clone());

        let report = cache.pre_cache(&url("http://x/master.m3u8")).await.unwrap();
        assert_eq!(report.playlists, 2);
        assert_eq!(report.segments, 3);
        assert_eq!(report.failed, 0);
        assert!(cache.contains(&url("http://x/hi/seg2.ts")));
        assert!(!fetcher
            .requests
            .lock()
            .iter()
            .any(|request| request.contains("lo/")));
        assert_eq!(cache.stats().entries, 5);

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_pre_cache_counts_segment_failures() {
        let fetcher = FakeFetcher::new(&[
            ("http://x/index.m3u8", MEDIA),
            ("http://x/seg0.ts", "s0"),
        ]);
        let config = CacheConfig {
            max_precache_segments: Some(2),
            ..CacheConfig::default()
        };
        let cache = CacheManager::with_fetcher(config, fetcher);

        let report = cache.pre_cache(&url("http://x/index.m3u8")).await.unwrap();
        assert_eq!(report.playlists, 1);
        assert_eq!(report.segments, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_pre_cache_plain_resource_through_proxy_url() {
        let fetcher = FakeFetcher::new(&[("http://x/clip.mp4", "mp4")]);
        let cache = CacheManager::with_fetcher(CacheConfig::default(), fetcher);
        let local = cache.rewrite(&url("http://x/clip.mp4")).unwrap();

        let report = cache.pre_cache(&local).await.unwrap();
        assert_eq!(report.playlists, 0);
        assert_eq!(report.segments, 1);
        assert_eq!(cache.cached(&local), Some(Bytes::from_static(b"mp4")));
    }

    #[tokio::test]
    async fn test_pre_cache_top_level_failure() {
        let cache = CacheManager::with_fetcher(CacheConfig::default(), FakeFetcher::new(&[]));
        let result = cache.pre_cache(&url("http://x/missing.m3u8")).await;
        assert!(matches!(result, Err(Error::Fetch { .. })));
    }
}
