//! Asset resolution
//!
//! Turns a host data-source description into a [`SourceRequest`] for the
//! engine, and runs the two-stage metadata load (tracks, then the video
//! track's orientation) that feeds the orientation composition.

use crate::{
    cache::CacheManager,
    config::SessionConfig,
    engine::{MediaAsset, SourceRequest, TrackKind},
    platform::Platform,
    time::MediaTime,
    transform::{self, ResolvedTransform, TrackGeometry, VideoComposition},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};
use url::Url;

/// Data source as sent by the host with `setDataSource`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSource {
    pub key: Option<String>,
    pub uri: Option<String>,
    /// Bundled asset name, resolved through the platform
    pub asset: Option<String>,
    pub package: Option<String>,
    pub headers: HashMap<String, String>,
    pub use_cache: bool,
    /// Milliseconds; values <= 0 mean "no override"
    pub overridden_duration: Option<i64>,
    pub show_notification: bool,
    pub title: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
}

impl DataSource {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }

    /// Builds the engine request for this source.
    ///
    /// Bundled assets are never cached. `file://` URIs are used as-is;
    /// other URIs are routed through the caching proxy. Uncached sources
    /// carry the headers and a preferred forward buffer.
    #[instrument(skip_all, fields(key = %self.key()))]
    pub fn to_request(
        &self,
        platform: &dyn Platform,
        cache: &CacheManager,
        config: &SessionConfig,
    ) -> Result<SourceRequest> {
        let forward_playback_end = self
            .overridden_duration
            .filter(|ms| *ms > 0)
            .map(MediaTime::from_millis);

        if let Some(asset) = &self.asset {
            let path = platform
                .lookup_asset(asset, self.package.as_deref())
                .ok_or_else(|| Error::AssetNotFound(asset.clone()))?;
            let url = Url::from_file_path(&path)
                .map_err(|_| Error::AssetNotFound(path.display().to_string()))?;
            debug!(%url, "Resolved bundled asset");
            return Ok(SourceRequest {
                url,
                headers: HashMap::new(),
                preferred_forward_buffer: Some(config.preferred_forward_buffer()),
                forward_playback_end,
            });
        }

        let uri = self
            .uri
            .as_deref()
            .ok_or_else(|| Error::invalid_argument("dataSource", "either asset or uri is required"))?;

        let url = if uri.starts_with("file://") {
            Url::parse(uri)?
        } else {
            cache.rewrite(&Url::parse(uri)?)?
        };

        let (headers, preferred_forward_buffer) = if self.use_cache {
            (HashMap::new(), None)
        } else {
            (
                self.headers.clone(),
                Some(config.preferred_forward_buffer()),
            )
        };

        debug!(%url, use_cache = self.use_cache, "Resolved source URL");
        Ok(SourceRequest {
            url,
            headers,
            preferred_forward_buffer,
            forward_playback_end,
        })
    }
}

/// Outcome of the metadata pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssetOrientation {
    /// No video track: nothing to composite
    AudioOnly,
    Video {
        geometry: TrackGeometry,
        duration: MediaTime,
    },
}

/// Loads track metadata, then the first video track's orientation
pub async fn load_orientation(asset: &dyn MediaAsset) -> Result<AssetOrientation> {
    let tracks = asset.load_tracks().await?;
    let Some(track) = tracks.iter().find(|t| t.kind == TrackKind::Video) else {
        return Ok(AssetOrientation::AudioOnly);
    };
    let geometry = asset.load_geometry(track).await?;
    Ok(AssetOrientation::Video {
        geometry,
        duration: asset.duration(),
    })
}

/// Corrected transform and the composition built from it
pub fn orientation_composition(
    geometry: &TrackGeometry,
    duration: MediaTime,
    frame_rate: i32,
) -> (ResolvedTransform, VideoComposition) {
    let resolved = transform::resolve(geometry);
    let composition =
        transform::build_composition(&resolved, geometry.natural_size, duration, frame_rate);
    (resolved, composition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::engine::sim::SimEngine;
    use crate::engine::DecodingEngine;
    use crate::platform::HeadlessPlatform;
    use crate::transform::{AffineTransform, Rotation, Size};
    use std::time::Duration;

    fn cache() -> CacheManager {
        CacheManager::new(CacheConfig::default())
    }

    #[test]
    fn test_remote_uri_goes_through_proxy() {
        let source = DataSource {
            uri: Some("http://x/a.m3u8".into()),
            use_cache: true,
            headers: HashMap::from([("Auth".to_string(), "t".to_string())]),
            ..Default::default()
        };
        let request = source
            .to_request(&HeadlessPlatform::new(), &cache(), &SessionConfig::default())
            .unwrap();
        assert_eq!(request.url.host_str(), Some("127.0.0.1"));
        assert!(request.headers.is_empty());
        assert_eq!(request.preferred_forward_buffer, None);
        assert_eq!(source.key(), "");
    }

    #[test]
    fn test_uncached_source_keeps_headers() {
        let source = DataSource {
            uri: Some("file:///tmp/clip.mp4".into()),
            headers: HashMap::from([("Auth".to_string(), "t".to_string())]),
            overridden_duration: Some(5000),
            ..Default::default()
        };
        let request = source
            .to_request(&HeadlessPlatform::new(), &cache(), &SessionConfig::default())
            .unwrap();
        assert_eq!(request.url.as_str(), "file:///tmp/clip.mp4");
        assert_eq!(request.headers.get("Auth").map(String::as_str), Some("t"));
        assert_eq!(request.preferred_forward_buffer, Some(Duration::from_secs(3)));
        assert_eq!(request.forward_playback_end, Some(MediaTime::from_millis(5000)));
    }

    #[test]
    fn test_missing_asset() {
        let source = DataSource {
            asset: Some("missing.mp4".into()),
            ..Default::default()
        };
        let err = source
            .to_request(&HeadlessPlatform::new(), &cache(), &SessionConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::AssetNotFound(_)));
    }

    #[tokio::test]
    async fn test_audio_only_skips_geometry() {
        let (mut engine, controller) = SimEngine::new();
        let request = DataSource {
            uri: Some("file:///a.m4a".into()),
            ..Default::default()
        }
        .to_request(&HeadlessPlatform::new(), &cache(), &SessionConfig::default())
        .unwrap();
        let asset = engine.load(&request).unwrap();
        controller.resolve_audio_only(MediaTime::from_millis(1000));
        assert_eq!(
            load_orientation(asset.as_ref()).await.unwrap(),
            AssetOrientation::AudioOnly
        );
    }

    #[test]
    fn test_portrait_composition() {
        let geometry = TrackGeometry {
            natural_size: Size::new(1080.0, 1920.0),
            preferred_transform: AffineTransform::rotation(90.0),
        };
        let (resolved, composition) =
            orientation_composition(&geometry, MediaTime::from_millis(4000), 30);
        assert_eq!(resolved.rotation, Rotation::Deg90);
        assert_eq!(composition.render_size, Size::new(1920.0, 1080.0));
    }
}
