//! Process-wide session registry
//!
//! Holds every live session keyed by texture id, together with the
//! per-session state the host layer keeps around: the last data source,
//! the now-playing notifier and the artwork cache.

use crate::{
    asset::DataSource,
    now_playing::{ArtworkCache, NowPlayingNotifier},
    session::SessionHandle,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// What a removal released, for the caller to tear down
#[derive(Debug)]
pub struct RemovedSession {
    pub handle: SessionHandle,
    pub had_notifier: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<i64, SessionHandle>,
    data_sources: HashMap<i64, DataSource>,
    notifiers: HashMap<i64, NowPlayingNotifier>,
    artwork: ArtworkCache,
    /// Texture ids whose session has been torn down
    released: HashSet<i64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: SessionHandle) {
        debug!(texture_id = handle.texture_id(), "Session registered");
        self.released.remove(&handle.texture_id());
        self.sessions.insert(handle.texture_id(), handle);
    }

    pub fn get(&self, texture_id: i64) -> Option<SessionHandle> {
        self.sessions.get(&texture_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn texture_ids(&self) -> Vec<i64> {
        self.sessions.keys().copied().collect()
    }

    /// Removes a session and everything stored for it
    pub fn remove(&mut self, texture_id: i64) -> Option<RemovedSession> {
        let handle = self.sessions.remove(&texture_id)?;
        self.data_sources.remove(&texture_id);
        self.artwork.remove(texture_id);
        let had_notifier = self.remove_notifier(texture_id);
        self.released.insert(texture_id);
        debug!(texture_id, "Session unregistered");
        Some(RemovedSession {
            handle,
            had_notifier,
        })
    }

    /// Removes every session, in texture id order
    pub fn drain(&mut self) -> Vec<RemovedSession> {
        self.texture_ids()
            .into_iter()
            .filter_map(|texture_id| self.remove(texture_id))
            .collect()
    }

    /// True when `texture_id` had a session that has since been removed
    pub fn was_released(&self, texture_id: i64) -> bool {
        self.released.contains(&texture_id)
    }

    pub fn set_data_source(&mut self, texture_id: i64, source: DataSource) {
        self.data_sources.insert(texture_id, source);
    }

    pub fn data_source(&self, texture_id: i64) -> Option<&DataSource> {
        self.data_sources.get(&texture_id)
    }

    /// Installs `notifier`, first removing every other session's notifier
    pub fn install_notifier(&mut self, notifier: NowPlayingNotifier) {
        for (texture_id, previous) in self.notifiers.drain() {
            debug!(texture_id, "Stopping previous now-playing notifier");
            previous.cancel();
        }
        self.notifiers.insert(notifier.texture_id(), notifier);
    }

    /// Stops every notifier except the one owned by `texture_id`
    pub fn stop_other_notifiers(&mut self, texture_id: i64) {
        self.notifiers.retain(|id, notifier| {
            if *id == texture_id {
                return true;
            }
            notifier.cancel();
            false
        });
    }

    pub fn remove_notifier(&mut self, texture_id: i64) -> bool {
        match self.notifiers.remove(&texture_id) {
            Some(notifier) => {
                notifier.cancel();
                true
            }
            None => false,
        }
    }

    /// Texture id of the session whose notifier is running
    pub fn active_notifier(&self) -> Option<i64> {
        self.notifiers
            .values()
            .find(|notifier| notifier.is_active())
            .map(NowPlayingNotifier::texture_id)
    }

    pub fn artwork(&self) -> &ArtworkCache {
        &self.artwork
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::engine::sim::SimEngine;
    use crate::platform::HeadlessPlatform;
    use std::sync::Arc;

    fn session(texture_id: i64) -> SessionHandle {
        let (engine, _controller) = SimEngine::new();
        SessionHandle::spawn(
            texture_id,
            SessionConfig::default(),
            Box::new(engine),
            Arc::new(HeadlessPlatform::new()),
        )
    }

    #[tokio::test]
    async fn test_remove_drops_per_session_state() {
        let mut registry = SessionRegistry::new();
        registry.insert(session(3));
        registry.set_data_source(
            3,
            DataSource {
                uri: Some("http://x/a.m3u8".into()),
                ..DataSource::default()
            },
        );

        let removed = registry.remove(3).unwrap();
        assert_eq!(removed.handle.texture_id(), 3);
        assert!(!removed.had_notifier);
        assert!(registry.data_source(3).is_none());
        assert!(registry.remove(3).is_none());
        assert!(registry.was_released(3));
        assert!(!registry.was_released(4));

        registry.insert(session(3));
        assert!(!registry.was_released(3));
    }

    #[tokio::test]
    async fn test_drain_in_texture_order() {
        let mut registry = SessionRegistry::new();
        for texture_id in [5, 1, 3] {
            registry.insert(session(texture_id));
        }
        let order: Vec<i64> = registry
            .drain()
            .into_iter()
            .map(|removed| removed.handle.texture_id())
            .collect();
        assert_eq!(order, vec![1, 3, 5]);
        assert!(registry.is_empty());
    }
}
