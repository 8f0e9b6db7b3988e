//! Frame-delivery clock
//!
//! Repeating tick that signals "frame available" to the host for one
//! texture while running. Starts paused.

use crate::platform::Platform;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

pub struct FrameClock {
    paused: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    interval: Duration,
}

impl FrameClock {
    /// Spawns the tick task on the current runtime
    pub fn start(texture_id: i64, interval: Duration, platform: Arc<dyn Platform>) -> Self {
        let (paused, mut paused_rx) = watch::channel(true);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                if paused_rx.wait_for(|paused| !*paused).await.is_err() {
                    break;
                }
                ticker.tick().await;
                if *paused_rx.borrow() {
                    continue;
                }
                trace!(texture_id, "Frame available");
                platform.frame_available(texture_id);
            }
        });

        Self {
            paused,
            task: Some(task),
            interval,
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.send_if_modified(|current| {
            let changed = *current != paused;
            *current = paused;
            changed
        });
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops the clock for good
    pub fn invalidate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.set_paused(true);
    }
}

impl Drop for FrameClock {
    fn drop(&mut self) {
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HeadlessPlatform;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_only_while_running() {
        let platform = Arc::new(HeadlessPlatform::new());
        let mut clock = FrameClock::start(7, Duration::from_millis(10), platform.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(platform.frame_count(7), 0);

        clock.set_paused(false);
        tokio::time::sleep(Duration::from_millis(55)).await;
        let running = platform.frame_count(7);
        assert!(running >= 5, "got {running} ticks");

        clock.set_paused(true);
        tokio::time::sleep(Duration::from_millis(15)).await;
        let paused_at = platform.frame_count(7);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(platform.frame_count(7), paused_at);

        clock.invalidate();
        clock.set_paused(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(platform.frame_count(7), paused_at);
        assert!(!clock.is_running());
    }
}
