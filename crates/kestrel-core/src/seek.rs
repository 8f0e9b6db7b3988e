//! Seek coordination
//!
//! A seek keeps `is_seeking` raised from the request until a settle delay
//! after the engine reports completion. Every request bumps an epoch so
//! that the settle of an older seek cannot end a newer one.

use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SeekCoordinator {
    seeking: bool,
    epoch: u64,
    settle: Option<JoinHandle<()>>,
}

impl SeekCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    /// Starts a seek and returns its epoch
    pub fn begin(&mut self, position_ms: i64) -> u64 {
        self.seeking = true;
        self.epoch += 1;
        debug!(position_ms, epoch = self.epoch, "Seek started");
        self.epoch
    }

    /// True if `epoch` is the latest seek
    pub fn is_current(&self, epoch: u64) -> bool {
        self.seeking && self.epoch == epoch
    }

    /// Stores the settle delay task of the current seek
    pub fn schedule_settle(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.settle.replace(task) {
            previous.abort();
        }
    }

    /// Ends the seek if `epoch` is still current
    pub fn settle(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) {
            debug!(epoch, current = self.epoch, "Ignoring settle of superseded seek");
            return false;
        }
        self.seeking = false;
        self.settle = None;
        true
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.settle.take() {
            task.abort();
        }
        self.seeking = false;
    }
}

impl Drop for SeekCoordinator {
    fn drop(&mut self) {
        self.cancel();
    }
}
