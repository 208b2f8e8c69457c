//! Cache-refresh and downstream-sync collaborators.

use crate::error::StoreError;
use crate::traits::{CacheRefresher, SyncEvent, SyncNotifier};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Signals that go nowhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSignals;

#[async_trait]
impl CacheRefresher for NoopSignals {
    async fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl SyncNotifier for NoopSignals {
    async fn notify(&self, _event: SyncEvent) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Entry in a [`RecordingSignals`] log.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Refresh,
    Sync(SyncEvent),
}

/// Records refreshes and notifications in the order they were issued.
#[derive(Debug, Default)]
pub struct RecordingSignals {
    log: Mutex<Vec<Signal>>,
    refresh_failure: Mutex<Option<String>>,
}

impl RecordingSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later refresh fail with `message` after being logged.
    pub fn fail_refresh(&self, message: impl Into<String>) {
        *self.refresh_failure.lock() = Some(message.into());
    }

    pub fn log(&self) -> Vec<Signal> {
        self.log.lock().clone()
    }

    pub fn refresh_count(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|s| matches!(s, Signal::Refresh))
            .count()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.log
            .lock()
            .iter()
            .filter_map(|s| match s {
                Signal::Sync(event) => Some(event.clone()),
                Signal::Refresh => None,
            })
            .collect()
    }
}

#[async_trait]
impl CacheRefresher for RecordingSignals {
    async fn refresh(&self) -> Result<(), StoreError> {
        self.log.lock().push(Signal::Refresh);
        match self.refresh_failure.lock().clone() {
            Some(message) => Err(StoreError::Unavailable(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncNotifier for RecordingSignals {
    async fn notify(&self, event: SyncEvent) -> Result<(), StoreError> {
        self.log.lock().push(Signal::Sync(event));
        Ok(())
    }
}
