// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Auto-flush
//!
//! Background task that periodically flushes the storage manager so access
//! statistics and provider buffers reach disk without an explicit call.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. On cancellation the task runs
//! one last flush before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PersistentStorageManager;

/// Periodic flusher for a [`PersistentStorageManager`].
pub struct AutoFlusher {
    storage: Arc<PersistentStorageManager>,
    interval: Duration,
}

impl AutoFlusher {
    /// Flusher using the manager's configured interval.
    pub fn new(storage: Arc<PersistentStorageManager>) -> Self {
        let interval = Duration::from_millis(storage.config().auto_flush_interval_ms.max(1));
        Self { storage, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(AutoFlusher::new(storage).run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Storage auto-flush starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.flush_step().await;
                },
                _ = shutdown.cancelled() => {
                    self.flush_step().await;
                    info!("Storage auto-flush shutting down");
                    return;
                }
            }
        }
    }

    async fn flush_step(&self) {
        let storage = Arc::clone(&self.storage);
        match tokio::task::spawn_blocking(move || storage.flush()).await {
            Ok(Ok(())) => debug!("Storage auto-flush completed"),
            Ok(Err(e)) => warn!(error = %e, "Storage auto-flush failed"),
            Err(e) => warn!(error = %e, "Storage auto-flush task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::ProviderKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn flushes_access_statistics_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(PersistentStorageManager::new(StorageConfig::at(
            dir.path(),
            ProviderKind::Redb,
        )));
        storage.initialize().unwrap();
        storage.write("k", b"v").unwrap();
        storage.read("k").unwrap();

        let shutdown = CancellationToken::new();
        let flusher = AutoFlusher::new(Arc::clone(&storage)).with_interval(Duration::from_secs(3600));
        let handle = tokio::spawn(flusher.run(shutdown.clone()));
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(storage.get_metadata("k").unwrap().unwrap().access_count, 1);
    }

    #[test]
    fn interval_comes_from_config() {
        let mut config = StorageConfig::in_memory();
        config.auto_flush_interval_ms = 250;
        let flusher = AutoFlusher::new(Arc::new(PersistentStorageManager::new(config)));
        assert_eq!(flusher.interval(), Duration::from_millis(250));
    }
}
