use std::{collections::BTreeMap, sync::Arc, time::Duration};

use solar_client::{
    db::{SampleStore, StoreError},
    domain::Sample,
};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::config::{RetentionConfig, WindowConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    /// Maximum number of samples held in memory.
    pub capacity: usize,
    /// How far back warm start reads from the store.
    pub warm_start_window: Duration,
    /// Maximum number of rows read at warm start.
    pub warm_start_limit: usize,
}

impl WindowSettings {
    pub fn from_config(window: &WindowConfig, retention: &RetentionConfig) -> Self {
        Self {
            capacity: window.capacity,
            warm_start_window: Duration::from_secs(retention.max_age_hours.saturating_mul(3600)),
            warm_start_limit: window.warm_start_limit,
        }
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self::from_config(&WindowConfig::default(), &RetentionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A sample with the same timestamp is already held; nothing changed.
    Duplicate,
    Accepted {
        /// Whether the write-through to the store succeeded.
        persisted: bool,
        /// Timestamp of the sample dropped to stay within capacity.
        evicted: Option<i64>,
    },
}

/// Bounded, timestamp-ordered window of the most recent samples, written
/// through to a [`SampleStore`].
///
/// Lock order is always window map, then store.
pub struct SampleWindow {
    entries: Mutex<BTreeMap<i64, Sample>>,
    capacity: usize,
    store: Arc<SampleStore>,
}

impl SampleWindow {
    /// An empty window. A capacity of zero is treated as one.
    pub fn new(store: Arc<SampleStore>, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            capacity: capacity.max(1),
            store,
        }
    }

    /// Build a window seeded from the store's most recent samples.
    pub async fn warm_start(store: Arc<SampleStore>, settings: WindowSettings) -> Result<Self, StoreError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self::warm_start_at(store, settings, now).await
    }

    pub async fn warm_start_at(
        store: Arc<SampleStore>,
        settings: WindowSettings,
        now: i64,
    ) -> Result<Self, StoreError> {
        let window_secs = i64::try_from(settings.warm_start_window.as_secs()).unwrap_or(i64::MAX);
        let since = now.saturating_sub(window_secs);
        let rows = store.query(since, settings.warm_start_limit).await?;

        let window = Self::new(store, settings.capacity);
        {
            let mut entries = window.entries.lock().await;
            // Rows arrive newest first; keep only what fits.
            for sample in rows.into_iter().take(window.capacity) {
                entries.insert(sample.timestamp, sample);
            }
            metrics::gauge!("window_samples").set(entries.len() as f64);
            tracing::info!(
                samples = entries.len(),
                since,
                capacity = window.capacity,
                "sample window warm-started"
            );
        }

        Ok(window)
    }

    /// Accept a sample unless its timestamp is already held.
    ///
    /// The sample is written through to the store first; a failed write is
    /// logged and the sample is still kept in memory. When the window grows
    /// past capacity the single oldest sample is evicted.
    pub async fn ingest(&self, sample: Sample) -> IngestOutcome {
        let mut entries = self.entries.lock().await;

        if entries.contains_key(&sample.timestamp) {
            metrics::counter!("window_samples_duplicate_total").increment(1);
            tracing::debug!(timestamp = sample.timestamp, "duplicate sample ignored");
            return IngestOutcome::Duplicate;
        }

        let persisted = match self.store.put(&sample).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("sample_store_write_errors_total").increment(1);
                tracing::error!(
                    error = %e,
                    timestamp = sample.timestamp,
                    "failed to persist sample, keeping it in memory only"
                );
                false
            }
        };

        entries.insert(sample.timestamp, sample);

        let evicted = if entries.len() > self.capacity {
            entries.pop_first().map(|(ts, _)| ts)
        } else {
            None
        };
        if let Some(ts) = evicted {
            metrics::counter!("window_samples_evicted_total").increment(1);
            tracing::debug!(timestamp = ts, "evicted oldest sample");
        }

        metrics::counter!("window_samples_ingested_total").increment(1);
        metrics::gauge!("window_samples").set(entries.len() as f64);

        IngestOutcome::Accepted { persisted, evicted }
    }

    /// Copy of the current samples, oldest first.
    pub async fn snapshot(&self) -> Vec<Sample> {
        self.entries.lock().await.values().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solar_client::domain::EnergyChannel;

    fn sample(timestamp: i64) -> Sample {
        Sample {
            timestamp,
            production: EnergyChannel::new(1_000, timestamp, 0),
            net_consumption: EnergyChannel::new(-400, 0, timestamp),
            total_consumption: EnergyChannel::new(600, timestamp, 0),
        }
    }

    async fn memory_store() -> Arc<SampleStore> {
        let store = SampleStore::open("sqlite::memory:").await.unwrap();
        store.initialize().await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn duplicate_ingest_changes_nothing() {
        let store = memory_store().await;
        let window = SampleWindow::new(store.clone(), 10);

        let first = window.ingest(sample(100)).await;
        assert_eq!(
            first,
            IngestOutcome::Accepted {
                persisted: true,
                evicted: None
            }
        );

        let second = window.ingest(sample(100)).await;
        assert_eq!(second, IngestOutcome::Duplicate);
        assert_eq!(window.len().await, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn capacity_keeps_the_newest_samples() {
        let store = memory_store().await;
        let window = SampleWindow::new(store.clone(), 5);

        // Out-of-order arrival must not matter.
        for ts in [3, 1, 7, 2, 8, 5, 4, 6] {
            window.ingest(sample(ts)).await;
        }

        let snapshot = window.snapshot().await;
        let ts: Vec<i64> = snapshot.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![4, 5, 6, 7, 8]);
        // Eviction is in-memory only; the store keeps everything.
        assert_eq!(store.count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn each_insert_over_capacity_evicts_exactly_one() {
        let window = SampleWindow::new(memory_store().await, 2);
        window.ingest(sample(10)).await;
        window.ingest(sample(20)).await;

        let outcome = window.ingest(sample(30)).await;
        assert_eq!(
            outcome,
            IngestOutcome::Accepted {
                persisted: true,
                evicted: Some(10)
            }
        );
        assert_eq!(window.len().await, 2);
    }

    #[tokio::test]
    async fn snapshot_is_a_detached_copy() {
        let window = SampleWindow::new(memory_store().await, 10);
        window.ingest(sample(1)).await;

        let mut snapshot = window.snapshot().await;
        snapshot.clear();
        snapshot.push(sample(99));

        let fresh = window.snapshot().await;
        assert_eq!(fresh, vec![sample(1)]);
    }

    #[tokio::test]
    async fn warm_start_recovers_persisted_samples() {
        let store = memory_store().await;
        let now = 1_000_000;
        {
            let window = SampleWindow::new(store.clone(), 96);
            for ts in [now - 300, now - 200, now - 100] {
                window.ingest(sample(ts)).await;
            }
        }

        let restarted = SampleWindow::warm_start_at(store, WindowSettings::default(), now)
            .await
            .unwrap();

        assert_eq!(
            restarted.snapshot().await,
            vec![sample(now - 300), sample(now - 200), sample(now - 100)]
        );
    }

    #[tokio::test]
    async fn warm_start_applies_age_limit_and_capacity() {
        let store = memory_store().await;
        let now = 1_000_000;
        let day = 24 * 3600;
        // Too old for a 72 h window.
        store.put(&sample(now - 4 * day)).await.unwrap();
        for i in 0..10 {
            store.put(&sample(now - i * 60)).await.unwrap();
        }

        let settings = WindowSettings {
            capacity: 4,
            warm_start_window: Duration::from_secs(72 * 3600),
            warm_start_limit: 96,
        };
        let window = SampleWindow::warm_start_at(store, settings, now).await.unwrap();

        let ts: Vec<i64> = window.snapshot().await.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![now - 180, now - 120, now - 60, now]);
    }

    #[tokio::test]
    async fn warm_start_from_empty_store_is_empty() {
        let window = SampleWindow::warm_start_at(memory_store().await, WindowSettings::default(), 1_000)
            .await
            .unwrap();
        assert!(window.is_empty().await);
    }

    #[tokio::test]
    async fn failed_persistence_still_updates_memory() {
        let store = memory_store().await;
        store.close().await.unwrap();
        let window = SampleWindow::new(store, 10);

        let outcome = window.ingest(sample(5)).await;

        assert_eq!(
            outcome,
            IngestOutcome::Accepted {
                persisted: false,
                evicted: None
            }
        );
        assert_eq!(window.snapshot().await, vec![sample(5)]);
    }
}
