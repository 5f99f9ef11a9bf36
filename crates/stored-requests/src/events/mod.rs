//! Event subsystem pushing stored-request changes into caches.
//!
//! Producers emit update and invalidation events on a pair of channels; a
//! listener task owns the receiving ends and forwards every event to one
//! target cache. Stopping is cooperative through a dedicated signal channel:
//! closing the producer channels is not enough because one listener may be
//! subscribed to sources with independent lifetimes.

pub mod api;
pub mod postgres;

use {
    crate::{Cache, StoredData},
    std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    tokio::sync::mpsc,
};

/// Event channels handed from a producer to a listener. The channels carry
/// no buffering beyond a single slot, so a stalled listener back-pressures
/// its producers.
pub struct EventChannels {
    pub updates: mpsc::Receiver<StoredData>,
    pub invalidations: mpsc::Receiver<Vec<String>>,
}

/// Sender half used by producers.
#[derive(Clone)]
pub struct EventSender {
    updates: mpsc::Sender<StoredData>,
    invalidations: mpsc::Sender<Vec<String>>,
}

impl EventSender {
    pub async fn update(&self, data: StoredData) {
        let _ = self.updates.send(data).await;
    }

    pub async fn invalidate(&self, ids: Vec<String>) {
        let _ = self.invalidations.send(ids).await;
    }
}

pub fn channel() -> (EventSender, EventChannels) {
    let (updates_tx, updates_rx) = mpsc::channel(1);
    let (invalidations_tx, invalidations_rx) = mpsc::channel(1);
    (
        EventSender {
            updates: updates_tx,
            invalidations: invalidations_tx,
        },
        EventChannels {
            updates: updates_rx,
            invalidations: invalidations_rx,
        },
    )
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "stored_requests")]
struct Metrics {
    /// Number of update events applied to a cache.
    #[metric(labels("source"))]
    updates_applied: prometheus::IntCounterVec,

    /// Number of invalidation events applied to a cache.
    #[metric(labels("source"))]
    invalidations_applied: prometheus::IntCounterVec,
}

fn metrics() -> &'static Metrics {
    Metrics::instance(observe::metrics::get_storage_registry())
        .expect("unexpected error getting metrics instance")
}

/// Handle on a running listener task.
pub struct EventListener {
    updates_seen: Arc<AtomicU64>,
    invalidations_seen: Arc<AtomicU64>,
    stop: mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl EventListener {
    pub fn update_count(&self) -> u64 {
        self.updates_seen.load(Ordering::Relaxed)
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations_seen.load(Ordering::Relaxed)
    }

    /// Signals the listener task to drain and exit, then waits for it.
    pub async fn stop(self) {
        let _ = self.stop.send(()).await;
        let _ = self.handle.await;
    }
}

/// Spawns a task that applies events from `events` to `cache` until stopped.
/// `source` labels the listener's counters ("api", "files", "postgres").
pub fn listen(cache: Arc<dyn Cache>, mut events: EventChannels, source: &'static str) -> EventListener {
    let updates_seen = Arc::new(AtomicU64::new(0));
    let invalidations_seen = Arc::new(AtomicU64::new(0));
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

    let updates = updates_seen.clone();
    let invalidations = invalidations_seen.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(data) = events.updates.recv() => {
                    cache.update(data);
                    updates.fetch_add(1, Ordering::Relaxed);
                    metrics().updates_applied.with_label_values(&[source]).inc();
                }
                Some(ids) = events.invalidations.recv() => {
                    cache.invalidate(&ids);
                    invalidations.fetch_add(1, Ordering::Relaxed);
                    metrics().invalidations_applied.with_label_values(&[source]).inc();
                }
                _ = stop_rx.recv() => break,
                else => break,
            }
        }
    });

    EventListener {
        updates_seen,
        invalidations_seen,
        stop: stop_tx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::LruCache, bytes::Bytes, std::time::Duration};

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn events_reach_the_cache_and_counters() {
        let cache = Arc::new(LruCache::new(512 * 1024, None));
        let (sender, channels) = channel();
        let listener = listen(cache.clone(), channels, "api");

        for i in 0..3 {
            sender
                .update(StoredData::from([(format!("{i}"), Bytes::from_static(b"{}"))]))
                .await;
        }
        sender.invalidate(ids(&["1"])).await;

        wait_for(|| listener.update_count() == 3 && listener.invalidation_count() == 1).await;
        assert_eq!(cache.get(&ids(&["0", "1", "2"])).len(), 2);

        listener.stop().await;
    }

    #[tokio::test]
    async fn stop_is_cooperative() {
        let cache = Arc::new(LruCache::new(512 * 1024, None));
        let (sender, channels) = channel();
        let listener = listen(cache.clone(), channels, "api");
        listener.stop().await;

        // Events sent after stop are not applied.
        sender
            .update(StoredData::from([("x".to_string(), Bytes::from_static(b"{}"))]))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&ids(&["x"])).is_empty());
    }
}
