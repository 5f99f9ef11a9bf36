//! Stored-request fetching and caching.
//!
//! A stored request is a server-side fragment of a bid request, kept as raw
//! JSON bytes and looked up by id on every auction that references one. This
//! crate provides the [`Fetcher`] and [`Cache`] contracts, the decorator
//! composition that layers caches in front of fetchers, the byte-bounded LRU
//! leaf cache, and the event subsystem that pushes updates and invalidations
//! into the composition from the outside world.

pub mod events;
pub mod file_fetcher;
pub mod lru;

pub use lru::LruCache;

use {
    bytes::Bytes,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    thiserror::Error,
};

/// Raw stored-request payloads by id.
pub type StoredData = HashMap<String, Bytes>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no stored request found for id: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Knows how to fetch stored request data by id.
///
/// Implementations must be safe for concurrent use; callers share a single
/// instance across all auctions.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the stored requests for the given ids. The returned map has
    /// an entry for every id that could be resolved and one error per id
    /// that could not.
    async fn fetch_requests(&self, ids: &[String]) -> (StoredData, Vec<FetchError>);
}

/// An intermediate layer used to build more capable fetchers by composition.
/// See [`with_cache`].
pub trait Cache: Send + Sync {
    /// Like [`Fetcher::fetch_requests`] except misses are simply absent from
    /// the result and never synthesized or reported.
    fn get(&self, ids: &[String]) -> StoredData;

    /// Idempotent upsert of the given values.
    fn update(&self, data: StoredData);

    /// Ensures the given ids are no longer returned until updated again.
    fn invalidate(&self, ids: &[String]);
}

/// A fetcher that can notify subscribed caches about changes to its
/// underlying data.
pub trait CacheableFetcher: Fetcher {
    fn subscribe(&self, cache: Arc<dyn Cache>);
}

/// Fan-out list of subscribed caches. Embed one to implement
/// [`CacheableFetcher`] and call [`Subscriptions::update`] /
/// [`Subscriptions::invalidate`] when the underlying data changes.
#[derive(Default)]
pub struct Subscriptions {
    subs: Mutex<Vec<Arc<dyn Cache>>>,
}

impl Subscriptions {
    pub fn subscribe(&self, cache: Arc<dyn Cache>) {
        self.subs.lock().unwrap().push(cache);
    }

    pub fn update(&self, data: &StoredData) {
        for cache in self.subs.lock().unwrap().iter() {
            cache.update(data.clone());
        }
    }

    pub fn invalidate(&self, ids: &[String]) {
        for cache in self.subs.lock().unwrap().iter() {
            cache.invalidate(ids);
        }
    }
}

/// Returns a fetcher which probes `cache` before delegating to `fetcher`,
/// writing fetched misses back into the cache.
///
/// The cache is subscribed to the fetcher's notifications so upstream
/// changes flow into it automatically, and the composed value is itself both
/// a [`CacheableFetcher`] and a [`Cache`] so that further layers can be
/// stacked on top.
pub fn with_cache(
    fetcher: Arc<dyn CacheableFetcher>,
    cache: Arc<dyn Cache>,
) -> Arc<FetcherWithCache> {
    let composed = Arc::new(FetcherWithCache {
        subs: Subscriptions::default(),
        cache: cache.clone(),
        fetcher: fetcher.clone(),
    });
    // Upstream changes first land in our own cache, then propagate to
    // whoever subscribes to the composed fetcher.
    composed.subscribe(cache);
    fetcher.subscribe(composed.clone());
    composed
}

pub struct FetcherWithCache {
    subs: Subscriptions,
    cache: Arc<dyn Cache>,
    fetcher: Arc<dyn CacheableFetcher>,
}

#[async_trait::async_trait]
impl Fetcher for FetcherWithCache {
    async fn fetch_requests(&self, ids: &[String]) -> (StoredData, Vec<FetchError>) {
        let mut data = self.cache.get(ids);

        let missing: Vec<String> = ids.iter().filter(|id| !data.contains_key(*id)).cloned().collect();
        if missing.is_empty() {
            return (data, Vec::new());
        }

        let (fetched, errs) = self.fetcher.fetch_requests(&missing).await;
        let newly_cached: StoredData = missing
            .iter()
            .filter_map(|id| fetched.get(id).map(|value| (id.clone(), value.clone())))
            .collect();
        if !newly_cached.is_empty() {
            self.cache.update(newly_cached.clone());
            data.extend(newly_cached);
        }
        (data, errs)
    }
}

impl CacheableFetcher for FetcherWithCache {
    fn subscribe(&self, cache: Arc<dyn Cache>) {
        self.subs.subscribe(cache);
    }
}

impl Cache for FetcherWithCache {
    fn get(&self, ids: &[String]) -> StoredData {
        self.cache.get(ids)
    }

    fn update(&self, data: StoredData) {
        self.subs.update(&data);
    }

    fn invalidate(&self, ids: &[String]) {
        self.subs.invalidate(ids);
    }
}

/// A multi-tier cache. `get` probes the layers in order and only asks the
/// next layer for ids the previous ones missed; writes broadcast to every
/// layer.
pub struct ComposedCache {
    layers: Vec<Arc<dyn Cache>>,
}

pub fn compose(layers: Vec<Arc<dyn Cache>>) -> ComposedCache {
    ComposedCache { layers }
}

impl Cache for ComposedCache {
    fn get(&self, ids: &[String]) -> StoredData {
        let mut data = StoredData::new();
        let mut missing: Vec<String> = ids.to_vec();
        for layer in &self.layers {
            if missing.is_empty() {
                break;
            }
            let found = layer.get(&missing);
            missing.retain(|id| !found.contains_key(id));
            data.extend(found);
        }
        data
    }

    fn update(&self, data: StoredData) {
        for layer in &self.layers {
            layer.update(data.clone());
        }
    }

    fn invalidate(&self, ids: &[String]) {
        for layer in &self.layers {
            layer.invalidate(ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    fn lru() -> Arc<LruCache> {
        Arc::new(LruCache::new(512 * 1024, None))
    }

    struct CountingFetcher {
        subs: Subscriptions,
        data: StoredData,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl CountingFetcher {
        fn new(data: StoredData) -> Self {
            Self {
                subs: Subscriptions::default(),
                data,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch_requests(&self, ids: &[String]) -> (StoredData, Vec<FetchError>) {
            self.calls.lock().unwrap().push(ids.to_vec());
            let mut found = StoredData::new();
            let mut errs = Vec::new();
            for id in ids {
                match self.data.get(id) {
                    Some(value) => {
                        found.insert(id.clone(), value.clone());
                    }
                    None => errs.push(FetchError::NotFound(id.clone())),
                }
            }
            (found, errs)
        }
    }

    impl CacheableFetcher for CountingFetcher {
        fn subscribe(&self, cache: Arc<dyn Cache>) {
            self.subs.subscribe(cache);
        }
    }

    #[tokio::test]
    async fn fetched_values_are_cached() {
        let fetcher = Arc::new(CountingFetcher::new(StoredData::from([(
            "42".to_string(),
            Bytes::from_static(b"{\"foo\":\"bar\"}"),
        )])));
        let cache = lru();
        let composed = with_cache(fetcher.clone(), cache.clone());

        let (data, errs) = composed.fetch_requests(&ids(&["42"])).await;
        assert_eq!(data["42"], Bytes::from_static(b"{\"foo\":\"bar\"}"));
        assert!(errs.is_empty());

        // The second fetch is served from the cache.
        let (data, errs) = composed.fetch_requests(&ids(&["42"])).await;
        assert_eq!(data["42"], Bytes::from_static(b"{\"foo\":\"bar\"}"));
        assert!(errs.is_empty());
        assert_eq!(fetcher.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn misses_are_reported_not_synthesized() {
        let fetcher = Arc::new(CountingFetcher::new(StoredData::new()));
        let composed = with_cache(fetcher, lru());
        let (data, errs) = composed.fetch_requests(&ids(&["nope"])).await;
        assert!(data.is_empty());
        assert_eq!(errs.len(), 1);
        assert!(matches!(&errs[0], FetchError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn upstream_updates_flow_into_the_cache() {
        let fetcher = Arc::new(CountingFetcher::new(StoredData::new()));
        let cache = lru();
        let composed = with_cache(fetcher.clone(), cache.clone());

        fetcher
            .subs
            .update(&StoredData::from([("7".to_string(), Bytes::from_static(b"{}"))]));
        assert_eq!(cache.get(&ids(&["7"]))["7"], Bytes::from_static(b"{}"));

        fetcher.subs.invalidate(&ids(&["7"]));
        assert!(composed.get(&ids(&["7"])).is_empty());
    }

    #[tokio::test]
    async fn invalidate_then_get_returns_empty() {
        let cache = lru();
        cache.update(StoredData::from([("1".to_string(), Bytes::from_static(b"{}"))]));
        let composed = with_cache(
            Arc::new(CountingFetcher::new(StoredData::new())),
            cache.clone(),
        );
        composed.invalidate(&ids(&["1"]));
        assert!(cache.get(&ids(&["1"])).is_empty());
    }

    #[test]
    fn composed_cache_probes_layers_in_order() {
        let front = lru();
        let back = lru();
        back.update(StoredData::from([("a".to_string(), Bytes::from_static(b"1"))]));
        front.update(StoredData::from([("b".to_string(), Bytes::from_static(b"2"))]));

        let tiers = compose(vec![front.clone(), back.clone()]);
        let data = tiers.get(&ids(&["a", "b"]));
        assert_eq!(data.len(), 2);

        tiers.update(StoredData::from([("c".to_string(), Bytes::from_static(b"3"))]));
        assert!(!front.get(&ids(&["c"])).is_empty());
        assert!(!back.get(&ids(&["c"])).is_empty());

        tiers.invalidate(&ids(&["a", "b", "c"]));
        assert!(tiers.get(&ids(&["a", "b", "c"])).is_empty());
    }
}
