//! Byte-bounded in-memory LRU cache.
//!
//! The budget is the sum of stored value sizes, not an entry count, so one
//! oversized stored request cannot silently pin hundreds of small ones out
//! of memory. Entries are kept in a slab of nodes linked into a recency
//! list; the id map points into the slab. All operations are O(1) amortized
//! under a single mutex.

use {
    crate::{Cache, StoredData},
    bytes::Bytes,
    std::{
        collections::HashMap,
        sync::Mutex,
        time::{Duration, Instant},
    },
};

pub struct LruCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
    ttl: Option<Duration>,
}

struct Inner {
    map: HashMap<String, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    bytes: usize,
}

struct Node {
    id: String,
    value: Bytes,
    stored_at: Instant,
    prev: Option<usize>,
    next: Option<usize>,
}

impl LruCache {
    /// A `max_bytes` of 0 disables the cache: every operation becomes a
    /// no-op. `ttl` of `None` disables expiration.
    pub fn new(max_bytes: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                nodes: Vec::new(),
                free: Vec::new(),
                head: None,
                tail: None,
                bytes: 0,
            }),
            max_bytes,
            ttl,
        }
    }

    fn expired(&self, node: &Node) -> bool {
        match self.ttl {
            Some(ttl) => node.stored_at.elapsed() > ttl,
            None => false,
        }
    }
}

impl Cache for LruCache {
    fn get(&self, ids: &[String]) -> StoredData {
        if self.max_bytes == 0 {
            return StoredData::new();
        }
        let mut inner = self.inner.lock().unwrap();
        let mut data = StoredData::new();
        for id in ids {
            let Some(&idx) = inner.map.get(id) else {
                continue;
            };
            let (value, expired) = {
                let node = inner.nodes[idx].as_ref().unwrap();
                (node.value.clone(), self.expired(node))
            };
            if expired {
                inner.remove(id);
                continue;
            }
            data.insert(id.clone(), value);
            inner.move_to_front(idx);
        }
        data
    }

    fn update(&self, data: StoredData) {
        if self.max_bytes == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for (id, value) in data {
            inner.upsert(id, value);
        }
        while inner.bytes > self.max_bytes {
            if !inner.evict_tail() {
                break;
            }
        }
    }

    fn invalidate(&self, ids: &[String]) {
        if self.max_bytes == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.remove(id);
        }
    }
}

impl Inner {
    fn upsert(&mut self, id: String, value: Bytes) {
        if let Some(&idx) = self.map.get(&id) {
            let node = self.nodes[idx].as_mut().unwrap();
            self.bytes = self.bytes - node.value.len() + value.len();
            node.value = value;
            node.stored_at = Instant::now();
            self.move_to_front(idx);
            return;
        }

        let node = Node {
            id: id.clone(),
            value,
            stored_at: Instant::now(),
            prev: None,
            next: None,
        };
        self.bytes += node.value.len();
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.map.insert(id, idx);
        self.attach_front(idx);
    }

    fn remove(&mut self, id: &str) {
        let Some(idx) = self.map.remove(id) else {
            return;
        };
        self.detach(idx);
        let node = self.nodes[idx].take().unwrap();
        self.bytes -= node.value.len();
        self.free.push(idx);
    }

    /// Drops the least recently used entry. Returns false when empty.
    fn evict_tail(&mut self) -> bool {
        let Some(tail) = self.tail else {
            return false;
        };
        let id = self.nodes[tail].as_ref().unwrap().id.clone();
        self.remove(&id);
        true
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn attach_front(&mut self, idx: usize) {
        let node = self.nodes[idx].as_mut().unwrap();
        node.prev = None;
        node.next = self.head;
        if let Some(old_head) = self.head {
            self.nodes[old_head].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.nodes[prev].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
        let node = self.nodes[idx].as_mut().unwrap();
        node.prev = None;
        node.next = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    fn entry(id: &str, value: &'static [u8]) -> StoredData {
        StoredData::from([(id.to_string(), Bytes::from_static(value))])
    }

    #[test]
    fn cache_miss() {
        let cache = LruCache::new(512 * 1024, None);
        assert!(cache.get(&ids(&["unknown"])).is_empty());
    }

    #[test]
    fn cache_hit() {
        let cache = LruCache::new(512 * 1024, None);
        cache.update(entry("known", b"{}"));
        let data = cache.get(&ids(&["known"]));
        assert_eq!(data.get("known"), Some(&Bytes::from_static(b"{}")));
    }

    #[test]
    fn mixed_hit_and_miss() {
        let cache = LruCache::new(512 * 1024, None);
        cache.update(entry("known", b"{}"));
        let data = cache.get(&ids(&["known", "unknown"]));
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("known"), Some(&Bytes::from_static(b"{}")));
    }

    #[test]
    fn invalidate_removes() {
        let cache = LruCache::new(512 * 1024, None);
        cache.update(entry("known", b"{}"));
        assert_eq!(cache.get(&ids(&["known"])).len(), 1);
        cache.invalidate(&ids(&["known"]));
        assert!(cache.get(&ids(&["known"])).is_empty());
    }

    #[test]
    fn byte_budget_evicts_least_recently_used() {
        // Room for two 4-byte values, not three.
        let cache = LruCache::new(8, None);
        cache.update(entry("a", b"aaaa"));
        cache.update(entry("b", b"bbbb"));
        // Touch "a" so "b" is the eviction candidate.
        assert_eq!(cache.get(&ids(&["a"])).len(), 1);
        cache.update(entry("c", b"cccc"));

        assert!(cache.get(&ids(&["b"])).is_empty());
        assert_eq!(cache.get(&ids(&["a", "c"])).len(), 2);
    }

    #[test]
    fn oversized_update_evicts_everything_else() {
        let cache = LruCache::new(8, None);
        cache.update(entry("a", b"aaaa"));
        cache.update(entry("big", b"bbbbbbbb"));
        assert!(cache.get(&ids(&["a"])).is_empty());
        assert_eq!(cache.get(&ids(&["big"])).len(), 1);
    }

    #[test]
    fn update_replaces_in_place() {
        let cache = LruCache::new(8, None);
        cache.update(entry("a", b"aaaa"));
        cache.update(entry("a", b"aa"));
        assert_eq!(cache.get(&ids(&["a"]))["a"], Bytes::from_static(b"aa"));
        // Replacement freed budget: two more 2-byte entries fit.
        cache.update(entry("b", b"bb"));
        cache.update(entry("c", b"cc"));
        assert_eq!(cache.get(&ids(&["a", "b", "c"])).len(), 3);
    }

    #[test]
    fn zero_size_disables_the_cache() {
        let cache = LruCache::new(0, None);
        cache.update(entry("a", b"aaaa"));
        assert!(cache.get(&ids(&["a"])).is_empty());
    }

    #[test]
    fn expired_entries_are_dropped_on_get() {
        let cache = LruCache::new(512, Some(Duration::from_millis(0)));
        cache.update(entry("a", b"aaaa"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&ids(&["a"])).is_empty());
    }
}
