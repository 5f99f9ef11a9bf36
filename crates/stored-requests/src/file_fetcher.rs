//! Filesystem-backed stored requests.
//!
//! Loads `<dir>/<id>.json` eagerly at startup and serves lookups from
//! memory. With watching enabled, write events reload the touched file,
//! refresh the in-memory copy, notify subscribed caches and emit an update
//! event for an attached listener.

use {
    crate::{
        events::{channel, EventChannels, EventSender},
        Cache, CacheableFetcher, FetchError, Fetcher, StoredData, Subscriptions,
    },
    anyhow::Context,
    bytes::Bytes,
    notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    std::{
        path::Path,
        sync::{Arc, RwLock},
    },
    tokio::sync::mpsc,
};

pub struct FileFetcher {
    subs: Subscriptions,
    stored: RwLock<StoredData>,
    // Dropping the watcher stops the notification stream.
    _watcher: Option<RecommendedWatcher>,
}

/// Loads every `*.json` file under `directory`. With `watch` enabled, the
/// returned channels deliver an update per modified file; wire them to a
/// listener with [`crate::events::listen`].
pub fn new_file_fetcher(
    directory: &Path,
    watch: bool,
) -> anyhow::Result<(Arc<FileFetcher>, Option<EventChannels>)> {
    let mut stored = StoredData::new();
    for entry in std::fs::read_dir(directory)
        .with_context(|| format!("reading stored request directory {directory:?}"))?
    {
        let path = entry?.path();
        if let Some(id) = stored_request_id(&path) {
            let data = std::fs::read(&path).with_context(|| format!("reading {path:?}"))?;
            stored.insert(id, Bytes::from(data));
        }
    }

    if !watch {
        let fetcher = Arc::new(FileFetcher {
            subs: Subscriptions::default(),
            stored: RwLock::new(stored),
            _watcher: None,
        });
        return Ok((fetcher, None));
    }

    // notify delivers events on its own thread; bridge them into the async
    // world through an unbounded channel so the callback never blocks.
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        let _ = raw_tx.send(event);
    })?;
    watcher.watch(directory, RecursiveMode::NonRecursive)?;

    let fetcher = Arc::new(FileFetcher {
        subs: Subscriptions::default(),
        stored: RwLock::new(stored),
        _watcher: Some(watcher),
    });
    let (sender, channels) = channel();
    tokio::spawn(handle_file_events(fetcher.clone(), raw_rx, sender));
    Ok((fetcher, Some(channels)))
}

fn stored_request_id(path: &Path) -> Option<String> {
    if path.extension()? != "json" {
        return None;
    }
    Some(path.file_stem()?.to_string_lossy().into_owned())
}

async fn handle_file_events(
    fetcher: Arc<FileFetcher>,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    sender: EventSender,
) {
    while let Some(event) = raw_rx.recv().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(?err, "error watching stored request files");
                continue;
            }
        };
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            continue;
        }
        for path in event.paths {
            let Some(id) = stored_request_id(&path) else {
                continue;
            };
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    tracing::info!(?path, "reloading stored request file");
                    let value = Bytes::from(data);
                    let update = StoredData::from([(id, value)]);
                    fetcher.apply(&update);
                    sender.update(update).await;
                }
                Err(err) => tracing::error!(?err, ?path, "error reloading stored request file"),
            }
        }
    }
}

impl FileFetcher {
    fn apply(&self, update: &StoredData) {
        {
            let mut stored = self.stored.write().unwrap();
            for (id, value) in update {
                stored.insert(id.clone(), value.clone());
            }
        }
        // Caches composed on top see the change without refetching.
        self.subs.update(update);
    }
}

#[async_trait::async_trait]
impl Fetcher for FileFetcher {
    async fn fetch_requests(&self, ids: &[String]) -> (StoredData, Vec<FetchError>) {
        let stored = self.stored.read().unwrap();
        let mut data = StoredData::new();
        let mut errs = Vec::new();
        for id in ids {
            match stored.get(id) {
                Some(value) => {
                    data.insert(id.clone(), value.clone());
                }
                None => errs.push(FetchError::NotFound(id.clone())),
            }
        }
        (data, errs)
    }
}

impl CacheableFetcher for FileFetcher {
    fn subscribe(&self, cache: Arc<dyn Cache>) {
        self.subs.subscribe(cache);
    }
}
