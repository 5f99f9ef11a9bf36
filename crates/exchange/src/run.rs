//! Wires the service together and runs it until shutdown.

use {
    crate::{
        adapters::ortb::OrtbAdapter,
        api::{self, AppState},
        arguments::Arguments,
        bidder::{AdaptedBidder, HttpBidder},
        cache_client::{CacheClient, HttpCacheClient, NullCacheClient},
        exchange::Exchange,
        oracles::{AlwaysAllow, NoSyncs},
    },
    anyhow::{Context, Result},
    model::BidderName,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
        time::Duration,
    },
    stored_requests::{
        events::{self, EventListener},
        file_fetcher::new_file_fetcher,
        with_cache, Fetcher, LruCache,
    },
};

pub async fn run(args: Arguments) -> Result<()> {
    observe::initialize(&args.log_filter);
    observe::metrics::setup_registry(Some("exchange".to_string()), None);
    tracing::info!(?args, "running exchange");

    let bidder_names: Vec<BidderName> = args.bidders.iter().map(|(name, _)| name.clone()).collect();
    let fabric = Arc::new(
        metrics::Metrics::new(observe::metrics::get_registry(), &bidder_names)
            .context("registering the metrics fabric")?,
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("building the shared http client")?;

    let adapters: HashMap<BidderName, Arc<dyn AdaptedBidder>> = args
        .bidders
        .iter()
        .map(|(name, endpoint)| {
            let adapter = Arc::new(OrtbAdapter::new(endpoint.clone()));
            let bidder: Arc<dyn AdaptedBidder> = Arc::new(HttpBidder::new(adapter, client.clone()));
            (name.clone(), bidder)
        })
        .collect();

    let cache: Arc<dyn CacheClient> = match &args.cache_endpoint {
        Some(endpoint) => Arc::new(HttpCacheClient::new(
            client.clone(),
            endpoint.clone(),
            args.cache_expected_time,
        )),
        None => Arc::new(NullCacheClient),
    };

    let exchange = Arc::new(Exchange::new(
        adapters,
        HashMap::new(),
        fabric.clone(),
        cache,
        args.cache_expected_time,
        Arc::new(AlwaysAllow),
        args.usersync_if_ambiguous,
    ));

    // Stored requests: eager file fetcher behind the LRU, with every
    // configured event source feeding the cache through its own listener.
    let (file_fetcher, file_events) =
        new_file_fetcher(&args.stored_requests_path, args.watch_stored_requests)
            .context("loading stored requests")?;
    let lru = Arc::new(LruCache::new(args.stored_requests_cache_size, args.cache_ttl()));
    let stored_requests = with_cache(file_fetcher, lru.clone());

    let mut listeners: Vec<EventListener> = Vec::new();
    if let Some(channels) = file_events {
        listeners.push(events::listen(lru.clone(), channels, "files"));
    }
    let mut router = api::router(AppState {
        exchange,
        stored_requests: stored_requests.clone() as Arc<dyn Fetcher>,
        usersyncs: Arc::new(NoSyncs),
        metrics: fabric,
        default_timeout: args.default_auction_timeout,
        blacklisted_apps: Arc::new(args.blacklisted_apps.iter().cloned().collect::<HashSet<_>>()),
        blacklisted_accounts: Arc::new(
            args.blacklisted_accounts.iter().cloned().collect::<HashSet<_>>(),
        ),
    });
    if args.stored_requests_admin {
        let (admin_router, channels) = events::api::new_events_api();
        listeners.push(events::listen(lru.clone(), channels, "api"));
        router = router.merge(admin_router);
    }
    if let Some(database_url) = &args.stored_requests_db {
        let channels =
            events::postgres::new_postgres_events(database_url, &args.stored_requests_db_channel)
                .await
                .context("subscribing to stored request notifications")?;
        listeners.push(events::listen(lru, channels, "postgres"));
    }

    struct Alive;
    #[async_trait::async_trait]
    impl observe::metrics::LivenessChecking for Alive {
        async fn is_alive(&self) -> bool {
            true
        }
    }
    let _metrics_server = observe::metrics::serve_metrics(Arc::new(Alive), args.metrics_address);

    let listener = tokio::net::TcpListener::bind(args.bind_address)
        .await
        .with_context(|| format!("binding {}", args.bind_address))?;
    tracing::info!(address = %args.bind_address, "serving auctions");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving auctions")?;

    for listener in listeners {
        listener.stop().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for the shutdown signal");
    }
}
