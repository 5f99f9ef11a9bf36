//! Global prometheus registry and the HTTP endpoint exposing it.

use {
    axum::{http::StatusCode, routing::get, Router},
    prometheus::Encoder,
    std::{collections::HashMap, net::SocketAddr, sync::Arc, sync::OnceLock},
    tokio::task::JoinHandle,
};

/// Global metrics registry used by all components.
static REGISTRY: OnceLock<prometheus_metric_storage::StorageRegistry> = OnceLock::new();

/// Configure the global metrics registry with a common prefix and labels.
///
/// Must be called at most once, before any call to [`get_registry`], ideally
/// at the very beginning of `main`.
///
/// # Panics
///
/// Panics if called twice, after a [`get_registry`] call, or with an invalid
/// configuration.
pub fn setup_registry(prefix: Option<String>, labels: Option<HashMap<String, String>>) {
    let registry = prometheus::Registry::new_custom(prefix, labels).unwrap();
    let storage_registry = prometheus_metric_storage::StorageRegistry::new(registry);
    REGISTRY.set(storage_registry).unwrap();
}

/// Like [`setup_registry`], but can be called multiple times in a row. Later
/// calls are ignored.
///
/// Useful for tests.
pub fn setup_registry_reentrant(prefix: Option<String>, labels: Option<HashMap<String, String>>) {
    let registry = prometheus::Registry::new_custom(prefix, labels).unwrap();
    let storage_registry = prometheus_metric_storage::StorageRegistry::new(registry);
    REGISTRY.set(storage_registry).ok();
}

/// Get the global instance of the metrics registry.
pub fn get_registry() -> &'static prometheus::Registry {
    get_storage_registry().registry()
}

/// Get the global instance of the metric storage registry.
///
/// Falls back to a default registry when [`setup_registry`] was never called
/// so that unit tests do not have to set one up.
pub fn get_storage_registry() -> &'static prometheus_metric_storage::StorageRegistry {
    REGISTRY.get_or_init(prometheus_metric_storage::StorageRegistry::default)
}

pub fn encode(registry: &prometheus::Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub const DEFAULT_METRICS_PORT: u16 = 9586;

/// Signals whether the process is able to serve traffic.
#[async_trait::async_trait]
pub trait LivenessChecking: Send + Sync {
    async fn is_alive(&self) -> bool;
}

/// Serves `/metrics` and `/liveness` on the given address in a background
/// task.
pub fn serve_metrics(liveness: Arc<dyn LivenessChecking>, address: SocketAddr) -> JoinHandle<()> {
    let app = handle_metrics().merge(handle_liveness(liveness));
    tracing::info!(%address, "serving metrics");
    tokio::task::spawn(async move {
        let listener = tokio::net::TcpListener::bind(address)
            .await
            .expect("metrics listener bind failed");
        axum::serve(listener, app).await.expect("metrics server died");
    })
}

// `/metrics` route exposing encoded prometheus data to the monitoring system.
pub fn handle_metrics() -> Router {
    Router::new().route("/metrics", get(|| async { encode(get_registry()) }))
}

fn handle_liveness(liveness: Arc<dyn LivenessChecking>) -> Router {
    Router::new().route(
        "/liveness",
        get(move || {
            let liveness = liveness.clone();
            async move {
                if liveness.is_alive().await {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            }
        }),
    )
}
