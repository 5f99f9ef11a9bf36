//! Inbound auction endpoint.
//!
//! Thin layer over [`crate::Exchange`]: resolves stored-request references,
//! rejects obviously unusable or blacklisted requests before the auction
//! runs, derives the metric labels and records the request-scoped metrics.

use {
    crate::{exchange::Exchange, oracles::IdFetcher},
    axum::{extract::State, http::StatusCode, routing::post, Json, Router},
    metrics::{Browser, CookieFlag, DemandSource, Labels, MetricsEngine, RequestStatus, RequestType},
    model::{ext::ExtRequest, BidRequest, BidResponse},
    serde_json::Value,
    std::{collections::HashSet, sync::Arc, time::Duration},
    stored_requests::Fetcher,
    tokio::time::Instant,
};

#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<Exchange>,
    pub stored_requests: Arc<dyn Fetcher>,
    pub usersyncs: Arc<dyn IdFetcher>,
    pub metrics: Arc<dyn MetricsEngine>,
    /// Auction budget applied when the request does not carry `tmax`.
    pub default_timeout: Duration,
    pub blacklisted_apps: Arc<HashSet<String>>,
    pub blacklisted_accounts: Arc<HashSet<String>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/openrtb2/auction", post(handle_auction))
        .with_state(state)
}

async fn handle_auction(
    State(state): State<AppState>,
    Json(request): Json<BidRequest>,
) -> (StatusCode, Json<BidResponse>) {
    let start = Instant::now();
    let mut labels = derive_labels(&request);

    let (status, response) = run_auction(&state, request, &mut labels).await;
    state.metrics.record_request(&labels);
    state.metrics.record_request_time(&labels, start.elapsed());
    (status, Json(response))
}

async fn run_auction(
    state: &AppState,
    request: BidRequest,
    labels: &mut Labels,
) -> (StatusCode, BidResponse) {
    let request = match resolve_stored_request(state, request).await {
        Ok(request) => request,
        Err(message) => {
            labels.request_status = RequestStatus::BadInput;
            tracing::debug!(%message, "rejected auction request");
            return (StatusCode::BAD_REQUEST, BidResponse::default());
        }
    };

    if let Some(app) = &request.app {
        if app.id.as_ref().is_some_and(|id| state.blacklisted_apps.contains(id)) {
            labels.request_status = RequestStatus::BadInput;
            tracing::debug!(request = %request.id, "{}", crate::ExchangeError::BlacklistedApp);
            return (StatusCode::FORBIDDEN, BidResponse::default());
        }
    }
    if publisher_id(&request).is_some_and(|id| state.blacklisted_accounts.contains(id)) {
        labels.request_status = RequestStatus::BadInput;
        tracing::debug!(request = %request.id, "{}", crate::ExchangeError::BlacklistedAcct);
        return (StatusCode::FORBIDDEN, BidResponse::default());
    }
    if request.id.is_empty() || !has_usable_imp(&request) {
        labels.request_status = RequestStatus::BadInput;
        return (StatusCode::BAD_REQUEST, BidResponse::default());
    }

    state.metrics.record_imps(labels, request.imp.len());

    let timeout = request.tmax.map(Duration::from_millis).unwrap_or(state.default_timeout);
    let deadline = Instant::now() + timeout;
    match state
        .exchange
        .hold_auction(&request, &*state.usersyncs, labels, Some(deadline))
        .await
    {
        Ok(response) => (StatusCode::OK, response),
        Err(err) => {
            labels.request_status = RequestStatus::Err;
            tracing::error!(?err, request = %request.id, "auction failed");
            (StatusCode::INTERNAL_SERVER_ERROR, BidResponse::default())
        }
    }
}

/// The account a request bids on behalf of, for pre-auction blacklisting.
fn publisher_id(request: &BidRequest) -> Option<&String> {
    let publisher = match (&request.app, &request.site) {
        (Some(app), _) => app.publisher.as_ref(),
        (None, Some(site)) => site.publisher.as_ref(),
        (None, None) => None,
    };
    publisher.and_then(|publisher| publisher.id.as_ref())
}

/// At least one impression must carry a recognizable media type.
fn has_usable_imp(request: &BidRequest) -> bool {
    request.imp.iter().any(|imp| {
        imp.banner.is_some() || imp.video.is_some() || imp.audio.is_some() || imp.native.is_some()
    })
}

fn derive_labels(request: &BidRequest) -> Labels {
    let (source, rtype) = if request.app.is_some() {
        (DemandSource::App, RequestType::Openrtb2App)
    } else {
        (DemandSource::Web, RequestType::Openrtb2Web)
    };
    let browser = match request.device.as_ref().and_then(|device| device.ua.as_deref()) {
        Some(ua) if ua.contains("Safari") && !ua.contains("Chrome") => Browser::Safari,
        _ => Browser::Other,
    };
    let cookie_flag = match &request.user {
        Some(user) if user.buyeruid.is_some() || user.id.is_some() => CookieFlag::Exists,
        Some(_) => CookieFlag::No,
        None => CookieFlag::Unknown,
    };
    Labels {
        source,
        rtype,
        browser,
        cookie_flag,
        request_status: RequestStatus::Ok,
    }
}

/// Overlays the request onto its stored base when
/// `ext.prebid.storedrequest.id` is present. The client's fields win;
/// `null` removes.
async fn resolve_stored_request(state: &AppState, request: BidRequest) -> Result<BidRequest, String> {
    let Some(ext) = &request.ext else { return Ok(request) };
    let Ok(parsed) = serde_json::from_str::<ExtRequest>(ext.get()) else {
        // The exchange reports malformed extensions itself.
        return Ok(request);
    };
    let Some(stored_ref) = parsed.prebid.storedrequest else {
        return Ok(request);
    };

    let ids = vec![stored_ref.id.clone()];
    let (mut stored, _errs) = state.stored_requests.fetch_requests(&ids).await;
    let Some(raw) = stored.remove(&stored_ref.id) else {
        return Err(format!("stored request {:?} not found", stored_ref.id));
    };
    let stored_value: Value = serde_json::from_slice(&raw)
        .map_err(|err| format!("stored request {:?} is not valid JSON: {err}", stored_ref.id))?;
    // String round-trips because the opaque RawValue exts don't pass through
    // the Value (de)serializer.
    let request_value: Value = serde_json::to_string(&request)
        .and_then(|encoded| serde_json::from_str(&encoded))
        .map_err(|err| format!("unserializable request: {err}"))?;

    let merged = merge(stored_value, request_value);
    serde_json::from_str(&merged.to_string())
        .map_err(|err| format!("merged request is unusable: {err}"))
}

/// JSON merge-patch: objects merge recursively, the patch wins elsewhere,
/// and explicit nulls in the patch remove the key.
fn merge(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    base.remove(&key);
                } else {
                    let merged = match base.remove(&key) {
                        Some(existing) => merge(existing, value),
                        None => value,
                    };
                    base.insert(key, merged);
                }
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}
