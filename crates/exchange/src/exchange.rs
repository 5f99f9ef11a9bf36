//! The auction orchestrator.
//!
//! `hold_auction` is the whole request pipeline: clean the request into
//! per-bidder projections, fan out to every live bidder under the deadline,
//! validate what comes back, pick winners, decorate them with targeting and
//! assemble the OpenRTB response. One misbehaving bidder never takes the
//! auction down with it: panics, timeouts and garbage responses all collapse
//! into per-seat errors in the response extension.

use {
    crate::{
        auction::Auction,
        bidder::{AdaptedBidder, BidderSeatBid},
        cache_client::CacheClient,
        cleaner::clean_openrtb_requests,
        error::{errors_to_ext, ExchangeError},
        oracles::{IdFetcher, Permissions},
        targeting::TargetData,
        validation::validate_seat,
    },
    futures::FutureExt,
    metrics::{AdapterBid, AdapterError, AdapterLabels, Labels, MetricsEngine},
    model::{
        ext::{ExtBid, ExtBidPrebid, ExtBidResponse, ExtRequest, ExtResponseDebug, ExtSeatBid},
        BidRequest, BidResponse, BidderName, SeatBid, NO_BID_INVALID_REQUEST,
    },
    rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng},
    std::{
        collections::{HashMap, HashSet},
        panic::AssertUnwindSafe,
        sync::Arc,
        time::Duration,
    },
    tokio::{sync::mpsc, time::Instant},
};

pub struct Exchange {
    adapters: HashMap<BidderName, Arc<dyn AdaptedBidder>>,
    vendor_ids: HashMap<BidderName, u16>,
    metrics: Arc<dyn MetricsEngine>,
    cache: Arc<dyn CacheClient>,
    /// Time reserved for the creative-cache put when bid caching is
    /// requested; subtracted from the bidders' deadline.
    cache_time: Duration,
    gdpr: Arc<dyn Permissions>,
    usersync_if_ambiguous: bool,
}

/// Extra response data a bidder produced besides its bids.
#[derive(Default)]
struct SeatResponseExtra {
    response_time_ms: u64,
    errors: Vec<ExchangeError>,
}

/// What one dispatched bidder task hands back over the collection channel.
struct BidResponseWrapper {
    bidder: BidderName,
    seat: Option<BidderSeatBid>,
    extra: SeatResponseExtra,
}

impl Exchange {
    pub fn new(
        adapters: HashMap<BidderName, Arc<dyn AdaptedBidder>>,
        vendor_ids: HashMap<BidderName, u16>,
        metrics: Arc<dyn MetricsEngine>,
        cache: Arc<dyn CacheClient>,
        cache_time: Duration,
        gdpr: Arc<dyn Permissions>,
        usersync_if_ambiguous: bool,
    ) -> Self {
        Self {
            adapters,
            vendor_ids,
            metrics,
            cache,
            cache_time,
            gdpr,
            usersync_if_ambiguous,
        }
    }

    /// Executes an OpenRTB 2.5 auction.
    pub async fn hold_auction(
        &self,
        request: &BidRequest,
        usersyncs: &dyn IdFetcher,
        labels: &Labels,
        deadline: Option<Instant>,
    ) -> anyhow::Result<BidResponse> {
        let mut rng = StdRng::from_entropy();
        self.hold_auction_with_rng(request, usersyncs, labels, deadline, &mut rng).await
    }

    /// Like [`Self::hold_auction`] with a caller-provided RNG for the
    /// adapter-order shuffle, so tests can pin the seat order.
    pub async fn hold_auction_with_rng<R: Rng + Send>(
        &self,
        request: &BidRequest,
        usersyncs: &dyn IdFetcher,
        labels: &Labels,
        deadline: Option<Instant>,
        rng: &mut R,
    ) -> anyhow::Result<BidResponse> {
        let debug = request.test == 1;
        // Via a string because the opaque RawValue exts don't pass through
        // the Value serializer.
        let resolved_request = if debug {
            Some(serde_json::from_str(&serde_json::to_string(request)?)?)
        } else {
            None
        };

        // A malformed prebid extension leaves nothing to auction.
        let prebid = match &request.ext {
            Some(ext) => match serde_json::from_str::<ExtRequest>(ext.get()) {
                Ok(parsed) => parsed.prebid,
                Err(err) => {
                    tracing::debug!(?err, request = %request.id, "unusable request extension");
                    return Ok(invalid_request_response(&request.id));
                }
            },
            None => Default::default(),
        };

        let targ_data = TargetData::from_prebid(&prebid);
        let should_cache_bids = targ_data.as_ref().is_some_and(|t| t.include_cache_bids);
        let should_cache_vast = targ_data.as_ref().is_some_and(|t| t.include_cache_vast);

        let cleaned = clean_openrtb_requests(
            request,
            &prebid,
            usersyncs,
            &*self.gdpr,
            &self.vendor_ids,
            self.usersync_if_ambiguous,
        )
        .await;
        let mut live_adapters: Vec<BidderName> = cleaned.requests.keys().cloned().collect();
        // Randomize the seat order once per auction so no bidder gains a
        // positional advantage in the response.
        live_adapters.sort();
        live_adapters.shuffle(rng);

        // Bid caching eats into the bidders' time; VAST-only caching does
        // not shorten the deadline.
        let auction_deadline = match (deadline, should_cache_bids) {
            (Some(deadline), true) => Some(deadline - self.cache_time),
            _ => deadline,
        };

        let (mut adapter_bids, mut adapter_extra) = self
            .get_all_bids(
                auction_deadline,
                cleaned.requests,
                &cleaned.aliases,
                &prebid.bidadjustmentfactors,
                labels,
                debug,
            )
            .await;

        let mut auction = Auction::new(&adapter_bids);
        if let Some(targ_data) = &targ_data {
            auction.set_rounded_prices(&adapter_bids, &targ_data.price_granularity);
            auction
                .do_cache(&adapter_bids, &*self.cache, should_cache_bids, should_cache_vast)
                .await;
            targ_data.set_targeting(&auction, &mut adapter_bids, request.app.is_some());
        }

        Ok(build_bid_response(
            &live_adapters,
            &adapter_bids,
            request,
            resolved_request,
            &mut adapter_extra,
            &cleaned.errors,
        )?)
    }

    /// Sends every cleaned request to its bidder concurrently and gathers
    /// the results. Exactly one wrapper arrives per task; panicking tasks
    /// surface as empty seats with an `Unknown` error.
    async fn get_all_bids(
        &self,
        deadline: Option<Instant>,
        clean_requests: HashMap<BidderName, BidRequest>,
        aliases: &HashMap<String, String>,
        bid_adjustments: &HashMap<String, f64>,
        labels: &Labels,
        debug: bool,
    ) -> (
        HashMap<BidderName, BidderSeatBid>,
        HashMap<BidderName, SeatResponseExtra>,
    ) {
        let count = clean_requests.len();
        let (tx, mut rx) = mpsc::channel(count.max(1));

        for (name, cleaned_request) in clean_requests {
            let core = aliases.get(name.as_str()).cloned().unwrap_or_else(|| name.to_string());
            let core = BidderName::from(core.as_str());
            let Some(bidder) = self.adapters.get(&core).cloned() else {
                tracing::debug!(bidder = %name, adapter = %core, "request named an unknown bidder");
                let _ = tx
                    .send(BidResponseWrapper {
                        bidder: name,
                        seat: None,
                        extra: SeatResponseExtra {
                            response_time_ms: 0,
                            errors: vec![ExchangeError::BadInput(format!(
                                "unknown bidder {core}"
                            ))],
                        },
                    })
                    .await;
                continue;
            };

            let adjustment = bid_adjustments.get(name.as_str()).copied().unwrap_or(1.0);
            let metrics = self.metrics.clone();
            let labels = labels.clone();
            let tx = tx.clone();
            let panic_name = name.clone();

            let run = async move {
                let start = std::time::Instant::now();
                let (seat, mut errs) = bidder
                    .request_bid(&cleaned_request, &name, adjustment, deadline, debug)
                    .await;
                let mut seat = seat;
                // Validate as soon as the bids exist so nothing downstream
                // sees an invalid one.
                if let Some(seat) = seat.as_mut() {
                    errs.extend(validate_seat(seat, &cleaned_request.cur));
                }
                let elapsed = start.elapsed();

                let mut adapter_labels = AdapterLabels::new(&labels, core);
                adapter_labels.adapter_bids = bids_to_metric(&seat);
                adapter_labels.adapter_errors = errors_to_metric(&errs);
                metrics.record_adapter_time(&adapter_labels, elapsed);
                if let Some(seat) = &seat {
                    for typed in &seat.bids {
                        metrics.record_adapter_price(&adapter_labels, typed.bid.price * 1000.0);
                        metrics.record_adapter_bid_received(
                            &adapter_labels,
                            typed.bid_type,
                            typed.bid.adm.is_some(),
                        );
                    }
                }
                metrics.record_adapter_request(&adapter_labels);

                BidResponseWrapper {
                    bidder: name,
                    seat,
                    extra: SeatResponseExtra {
                        response_time_ms: elapsed.as_millis() as u64,
                        errors: errs,
                    },
                }
            };

            tokio::spawn(async move {
                let wrapper = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(wrapper) => wrapper,
                    Err(panic) => {
                        tracing::error!(
                            bidder = %panic_name,
                            panic = panic_message(&panic),
                            "auction recovered a panicking bidder"
                        );
                        BidResponseWrapper {
                            bidder: panic_name,
                            seat: None,
                            extra: SeatResponseExtra {
                                response_time_ms: 0,
                                errors: vec![ExchangeError::Unknown(
                                    "the bidder panicked while bidding".to_string(),
                                )],
                            },
                        }
                    }
                };
                let _ = tx.send(wrapper).await;
            });
        }
        drop(tx);

        let mut adapter_bids = HashMap::with_capacity(count);
        let mut adapter_extra = HashMap::with_capacity(count);
        for _ in 0..count {
            let Some(wrapper) = rx.recv().await else { break };
            if let Some(seat) = wrapper.seat {
                adapter_bids.insert(wrapper.bidder.clone(), seat);
            }
            adapter_extra.insert(wrapper.bidder, wrapper.extra);
        }
        (adapter_bids, adapter_extra)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn bids_to_metric(seat: &Option<BidderSeatBid>) -> AdapterBid {
    match seat {
        Some(seat) if !seat.bids.is_empty() => AdapterBid::Present,
        _ => AdapterBid::None,
    }
}

fn errors_to_metric(errs: &[ExchangeError]) -> HashSet<AdapterError> {
    errs.iter().map(ExchangeError::metric_label).collect()
}

fn invalid_request_response(id: &str) -> BidResponse {
    BidResponse {
        id: id.to_string(),
        nbr: Some(NO_BID_INVALID_REQUEST),
        ..Default::default()
    }
}

/// Turns the gathered seat bids into the final OpenRTB response, in the
/// randomized live-adapter order.
fn build_bid_response(
    live_adapters: &[BidderName],
    adapter_bids: &HashMap<BidderName, BidderSeatBid>,
    request: &BidRequest,
    resolved_request: Option<serde_json::Value>,
    adapter_extra: &mut HashMap<BidderName, SeatResponseExtra>,
    request_errors: &[ExchangeError],
) -> anyhow::Result<BidResponse> {
    let mut seatbid = Vec::with_capacity(live_adapters.len());
    for name in live_adapters {
        let Some(seat) = adapter_bids.get(name) else { continue };
        if seat.bids.is_empty() {
            continue;
        }
        seatbid.push(make_seat_bid(seat, name, adapter_extra)?);
    }

    let ext = make_ext_response(adapter_bids, adapter_extra, request, resolved_request, request_errors);
    Ok(BidResponse {
        id: request.id.clone(),
        nbr: seatbid.is_empty().then_some(NO_BID_INVALID_REQUEST),
        seatbid,
        ext: Some(serde_json::value::to_raw_value(&ext)?),
        ..Default::default()
    })
}

fn make_seat_bid(
    seat: &BidderSeatBid,
    name: &BidderName,
    adapter_extra: &mut HashMap<BidderName, SeatResponseExtra>,
) -> anyhow::Result<SeatBid> {
    let ext = match &seat.ext {
        Some(bidder_ext) => Some(serde_json::value::to_raw_value(&ExtSeatBid {
            bidder: Some(bidder_ext.clone()),
        })?),
        None => None,
    };

    let mut bids = Vec::with_capacity(seat.bids.len());
    for typed in &seat.bids {
        let bid_ext = ExtBid {
            bidder: typed.bid.ext.clone(),
            prebid: ExtBidPrebid {
                targeting: typed.bid_targets.clone(),
                bid_type: Some(typed.bid_type),
            },
        };
        match serde_json::value::to_raw_value(&bid_ext) {
            Ok(raw) => {
                let mut bid = typed.bid.clone();
                bid.ext = Some(raw);
                bids.push(bid);
            }
            Err(err) => {
                adapter_extra
                    .entry(name.clone())
                    .or_default()
                    .errors
                    .push(ExchangeError::Unknown(format!("error writing bid.ext: {err}")));
            }
        }
    }

    Ok(SeatBid {
        bid: bids,
        seat: Some(name.to_string()),
        group: 0,
        ext,
    })
}

fn make_ext_response(
    adapter_bids: &HashMap<BidderName, BidderSeatBid>,
    adapter_extra: &HashMap<BidderName, SeatResponseExtra>,
    request: &BidRequest,
    resolved_request: Option<serde_json::Value>,
    request_errors: &[ExchangeError],
) -> ExtBidResponse {
    let mut ext = ExtBidResponse::default();
    for (name, extra) in adapter_extra {
        if !extra.errors.is_empty() {
            ext.errors.insert(name.to_string(), errors_to_ext(&extra.errors));
        }
        ext.responsetimemillis.insert(name.to_string(), extra.response_time_ms);
    }
    if !request_errors.is_empty() {
        ext.errors.insert("prebid".to_string(), errors_to_ext(request_errors));
    }
    if request.test == 1 {
        let mut debug = ExtResponseDebug {
            resolvedrequest: resolved_request,
            ..Default::default()
        };
        for (name, seat) in adapter_bids {
            if !seat.http_calls.is_empty() {
                debug.httpcalls.insert(name.to_string(), seat.http_calls.clone());
            }
        }
        ext.debug = Some(debug);
    }
    ext
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            bidder::TypedBid,
            cache_client::{MockCacheClient, NullCacheClient},
            oracles::{AlwaysAllow, NoSyncs},
        },
        metrics::{Browser, CookieFlag, DemandSource, RequestStatus, RequestType},
        model::{Bid, BidType},
        serde_json::json,
    };

    fn labels() -> Labels {
        Labels {
            source: DemandSource::Web,
            rtype: RequestType::Openrtb2Web,
            browser: Browser::Other,
            cookie_flag: CookieFlag::No,
            request_status: RequestStatus::Ok,
        }
    }

    /// A bidder that returns canned bids after an optional delay, honoring
    /// the auction deadline the way the HTTP client would.
    struct StubBidder {
        bids: Vec<(&'static str, &'static str, f64)>,
        currency: &'static str,
        delay: Duration,
    }

    impl StubBidder {
        fn bidding(bids: Vec<(&'static str, &'static str, f64)>) -> Arc<dyn AdaptedBidder> {
            Arc::new(Self {
                bids,
                currency: "USD",
                delay: Duration::ZERO,
            })
        }

        fn seat(&self, adjustment: f64) -> BidderSeatBid {
            BidderSeatBid {
                bids: self
                    .bids
                    .iter()
                    .map(|(id, impid, price)| {
                        TypedBid::new(
                            Bid {
                                id: id.to_string(),
                                impid: impid.to_string(),
                                price: price * adjustment,
                                crid: "creative".to_string(),
                                w: Some(300),
                                h: Some(250),
                                ..Default::default()
                            },
                            BidType::Banner,
                        )
                    })
                    .collect(),
                currency: self.currency.to_string(),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl AdaptedBidder for StubBidder {
        async fn request_bid(
            &self,
            _request: &BidRequest,
            _name: &BidderName,
            bid_adjustment: f64,
            deadline: Option<Instant>,
            _collect_debug: bool,
        ) -> (Option<BidderSeatBid>, Vec<ExchangeError>) {
            let work = async {
                tokio::time::sleep(self.delay).await;
            };
            if let Some(deadline) = deadline {
                if tokio::time::timeout_at(deadline, work).await.is_err() {
                    return (Some(BidderSeatBid::default()), vec![ExchangeError::Timeout]);
                }
            } else {
                work.await;
            }
            (Some(self.seat(bid_adjustment)), Vec::new())
        }
    }

    struct PanickingBidder;

    #[async_trait::async_trait]
    impl AdaptedBidder for PanickingBidder {
        async fn request_bid(
            &self,
            _request: &BidRequest,
            _name: &BidderName,
            _bid_adjustment: f64,
            _deadline: Option<Instant>,
            _collect_debug: bool,
        ) -> (Option<BidderSeatBid>, Vec<ExchangeError>) {
            panic!("this bidder is broken")
        }
    }

    fn exchange(
        adapters: HashMap<BidderName, Arc<dyn AdaptedBidder>>,
        cache: Arc<dyn CacheClient>,
    ) -> Exchange {
        let bidder_names: Vec<BidderName> = adapters.keys().cloned().collect();
        let fabric =
            Arc::new(metrics::Metrics::new(&prometheus::Registry::new(), &bidder_names).unwrap());
        Exchange::new(
            adapters,
            HashMap::new(),
            fabric,
            cache,
            Duration::from_millis(50),
            Arc::new(AlwaysAllow),
            true,
        )
    }

    fn banner_request(bidders: &[&str]) -> BidRequest {
        let mut ext = serde_json::Map::new();
        for bidder in bidders {
            ext.insert(bidder.to_string(), json!({"placement": 1}));
        }
        serde_json::from_str(
            &json!({
                "id": "some-request-id",
                "imp": [{
                    "id": "1",
                    "banner": {"format": [{"w": 300, "h": 250}]},
                    "ext": ext,
                }],
            })
            .to_string(),
        )
        .unwrap()
    }

    fn response_ext(response: &BidResponse) -> ExtBidResponse {
        serde_json::from_str(response.ext.as_ref().unwrap().get()).unwrap()
    }

    fn bid_targeting(bid: &Bid) -> std::collections::BTreeMap<String, String> {
        let ext: ExtBid = serde_json::from_str(bid.ext.as_ref().unwrap().get()).unwrap();
        ext.prebid.targeting
    }

    async fn run_auction(exchange: &Exchange, request: &BidRequest) -> BidResponse {
        let mut rng = StdRng::seed_from_u64(42);
        exchange
            .hold_auction_with_rng(request, &NoSyncs, &labels(), None, &mut rng)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn single_banner_single_bidder_one_bid() {
        let adapters = HashMap::from([(
            BidderName::from("appnexus"),
            StubBidder::bidding(vec![("a", "1", 1.50)]),
        )]);
        let exchange = exchange(adapters, Arc::new(NullCacheClient));
        let response = run_auction(&exchange, &banner_request(&["appnexus"])).await;

        assert_eq!(response.id, "some-request-id");
        assert_eq!(response.nbr, None);
        assert_eq!(response.seatbid.len(), 1);
        assert_eq!(response.seatbid[0].seat.as_deref(), Some("appnexus"));
        assert_eq!(response.seatbid[0].bid.len(), 1);
        assert_eq!(response.seatbid[0].bid[0].price, 1.50);
        let ext = response_ext(&response);
        assert!(ext.responsetimemillis.contains_key("appnexus"));
        assert!(ext.errors.is_empty());
    }

    #[tokio::test]
    async fn tied_prices_break_on_the_lex_smaller_bidder() {
        let adapters = HashMap::from([
            (BidderName::from("alpha"), StubBidder::bidding(vec![("a", "1", 2.00)])),
            (BidderName::from("beta"), StubBidder::bidding(vec![("b", "1", 2.00)])),
        ]);
        let exchange = exchange(adapters, Arc::new(NullCacheClient));
        let mut request = banner_request(&["alpha", "beta"]);
        request.ext = Some(
            serde_json::value::to_raw_value(&json!({"prebid": {"targeting": {}}})).unwrap(),
        );
        let response = run_auction(&exchange, &request).await;

        assert_eq!(response.seatbid.len(), 2);
        let alpha_bid = response
            .seatbid
            .iter()
            .find(|seat| seat.seat.as_deref() == Some("alpha"))
            .map(|seat| &seat.bid[0])
            .unwrap();
        let beta_bid = response
            .seatbid
            .iter()
            .find(|seat| seat.seat.as_deref() == Some("beta"))
            .map(|seat| &seat.bid[0])
            .unwrap();

        let alpha_targets = bid_targeting(alpha_bid);
        assert_eq!(alpha_targets["hb_bidder"], "alpha");
        assert_eq!(alpha_targets["hb_pb"], "2.00");
        assert_eq!(alpha_targets["hb_pb_alpha"], "2.00");

        let beta_targets = bid_targeting(beta_bid);
        assert!(!beta_targets.contains_key("hb_bidder"));
        assert_eq!(beta_targets["hb_pb_beta"], "2.00");
    }

    #[tokio::test]
    async fn panicking_adapter_does_not_abort_the_auction() {
        let adapters: HashMap<BidderName, Arc<dyn AdaptedBidder>> = HashMap::from([
            (BidderName::from("alpha"), StubBidder::bidding(vec![("a", "1", 1.00)])),
            (BidderName::from("x"), Arc::new(PanickingBidder) as Arc<dyn AdaptedBidder>),
        ]);
        let exchange = exchange(adapters, Arc::new(NullCacheClient));
        let response = run_auction(&exchange, &banner_request(&["alpha", "x"])).await;

        assert_eq!(response.seatbid.len(), 1);
        assert_eq!(response.seatbid[0].seat.as_deref(), Some("alpha"));
        let ext = response_ext(&response);
        assert_eq!(ext.errors["x"].len(), 1);
        assert_eq!(ext.errors["x"][0].code, 999);
    }

    #[tokio::test]
    async fn deadline_shortens_for_bid_caching_and_timeouts_surface() {
        let slow: Arc<dyn AdaptedBidder> = Arc::new(StubBidder {
            bids: vec![("s", "1", 9.00)],
            currency: "USD",
            delay: Duration::from_millis(260),
        });
        let adapters = HashMap::from([
            (BidderName::from("fast"), StubBidder::bidding(vec![("f", "1", 1.50)])),
            (BidderName::from("slow"), slow),
        ]);

        let mut cache = MockCacheClient::new();
        cache
            .expect_put_many()
            .returning(|values| values.iter().map(|_| Some("uuid-1".to_string())).collect());

        let exchange = exchange(adapters, Arc::new(cache));
        let mut request = banner_request(&["fast", "slow"]);
        request.ext = Some(
            serde_json::value::to_raw_value(
                &json!({"prebid": {"targeting": {}, "cache": {"bids": {}}}}),
            )
            .unwrap(),
        );

        let deadline = Instant::now() + Duration::from_millis(300);
        let mut rng = StdRng::seed_from_u64(42);
        let response = exchange
            .hold_auction_with_rng(&request, &NoSyncs, &labels(), Some(deadline), &mut rng)
            .await
            .unwrap();

        // The slow bidder blew the shortened 250ms deadline.
        let ext = response_ext(&response);
        assert_eq!(ext.errors["slow"][0].code, 1);

        // The fast winner still got cached within the reserved time.
        assert_eq!(response.seatbid.len(), 1);
        let targets = bid_targeting(&response.seatbid[0].bid[0]);
        assert_eq!(targets["hb_cache_id"], "uuid-1");
    }

    #[tokio::test]
    async fn disallowed_currency_discards_the_seat_and_sets_nbr() {
        let adapters = HashMap::from([(
            BidderName::from("alpha"),
            StubBidder::bidding(vec![("a", "1", 1.00)]),
        )]);
        let exchange = exchange(adapters, Arc::new(NullCacheClient));
        let mut request = banner_request(&["alpha"]);
        request.cur = vec!["EUR".to_string()];
        let response = run_auction(&exchange, &request).await;

        assert!(response.seatbid.is_empty());
        assert_eq!(response.nbr, Some(NO_BID_INVALID_REQUEST));
        let ext = response_ext(&response);
        assert_eq!(ext.errors["alpha"].len(), 1);
        assert_eq!(ext.errors["alpha"][0].code, 4);
    }

    #[tokio::test]
    async fn zero_bidders_yields_invalid_request() {
        let exchange = exchange(HashMap::new(), Arc::new(NullCacheClient));
        let request = banner_request(&[]);
        let response = run_auction(&exchange, &request).await;
        assert!(response.seatbid.is_empty());
        assert_eq!(response.nbr, Some(NO_BID_INVALID_REQUEST));
    }

    #[tokio::test]
    async fn malformed_prebid_ext_is_fatal() {
        let exchange = exchange(HashMap::new(), Arc::new(NullCacheClient));
        let mut request = banner_request(&["alpha"]);
        request.ext = Some(
            serde_json::value::RawValue::from_string(r#"{"prebid": {"aliases": 7}}"#.to_string())
                .unwrap(),
        );
        let response = run_auction(&exchange, &request).await;
        assert!(response.seatbid.is_empty());
        assert_eq!(response.nbr, Some(NO_BID_INVALID_REQUEST));
        assert!(response.ext.is_none());
    }

    #[tokio::test]
    async fn bid_adjustment_factors_scale_prices() {
        let adapters = HashMap::from([(
            BidderName::from("alpha"),
            StubBidder::bidding(vec![("a", "1", 2.00)]),
        )]);
        let exchange = exchange(adapters, Arc::new(NullCacheClient));
        let mut request = banner_request(&["alpha"]);
        request.ext = Some(
            serde_json::value::to_raw_value(
                &json!({"prebid": {"bidadjustmentfactors": {"alpha": 0.5}}}),
            )
            .unwrap(),
        );
        let response = run_auction(&exchange, &request).await;
        assert_eq!(response.seatbid[0].bid[0].price, 1.00);
    }

    #[tokio::test]
    async fn debug_requests_carry_the_resolved_snapshot() {
        let adapters = HashMap::from([(
            BidderName::from("alpha"),
            StubBidder::bidding(vec![("a", "1", 1.00)]),
        )]);
        let exchange = exchange(adapters, Arc::new(NullCacheClient));
        let mut request = banner_request(&["alpha"]);
        request.test = 1;
        let response = run_auction(&exchange, &request).await;
        let ext = response_ext(&response);
        let debug = ext.debug.unwrap();
        assert_eq!(debug.resolvedrequest.unwrap()["id"], json!("some-request-id"));
    }

    #[tokio::test]
    async fn seat_order_follows_the_seeded_shuffle() {
        let adapters = HashMap::from([
            (BidderName::from("alpha"), StubBidder::bidding(vec![("a", "1", 1.00)])),
            (BidderName::from("beta"), StubBidder::bidding(vec![("b", "1", 1.00)])),
            (BidderName::from("gamma"), StubBidder::bidding(vec![("c", "1", 1.00)])),
        ]);
        let exchange = exchange(adapters, Arc::new(NullCacheClient));
        let request = banner_request(&["alpha", "beta", "gamma"]);

        let first = run_auction(&exchange, &request).await;
        let second = run_auction(&exchange, &request).await;
        let order = |response: &BidResponse| {
            response
                .seatbid
                .iter()
                .map(|seat| seat.seat.clone().unwrap())
                .collect::<Vec<_>>()
        };
        // Same seed, same order; all three seats present.
        assert_eq!(order(&first), order(&second));
        assert_eq!(first.seatbid.len(), 3);
    }
}
