//! Prometheus fabric with a pre-materialized label space.
//!
//! At construction every valid label combination is enumerated and its
//! counter/histogram child is fetched once. The per-request record methods
//! are then a read of an immutable map plus an atomic update, so the hot
//! path never takes the vec lock. Adapters outside the configured set (which
//! can only happen through a misconfigured alias) fall back to the slower
//! vec lookup.

use {
    crate::{
        AdapterBid, AdapterError, AdapterLabels, Browser, CookieFlag, DemandSource, Labels,
        MarkupDelivery, RequestStatus, RequestType,
    },
    itertools::iproduct,
    model::{BidType, BidderName},
    prometheus::{
        Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    },
    std::{collections::HashMap, time::Duration},
};

const STANDARD_LABEL_NAMES: &[&str] =
    &["demand_source", "request_type", "browser", "cookie", "response_status"];
const ADAPTER_LABEL_NAMES: &[&str] =
    &["demand_source", "request_type", "browser", "cookie", "adapter_bid", "adapter"];
const BID_LABEL_NAMES: &[&str] = &[
    "demand_source",
    "request_type",
    "browser",
    "cookie",
    "adapter_bid",
    "adapter",
    "bidtype",
    "markup_type",
];
const ERROR_LABEL_NAMES: &[&str] =
    &["demand_source", "request_type", "browser", "cookie", "adapter_error", "adapter"];

/// Buckets for request and adapter timers, in seconds.
fn timer_buckets() -> Vec<f64> {
    let mut buckets = prometheus::linear_buckets(0.05, 0.05, 20).unwrap();
    buckets.extend([1.5, 2.0, 3.0, 5.0, 10.0, 50.0]);
    buckets
}

/// Buckets for bid prices, in CPM.
fn price_buckets() -> Vec<f64> {
    prometheus::linear_buckets(0.1, 0.1, 200).unwrap()
}

/// Recording interface consumed by the exchange, so tests can drop in a
/// no-op or counting engine.
pub trait MetricsEngine: Send + Sync {
    fn record_request(&self, labels: &Labels);
    fn record_imps(&self, labels: &Labels, num_imps: usize);
    fn record_request_time(&self, labels: &Labels, length: Duration);
    fn record_adapter_request(&self, labels: &AdapterLabels);
    fn record_adapter_time(&self, labels: &AdapterLabels, length: Duration);
    fn record_adapter_bid_received(&self, labels: &AdapterLabels, bid_type: BidType, has_adm: bool);
    fn record_adapter_price(&self, labels: &AdapterLabels, cpm: f64);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct AdapterKey {
    source: DemandSource,
    rtype: RequestType,
    browser: Browser,
    cookie_flag: CookieFlag,
    adapter_bids: AdapterBid,
    adapter: BidderName,
}

impl AdapterKey {
    fn of(labels: &AdapterLabels) -> Self {
        Self {
            source: labels.source,
            rtype: labels.rtype,
            browser: labels.browser,
            cookie_flag: labels.cookie_flag,
            adapter_bids: labels.adapter_bids,
            adapter: labels.adapter.clone(),
        }
    }

    fn values(&self) -> [&str; 6] {
        [
            self.source.as_str(),
            self.rtype.as_str(),
            self.browser.as_str(),
            self.cookie_flag.as_str(),
            self.adapter_bids.as_str(),
            self.adapter.as_str(),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BidKey {
    adapter: AdapterKey,
    bid_type: BidType,
    markup: MarkupDelivery,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ErrorKey {
    source: DemandSource,
    rtype: RequestType,
    browser: Browser,
    cookie_flag: CookieFlag,
    error: AdapterError,
    adapter: BidderName,
}

fn standard_values(labels: &Labels) -> [&'static str; 5] {
    [
        labels.source.as_str(),
        labels.rtype.as_str(),
        labels.browser.as_str(),
        labels.cookie_flag.as_str(),
        labels.request_status.as_str(),
    ]
}

/// The actual prometheus metrics.
pub struct Metrics {
    requests: IntCounterVec,
    requests_children: HashMap<Labels, IntCounter>,
    imps: IntCounterVec,
    imps_children: HashMap<Labels, IntCounter>,
    request_timer: HistogramVec,
    request_timer_children: HashMap<Labels, Histogram>,
    adapter_requests: IntCounterVec,
    adapter_requests_children: HashMap<AdapterKey, IntCounter>,
    adapter_timer: HistogramVec,
    adapter_timer_children: HashMap<AdapterKey, Histogram>,
    adapter_prices: HistogramVec,
    adapter_prices_children: HashMap<AdapterKey, Histogram>,
    adapter_bids: IntCounterVec,
    adapter_bids_children: HashMap<BidKey, IntCounter>,
    adapter_errors: IntCounterVec,
    adapter_errors_children: HashMap<ErrorKey, IntCounter>,
}

impl Metrics {
    /// Creates and registers all metric vectors on `registry`, then
    /// pre-materializes every label combination for the given adapter set.
    pub fn new(registry: &Registry, adapters: &[BidderName]) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Total number of auction requests received."),
            STANDARD_LABEL_NAMES,
        )?;
        let imps = IntCounterVec::new(
            Opts::new("imps_requested_total", "Total number of impressions requested."),
            STANDARD_LABEL_NAMES,
        )?;
        let request_timer = HistogramVec::new(
            HistogramOpts::new("request_time_seconds", "Seconds to resolve each auction request.")
                .buckets(timer_buckets()),
            STANDARD_LABEL_NAMES,
        )?;
        let adapter_requests = IntCounterVec::new(
            Opts::new("adapter_requests_total", "Number of requests sent out to each bidder."),
            ADAPTER_LABEL_NAMES,
        )?;
        let adapter_timer = HistogramVec::new(
            HistogramOpts::new("adapter_time_seconds", "Seconds to resolve each bidder request.")
                .buckets(timer_buckets()),
            ADAPTER_LABEL_NAMES,
        )?;
        let adapter_prices = HistogramVec::new(
            HistogramOpts::new("adapter_prices", "CPM values of the bids from each bidder.")
                .buckets(price_buckets()),
            ADAPTER_LABEL_NAMES,
        )?;
        let adapter_bids = IntCounterVec::new(
            Opts::new("adapter_bids_received_total", "Number of bids received from each bidder."),
            BID_LABEL_NAMES,
        )?;
        let adapter_errors = IntCounterVec::new(
            Opts::new(
                "adapter_errors_total",
                "Number of unique error kinds seen in each request to a bidder.",
            ),
            ERROR_LABEL_NAMES,
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(imps.clone()))?;
        registry.register(Box::new(request_timer.clone()))?;
        registry.register(Box::new(adapter_requests.clone()))?;
        registry.register(Box::new(adapter_timer.clone()))?;
        registry.register(Box::new(adapter_prices.clone()))?;
        registry.register(Box::new(adapter_bids.clone()))?;
        registry.register(Box::new(adapter_errors.clone()))?;

        let mut metrics = Self {
            requests,
            requests_children: HashMap::new(),
            imps,
            imps_children: HashMap::new(),
            request_timer,
            request_timer_children: HashMap::new(),
            adapter_requests,
            adapter_requests_children: HashMap::new(),
            adapter_timer,
            adapter_timer_children: HashMap::new(),
            adapter_prices,
            adapter_prices_children: HashMap::new(),
            adapter_bids,
            adapter_bids_children: HashMap::new(),
            adapter_errors,
            adapter_errors_children: HashMap::new(),
        };
        metrics.materialize(adapters);
        Ok(metrics)
    }

    /// Walks the Cartesian product of the label space and fetches every
    /// child once.
    fn materialize(&mut self, adapters: &[BidderName]) {
        for (source, rtype, browser, cookie_flag, request_status) in iproduct!(
            DemandSource::ALL,
            RequestType::ALL,
            Browser::ALL,
            CookieFlag::ALL,
            RequestStatus::ALL
        ) {
            let labels = Labels {
                source: *source,
                rtype: *rtype,
                browser: *browser,
                cookie_flag: *cookie_flag,
                request_status: *request_status,
            };
            let values = standard_values(&labels);
            self.requests_children
                .insert(labels.clone(), self.requests.with_label_values(&values));
            self.imps_children
                .insert(labels.clone(), self.imps.with_label_values(&values));
            self.request_timer_children
                .insert(labels, self.request_timer.with_label_values(&values));
        }

        for (source, rtype, browser, cookie_flag, adapter_bids, adapter) in iproduct!(
            DemandSource::ALL,
            RequestType::ALL,
            Browser::ALL,
            CookieFlag::ALL,
            AdapterBid::ALL,
            adapters
        ) {
            let key = AdapterKey {
                source: *source,
                rtype: *rtype,
                browser: *browser,
                cookie_flag: *cookie_flag,
                adapter_bids: *adapter_bids,
                adapter: adapter.clone(),
            };
            let values = key.values();
            self.adapter_requests_children
                .insert(key.clone(), self.adapter_requests.with_label_values(&values));
            self.adapter_timer_children
                .insert(key.clone(), self.adapter_timer.with_label_values(&values));
            self.adapter_prices_children
                .insert(key.clone(), self.adapter_prices.with_label_values(&values));

            for (bid_type, markup) in iproduct!(BidType::ALL.iter(), MarkupDelivery::ALL) {
                let bid_key = BidKey {
                    adapter: key.clone(),
                    bid_type: *bid_type,
                    markup: *markup,
                };
                let child = {
                    let mut values = bid_key.adapter.values().to_vec();
                    values.push(bid_key.bid_type.as_str());
                    values.push(bid_key.markup.as_str());
                    self.adapter_bids.with_label_values(&values)
                };
                self.adapter_bids_children.insert(bid_key, child);
            }
        }

        for (source, rtype, browser, cookie_flag, error, adapter) in iproduct!(
            DemandSource::ALL,
            RequestType::ALL,
            Browser::ALL,
            CookieFlag::ALL,
            AdapterError::ALL,
            adapters
        ) {
            let key = ErrorKey {
                source: *source,
                rtype: *rtype,
                browser: *browser,
                cookie_flag: *cookie_flag,
                error: *error,
                adapter: adapter.clone(),
            };
            let child = {
                let values = [
                    key.source.as_str(),
                    key.rtype.as_str(),
                    key.browser.as_str(),
                    key.cookie_flag.as_str(),
                    key.error.as_str(),
                    key.adapter.as_str(),
                ];
                self.adapter_errors.with_label_values(&values)
            };
            self.adapter_errors_children.insert(key, child);
        }
    }

    fn adapter_counter(&self, labels: &AdapterLabels) -> IntCounter {
        let key = AdapterKey::of(labels);
        match self.adapter_requests_children.get(&key) {
            Some(child) => child.clone(),
            None => self.adapter_requests.with_label_values(&key.values()),
        }
    }
}

impl MetricsEngine for Metrics {
    fn record_request(&self, labels: &Labels) {
        match self.requests_children.get(labels) {
            Some(child) => child.inc(),
            None => self.requests.with_label_values(&standard_values(labels)).inc(),
        }
    }

    fn record_imps(&self, labels: &Labels, num_imps: usize) {
        match self.imps_children.get(labels) {
            Some(child) => child.inc_by(num_imps as u64),
            None => self
                .imps
                .with_label_values(&standard_values(labels))
                .inc_by(num_imps as u64),
        }
    }

    fn record_request_time(&self, labels: &Labels, length: Duration) {
        match self.request_timer_children.get(labels) {
            Some(child) => child.observe(length.as_secs_f64()),
            None => self
                .request_timer
                .with_label_values(&standard_values(labels))
                .observe(length.as_secs_f64()),
        }
    }

    fn record_adapter_request(&self, labels: &AdapterLabels) {
        self.adapter_counter(labels).inc();
        for error in &labels.adapter_errors {
            let key = ErrorKey {
                source: labels.source,
                rtype: labels.rtype,
                browser: labels.browser,
                cookie_flag: labels.cookie_flag,
                error: *error,
                adapter: labels.adapter.clone(),
            };
            match self.adapter_errors_children.get(&key) {
                Some(child) => child.inc(),
                None => {
                    let values = [
                        key.source.as_str(),
                        key.rtype.as_str(),
                        key.browser.as_str(),
                        key.cookie_flag.as_str(),
                        key.error.as_str(),
                        key.adapter.as_str(),
                    ];
                    self.adapter_errors.with_label_values(&values).inc()
                }
            }
        }
    }

    fn record_adapter_time(&self, labels: &AdapterLabels, length: Duration) {
        let key = AdapterKey::of(labels);
        match self.adapter_timer_children.get(&key) {
            Some(child) => child.observe(length.as_secs_f64()),
            None => self
                .adapter_timer
                .with_label_values(&key.values())
                .observe(length.as_secs_f64()),
        }
    }

    fn record_adapter_bid_received(&self, labels: &AdapterLabels, bid_type: BidType, has_adm: bool) {
        let markup = if has_adm { MarkupDelivery::Adm } else { MarkupDelivery::Unknown };
        let key = BidKey {
            adapter: AdapterKey::of(labels),
            bid_type,
            markup,
        };
        match self.adapter_bids_children.get(&key) {
            Some(child) => child.inc(),
            None => {
                let mut values = key.adapter.values().to_vec();
                values.push(key.bid_type.as_str());
                values.push(key.markup.as_str());
                self.adapter_bids.with_label_values(&values).inc()
            }
        }
    }

    fn record_adapter_price(&self, labels: &AdapterLabels, cpm: f64) {
        let key = AdapterKey::of(labels);
        match self.adapter_prices_children.get(&key) {
            Some(child) => child.observe(cpm),
            None => self.adapter_prices.with_label_values(&key.values()).observe(cpm),
        }
    }
}
