//! Executes one adapter against its demand partner.
//!
//! [`HttpBidder`] bridges the pure [`Adapter`] interface onto the wire: it
//! issues the adapter's outbound requests concurrently on the shared client,
//! maps response statuses onto the error taxonomy, applies the bidder's
//! price adjustment factor and optionally records call traces for debug
//! responses.

use {
    crate::{
        adapters::{Adapter, RequestData, ResponseData},
        error::ExchangeError,
    },
    bytes::Bytes,
    futures::future::join_all,
    model::{ext::ExtHttpCall, Bid, BidRequest, BidType, BidderName},
    serde_json::value::RawValue,
    std::{collections::BTreeMap, str::FromStr, sync::Arc},
    tokio::time::Instant,
};

/// A bid plus the exchange-side state attached to it on its way to the
/// response.
#[derive(Clone, Debug)]
pub struct TypedBid {
    pub bid: Bid,
    pub bid_type: BidType,
    /// Ad-server keywords, filled by the targeting stage after the auction.
    pub bid_targets: BTreeMap<String, String>,
}

impl TypedBid {
    pub fn new(bid: Bid, bid_type: BidType) -> Self {
        Self {
            bid,
            bid_type,
            bid_targets: BTreeMap::new(),
        }
    }
}

/// Everything one bidder contributed to an auction.
#[derive(Debug, Default)]
pub struct BidderSeatBid {
    pub bids: Vec<TypedBid>,
    /// Declared currency of the bids; empty means the default (USD).
    pub currency: String,
    /// Call traces, collected only for debug requests.
    pub http_calls: Vec<ExtHttpCall>,
    /// Opaque seat-level extension from the adapter.
    pub ext: Option<Box<RawValue>>,
}

/// A bidder ready to be dispatched by the exchange. The name the seat is
/// reported under may be an alias of the adapter actually running.
#[async_trait::async_trait]
pub trait AdaptedBidder: Send + Sync {
    async fn request_bid(
        &self,
        request: &BidRequest,
        name: &BidderName,
        bid_adjustment: f64,
        deadline: Option<Instant>,
        collect_debug: bool,
    ) -> (Option<BidderSeatBid>, Vec<ExchangeError>);
}

pub struct HttpBidder {
    adapter: Arc<dyn Adapter>,
    client: reqwest::Client,
}

impl HttpBidder {
    pub fn new(adapter: Arc<dyn Adapter>, client: reqwest::Client) -> Self {
        Self { adapter, client }
    }

    async fn do_request(
        &self,
        data: &RequestData,
        deadline: Option<Instant>,
    ) -> Result<ResponseData, ExchangeError> {
        let method = reqwest::Method::from_str(&data.method)
            .map_err(|_| ExchangeError::Unknown(format!("invalid method {:?}", data.method)))?;
        let request = self
            .client
            .request(method, data.uri.as_str())
            .headers(data.headers.clone())
            .body(data.body.clone());

        let send = async {
            let response = request
                .send()
                .await
                .map_err(|err| ExchangeError::FailedToRequestBids(err.to_string()))?;
            let status_code = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|err| ExchangeError::FailedToRequestBids(err.to_string()))?;
            Ok(ResponseData { status_code, body })
        };
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, send)
                .await
                .map_err(|_| ExchangeError::Timeout)?,
            None => send.await,
        }
    }
}

#[async_trait::async_trait]
impl AdaptedBidder for HttpBidder {
    async fn request_bid(
        &self,
        request: &BidRequest,
        name: &BidderName,
        bid_adjustment: f64,
        deadline: Option<Instant>,
        collect_debug: bool,
    ) -> (Option<BidderSeatBid>, Vec<ExchangeError>) {
        let (outbound, mut errs) = self.adapter.make_requests(request);
        if outbound.is_empty() {
            return (None, errs);
        }

        let calls = join_all(
            outbound
                .iter()
                .map(|data| async move { (data, self.do_request(data, deadline).await) }),
        )
        .await;

        let mut seat = BidderSeatBid::default();
        for (data, result) in calls {
            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    if collect_debug {
                        seat.http_calls.push(call_trace(data, None));
                    }
                    errs.push(err);
                    continue;
                }
            };
            if collect_debug {
                seat.http_calls.push(call_trace(data, Some(&response)));
            }
            match response.status_code {
                204 => continue,
                200 => {}
                400 => {
                    errs.push(ExchangeError::BadInput(format!(
                        "the bidder rejected our request as invalid (status 400): {}",
                        truncate_body(&response.body),
                    )));
                    continue;
                }
                status => {
                    errs.push(ExchangeError::BadServerResponse(format!(
                        "unexpected status code {status}: {}",
                        truncate_body(&response.body),
                    )));
                    continue;
                }
            }

            let (parsed, bid_errs) = self.adapter.make_bids(request, data, &response);
            errs.extend(bid_errs);
            let Some(parsed) = parsed else {
                continue;
            };
            if let Some(currency) = parsed.currency {
                if seat.currency.is_empty() {
                    seat.currency = currency;
                } else if seat.currency != currency {
                    errs.push(ExchangeError::BadServerResponse(format!(
                        "bidder {name} declared conflicting currencies {} and {currency}",
                        seat.currency,
                    )));
                    continue;
                }
            }
            for mut typed in parsed.bids {
                typed.bid.price *= bid_adjustment;
                seat.bids.push(typed);
            }
        }
        (Some(seat), errs)
    }
}

fn call_trace(data: &RequestData, response: Option<&ResponseData>) -> ExtHttpCall {
    ExtHttpCall {
        uri: data.uri.clone(),
        requestbody: String::from_utf8_lossy(&data.body).into_owned(),
        responsebody: response
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .unwrap_or_default(),
        status: response.map(|r| r.status_code).unwrap_or_default(),
    }
}

/// Error messages quote the response body, bounded so a misbehaving bidder
/// cannot blow up the response extension.
fn truncate_body(body: &Bytes) -> String {
    const LIMIT: usize = 256;
    let text = String::from_utf8_lossy(body);
    if text.len() <= LIMIT {
        text.into_owned()
    } else {
        format!("{}...", &text[..LIMIT])
    }
}
