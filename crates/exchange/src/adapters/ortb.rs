//! Pass-through adapter for demand partners that speak OpenRTB natively.
//!
//! The cleaned request is forwarded as-is; bids are typed by looking up the
//! media type of the impression they reference.

use {
    super::{Adapter, AdapterResponse, RequestData, ResponseData},
    crate::{bidder::TypedBid, error::ExchangeError},
    bytes::Bytes,
    model::{BidRequest, BidResponse, BidType, Imp},
    reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    url::Url,
};

pub struct OrtbAdapter {
    endpoint: Url,
}

impl OrtbAdapter {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint }
    }
}

impl Adapter for OrtbAdapter {
    fn make_requests(&self, request: &BidRequest) -> (Vec<RequestData>, Vec<ExchangeError>) {
        let body = match serde_json::to_vec(request) {
            Ok(body) => body,
            Err(err) => {
                return (
                    Vec::new(),
                    vec![ExchangeError::Unknown(format!("failed to encode bid request: {err}"))],
                )
            }
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json;charset=utf-8"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        (
            vec![RequestData {
                method: "POST".to_string(),
                uri: self.endpoint.to_string(),
                body: Bytes::from(body),
                headers,
            }],
            Vec::new(),
        )
    }

    fn make_bids(
        &self,
        request: &BidRequest,
        _outbound: &RequestData,
        response: &ResponseData,
    ) -> (Option<AdapterResponse>, Vec<ExchangeError>) {
        let parsed: BidResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(err) => {
                return (
                    None,
                    vec![ExchangeError::BadServerResponse(format!("unparseable bid response: {err}"))],
                )
            }
        };

        let mut bids = Vec::new();
        let mut errs = Vec::new();
        for seatbid in parsed.seatbid {
            for bid in seatbid.bid {
                match media_type_for_imp(&request.imp, &bid.impid) {
                    Some(bid_type) => bids.push(TypedBid::new(bid, bid_type)),
                    None => errs.push(ExchangeError::BadServerResponse(format!(
                        "bid \"{}\" references unknown imp \"{}\"",
                        bid.id, bid.impid
                    ))),
                }
            }
        }
        (
            Some(AdapterResponse {
                bids,
                currency: parsed.cur,
            }),
            errs,
        )
    }
}

/// Media type of the impression a bid refers to. For multi-format slots the
/// richest interpretation wins in declaration order.
fn media_type_for_imp(imps: &[Imp], impid: &str) -> Option<BidType> {
    let imp = imps.iter().find(|imp| imp.id == impid)?;
    if imp.banner.is_some() {
        Some(BidType::Banner)
    } else if imp.video.is_some() {
        Some(BidType::Video)
    } else if imp.audio.is_some() {
        Some(BidType::Audio)
    } else if imp.native.is_some() {
        Some(BidType::Native)
    } else {
        None
    }
}
