//! The capability interface every bidder adapter implements.
//!
//! An adapter is a pure request/response translator: it renders outbound
//! HTTP requests from a cleaned bid request and parses raw responses back
//! into typed bids. The HTTP transport itself, deadline handling and price
//! adjustments live in [`crate::bidder`], so adapters stay trivially
//! testable.

pub mod ortb;

use {
    crate::{bidder::TypedBid, error::ExchangeError},
    bytes::Bytes,
    model::BidRequest,
    reqwest::header::HeaderMap,
};

/// One outbound HTTP request an adapter wants issued.
#[derive(Clone, Debug)]
pub struct RequestData {
    pub method: String,
    pub uri: String,
    pub body: Bytes,
    pub headers: HeaderMap,
}

/// Raw result of one outbound call.
#[derive(Clone, Debug)]
pub struct ResponseData {
    pub status_code: u16,
    pub body: Bytes,
}

/// Typed bids parsed out of one adapter response.
#[derive(Debug, Default)]
pub struct AdapterResponse {
    pub bids: Vec<TypedBid>,
    /// Currency the bids are denominated in; `None` means the adapter's
    /// response did not declare one.
    pub currency: Option<String>,
}

pub trait Adapter: Send + Sync {
    /// Renders the outbound requests for a bid request. Multiple requests
    /// are allowed when the bidder's API requires impression splitting.
    fn make_requests(&self, request: &BidRequest) -> (Vec<RequestData>, Vec<ExchangeError>);

    /// Parses one raw `200` response into bids. Non-200 statuses never reach
    /// this method.
    fn make_bids(
        &self,
        request: &BidRequest,
        outbound: &RequestData,
        response: &ResponseData,
    ) -> (Option<AdapterResponse>, Vec<ExchangeError>);
}
