//! Auction orchestration core of the header-bidding exchange.
//!
//! A bid request comes in, the [`cleaner`] projects it per bidder, the
//! [`exchange`] fans those projections out to the [`bidder`]s under the
//! request deadline, validates and auctions whatever comes back, decorates
//! winners with [`targeting`] keywords (caching creatives through the
//! [`cache_client`] when asked to) and assembles one OpenRTB response.

pub mod adapters;
pub mod api;
pub mod arguments;
pub mod auction;
pub mod bidder;
pub mod cache_client;
pub mod cleaner;
pub mod error;
pub mod exchange;
pub mod oracles;
pub mod run;
pub mod targeting;
pub mod validation;

pub use {error::ExchangeError, exchange::Exchange};
