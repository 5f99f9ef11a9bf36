//! OpenRTB 2.5 protocol types shared by the exchange services.
//!
//! The structs here mirror the wire format: optional fields are skipped when
//! serializing, unknown fields are preserved through `extra` passthrough maps
//! so that a request projected for one bidder still carries everything the
//! publisher sent.

pub mod currency;
pub mod ext;
pub mod request;
pub mod response;

pub use request::{
    App, Audio, Banner, BidRequest, Device, Format, Imp, Native, Publisher, Regs, Site, User, Video,
};
pub use response::{Bid, BidResponse, SeatBid, NO_BID_INVALID_REQUEST};

use serde::{Deserialize, Serialize};

/// Name under which a bidder participates in an auction. This is the seat
/// reported in the response, which may be an alias of the adapter actually
/// invoked.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidderName(String);

impl BidderName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BidderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BidderName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for BidderName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Media type of a markup object returned by an adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidType {
    Banner,
    Video,
    Audio,
    Native,
}

impl BidType {
    pub const ALL: [BidType; 4] = [BidType::Banner, BidType::Video, BidType::Audio, BidType::Native];

    pub fn as_str(&self) -> &'static str {
        match self {
            BidType::Banner => "banner",
            BidType::Video => "video",
            BidType::Audio => "audio",
            BidType::Native => "native",
        }
    }
}

impl std::fmt::Display for BidType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
