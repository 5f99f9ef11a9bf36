//! Prebid extension envelope.
//!
//! These types describe the `ext.prebid` block of requests, bids and
//! responses. Everything the exchange does not understand stays raw.

use {
    crate::BidType,
    serde::{Deserialize, Serialize},
    serde_json::{value::RawValue, Value},
    std::collections::{BTreeMap, HashMap},
};

/// Parsed `request.ext`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtRequest {
    #[serde(default)]
    pub prebid: ExtRequestPrebid,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtRequestPrebid {
    /// Bidder name aliases: requests for the key are served by the adapter
    /// registered under the value, with the seat reported under the key.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub aliases: HashMap<String, String>,
    /// Multipliers applied to every bid price of the keyed bidder.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub bidadjustmentfactors: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<ExtRequestPrebidCache>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targeting: Option<ExtRequestTargeting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storedrequest: Option<ExtStoredRequest>,
}

/// Server-side request fragment reference, resolved through the
/// stored-request subsystem before the auction runs.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtStoredRequest {
    pub id: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtRequestPrebidCache {
    /// Present (even empty) when the winning bid bodies should be cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bids: Option<ExtRequestPrebidCacheBids>,
    /// Present (even empty) when winning video creatives should be cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vastxml: Option<ExtRequestPrebidCacheVast>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtRequestPrebidCacheBids {}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtRequestPrebidCacheVast {}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExtRequestTargeting {
    #[serde(default)]
    pub pricegranularity: PriceGranularity,
    #[serde(default = "default_true")]
    pub includewinners: bool,
    #[serde(default = "default_true")]
    pub includebidderkeys: bool,
}

impl Default for ExtRequestTargeting {
    fn default() -> Self {
        Self {
            pricegranularity: PriceGranularity::default(),
            includewinners: true,
            includebidderkeys: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One half-open price interval `[previous max, max)` stepped by `increment`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GranularityRange {
    pub max: f64,
    pub increment: f64,
}

/// Rounding scheme mapping a price to an ad-server keyword value.
///
/// Accepts either one of the predefined granularity names (`"low"`,
/// `"medium"`/`"med"`, `"high"`, `"auto"`, `"dense"`) or a custom
/// `{precision, ranges}` object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "PriceGranularityRepr")]
pub struct PriceGranularity {
    pub precision: u32,
    pub ranges: Vec<GranularityRange>,
}

impl Default for PriceGranularity {
    fn default() -> Self {
        Self::medium()
    }
}

impl PriceGranularity {
    pub fn low() -> Self {
        Self {
            precision: 2,
            ranges: vec![GranularityRange { max: 5.0, increment: 0.5 }],
        }
    }

    pub fn medium() -> Self {
        Self {
            precision: 2,
            ranges: vec![GranularityRange { max: 20.0, increment: 0.1 }],
        }
    }

    pub fn high() -> Self {
        Self {
            precision: 2,
            ranges: vec![GranularityRange { max: 20.0, increment: 0.01 }],
        }
    }

    pub fn auto() -> Self {
        Self {
            precision: 2,
            ranges: vec![
                GranularityRange { max: 5.0, increment: 0.05 },
                GranularityRange { max: 10.0, increment: 0.1 },
                GranularityRange { max: 20.0, increment: 0.5 },
            ],
        }
    }

    pub fn dense() -> Self {
        Self {
            precision: 2,
            ranges: vec![
                GranularityRange { max: 3.0, increment: 0.01 },
                GranularityRange { max: 8.0, increment: 0.05 },
                GranularityRange { max: 20.0, increment: 0.5 },
            ],
        }
    }

    /// Rounds `price` down to its bucket boundary and renders it with the
    /// configured precision. Prices at or above the top range clamp to the
    /// top boundary.
    pub fn bucket(&self, price: f64) -> String {
        let precision = self.precision as usize;
        let top = self.ranges.last().map(|r| r.max).unwrap_or(0.0);
        if price >= top {
            return format!("{top:.precision$}");
        }
        let mut previous_max = 0.0;
        for range in &self.ranges {
            if price < range.max {
                // The tolerance keeps prices that sit exactly on a boundary
                // (1.50 with increment 0.10) from rounding into the bucket
                // below due to binary representation of the increment.
                let steps = ((price - previous_max) / range.increment + 1e-9).floor();
                let stepped = previous_max + steps * range.increment;
                return format!("{stepped:.precision$}");
            }
            previous_max = range.max;
        }
        format!("{top:.precision$}")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PriceGranularityRepr {
    Named(String),
    Custom {
        #[serde(default = "default_precision")]
        precision: u32,
        ranges: Vec<GranularityRange>,
    },
}

fn default_precision() -> u32 {
    2
}

impl TryFrom<PriceGranularityRepr> for PriceGranularity {
    type Error = String;

    fn try_from(repr: PriceGranularityRepr) -> Result<Self, Self::Error> {
        match repr {
            PriceGranularityRepr::Named(name) => match name.as_str() {
                "low" => Ok(Self::low()),
                "med" | "medium" => Ok(Self::medium()),
                "high" => Ok(Self::high()),
                "auto" => Ok(Self::auto()),
                "dense" => Ok(Self::dense()),
                other => Err(format!("unknown price granularity: {other}")),
            },
            PriceGranularityRepr::Custom { precision, ranges } => {
                if ranges.is_empty() {
                    return Err("custom price granularity needs at least one range".to_string());
                }
                Ok(Self { precision, ranges })
            }
        }
    }
}

/// Parsed `user.ext`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExtUser {
    /// GDPR consent string as supplied by the publisher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

/// `bid.ext` written by the exchange on every returned bid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtBid {
    /// Whatever the adapter attached to the bid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidder: Option<Box<RawValue>>,
    pub prebid: ExtBidPrebid,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtBidPrebid {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub targeting: BTreeMap<String, String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub bid_type: Option<BidType>,
}

/// `seatbid.ext` carrying the adapter's opaque seat-level extension.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtSeatBid {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidder: Option<Box<RawValue>>,
}

/// `response.ext` assembled by the exchange.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtBidResponse {
    /// Per-bidder non-fatal errors; request-level errors go under `"prebid"`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub errors: HashMap<String, Vec<ExtBidderError>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub responsetimemillis: HashMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<ExtResponseDebug>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtBidderError {
    pub code: i32,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtResponseDebug {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub httpcalls: HashMap<String, Vec<ExtHttpCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolvedrequest: Option<Value>,
}

/// Trace of one outbound adapter call, exposed when `test == 1`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtHttpCall {
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requestbody: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub responsebody: String,
    #[serde(default)]
    pub status: u16,
}
