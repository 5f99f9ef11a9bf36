//! Metric label space for the exchange.
//!
//! Every label has a small closed set of valid values, declared here. The
//! prometheus fabric in [`fabric`] enumerates the Cartesian product of these
//! sets once at startup; everything in this module is just the vocabulary.

pub mod fabric;

pub use fabric::{Metrics, MetricsEngine};

use {model::BidderName, std::collections::HashSet, std::fmt};

macro_rules! label_enum {
    ($(#[$doc:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

label_enum! {
    /// Whether the demand came from a website or a mobile app.
    DemandSource {
        Web => "web",
        App => "app",
    }
}

label_enum! {
    /// Endpoint flavor the request arrived on.
    RequestType {
        Openrtb2Web => "openrtb2-web",
        Openrtb2App => "openrtb2-app",
        Amp => "amp",
    }
}

label_enum! {
    /// Browser family, tracked because Safari's cookie policy changes sync
    /// behavior.
    Browser {
        Safari => "safari",
        Other => "other",
    }
}

label_enum! {
    /// Whether the request carried a user-sync cookie.
    CookieFlag {
        Exists => "exists",
        No => "no",
        Unknown => "unknown",
    }
}

label_enum! {
    /// Outcome of the whole request.
    RequestStatus {
        Ok => "ok",
        BadInput => "badinput",
        Err => "err",
    }
}

label_enum! {
    /// Whether an adapter came back with bids.
    AdapterBid {
        Present => "gotbids",
        None => "nobid",
    }
}

label_enum! {
    /// Classified adapter failure.
    AdapterError {
        BadInput => "badinput",
        BadServerResponse => "badserverresponse",
        Timeout => "timeout",
        FailedToRequestBids => "failedtorequestbids",
        Unknown => "unknown_error",
    }
}

label_enum! {
    /// Whether a received bid carried markup inline.
    MarkupDelivery {
        Adm => "adm",
        Unknown => "unknown",
    }
}

/// Labels shared by all request-scoped metrics.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Labels {
    pub source: DemandSource,
    pub rtype: RequestType,
    pub browser: Browser,
    pub cookie_flag: CookieFlag,
    pub request_status: RequestStatus,
}

/// Labels for adapter-scoped metrics. `adapter_errors` is filled after the
/// adapter call resolves and drives the per-error counters.
#[derive(Clone, Debug)]
pub struct AdapterLabels {
    pub source: DemandSource,
    pub rtype: RequestType,
    pub browser: Browser,
    pub cookie_flag: CookieFlag,
    pub adapter: BidderName,
    pub adapter_bids: AdapterBid,
    pub adapter_errors: HashSet<AdapterError>,
}

impl AdapterLabels {
    pub fn new(labels: &Labels, adapter: BidderName) -> Self {
        Self {
            source: labels.source,
            rtype: labels.rtype,
            browser: labels.browser,
            cookie_flag: labels.cookie_flag,
            adapter,
            adapter_bids: AdapterBid::None,
            adapter_errors: HashSet::new(),
        }
    }
}
