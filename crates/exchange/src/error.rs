//! Error taxonomy for the auction path.
//!
//! Every error carries a stable numeric code that is surfaced to clients in
//! the response extension, so bidders and publishers can tell apart their
//! own malformed input from adapter misbehavior.

use {metrics::AdapterError, model::ext::ExtBidderError, thiserror::Error};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// The bidder did not respond within the auction deadline.
    #[error("timed out waiting for a response")]
    Timeout,
    /// The client sent something unusable.
    #[error("{0}")]
    BadInput(String),
    #[error("the account is blacklisted")]
    BlacklistedAcct,
    /// An adapter returned an unparseable or unusable response.
    #[error("{0}")]
    BadServerResponse(String),
    #[error("the app is blacklisted")]
    BlacklistedApp,
    /// Transport-level failure talking to the bidder.
    #[error("{0}")]
    FailedToRequestBids(String),
    #[error("{0}")]
    Unknown(String),
}

impl ExchangeError {
    pub fn code(&self) -> i32 {
        match self {
            ExchangeError::Timeout => 1,
            ExchangeError::BadInput(_) => 2,
            ExchangeError::BlacklistedAcct => 3,
            ExchangeError::BadServerResponse(_) => 4,
            ExchangeError::BlacklistedApp => 5,
            ExchangeError::FailedToRequestBids(_) => 6,
            ExchangeError::Unknown(_) => 999,
        }
    }

    /// The adapter-error metric label this error counts towards.
    pub fn metric_label(&self) -> AdapterError {
        match self {
            ExchangeError::Timeout => AdapterError::Timeout,
            ExchangeError::BadInput(_) => AdapterError::BadInput,
            ExchangeError::BadServerResponse(_) => AdapterError::BadServerResponse,
            ExchangeError::FailedToRequestBids(_) => AdapterError::FailedToRequestBids,
            _ => AdapterError::Unknown,
        }
    }

    pub fn to_ext(&self) -> ExtBidderError {
        ExtBidderError {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Converts a batch of errors into response-extension form.
pub fn errors_to_ext(errors: &[ExchangeError]) -> Vec<ExtBidderError> {
    errors.iter().map(ExchangeError::to_ext).collect()
}
