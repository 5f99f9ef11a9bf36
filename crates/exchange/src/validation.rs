//! Structural and currency checks applied to every adapter result before it
//! reaches the auction.

use {
    crate::{bidder::BidderSeatBid, bidder::TypedBid, error::ExchangeError},
    model::currency,
};

const DEFAULT_CURRENCY: &str = "USD";

/// Excises invalid bids from the seat and returns one error per exclusion.
/// A failed currency check discards the whole seat with a single error.
pub fn validate_seat(seat: &mut BidderSeatBid, allowed_currencies: &[String]) -> Vec<ExchangeError> {
    if seat.bids.is_empty() {
        return Vec::new();
    }

    if let Err(err) = validate_currency(allowed_currencies, &seat.currency) {
        seat.bids.clear();
        return vec![err];
    }

    let mut errs = Vec::new();
    seat.bids.retain(|bid| match validate_bid(bid) {
        Ok(()) => true,
        Err(err) => {
            errs.push(err);
            false
        }
    });
    errs
}

/// An empty seat currency counts as USD. The declared currency must be a
/// real ISO-4217 code and present in the request's allow-list (which
/// defaults to USD when empty); comparison is case-insensitive.
pub fn validate_currency(allowed: &[String], bid_currency: &str) -> Result<(), ExchangeError> {
    let bid_currency = if bid_currency.is_empty() {
        DEFAULT_CURRENCY
    } else {
        bid_currency
    };
    let Some(normalized) = currency::parse_iso(bid_currency) else {
        return Err(ExchangeError::BadServerResponse(format!(
            "bid currency {bid_currency:?} is not a valid ISO-4217 code"
        )));
    };

    let default_allowed = [DEFAULT_CURRENCY.to_string()];
    let allowed = if allowed.is_empty() { &default_allowed[..] } else { allowed };
    if allowed.iter().any(|code| code.eq_ignore_ascii_case(&normalized)) {
        return Ok(());
    }
    Err(ExchangeError::BadServerResponse(format!(
        "bid currency is not allowed, was {normalized:?}, wants one of {allowed:?}"
    )))
}

fn validate_bid(typed: &TypedBid) -> Result<(), ExchangeError> {
    let bid = &typed.bid;
    if bid.id.is_empty() {
        return Err(ExchangeError::BadServerResponse(
            "bid missing required field 'id'".to_string(),
        ));
    }
    if bid.impid.is_empty() {
        return Err(ExchangeError::BadServerResponse(format!(
            "bid {:?} missing required field 'impid'",
            bid.id
        )));
    }
    if bid.price <= 0.0 {
        return Err(ExchangeError::BadServerResponse(format!(
            "bid {:?} does not contain a positive 'price'",
            bid.id
        )));
    }
    if bid.crid.is_empty() {
        return Err(ExchangeError::BadServerResponse(format!(
            "bid {:?} missing creative ID",
            bid.id
        )));
    }
    Ok(())
}
