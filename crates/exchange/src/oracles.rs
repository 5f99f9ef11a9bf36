//! Contracts for the subsystems the auction consumes but does not own: GDPR
//! consent evaluation and the user-sync cookie store.

use model::BidderName;

/// Decides whether personal information may be forwarded to a vendor.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Permissions: Send + Sync {
    async fn allow_personal_info(&self, bidder_vendor_id: u16, consent: &str) -> anyhow::Result<bool>;
}

/// Finds the user's id for a specific bidder, typically backed by the uids
/// cookie.
#[cfg_attr(test, mockall::automock)]
pub trait IdFetcher: Send + Sync {
    fn get_id(&self, bidder: &BidderName) -> Option<String>;
}

/// Permission oracle for deployments that do not enforce GDPR.
pub struct AlwaysAllow;

#[async_trait::async_trait]
impl Permissions for AlwaysAllow {
    async fn allow_personal_info(&self, _bidder_vendor_id: u16, _consent: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Id fetcher that never finds an id, for requests without a sync cookie.
pub struct NoSyncs;

impl IdFetcher for NoSyncs {
    fn get_id(&self, _bidder: &BidderName) -> Option<String> {
        None
    }
}
