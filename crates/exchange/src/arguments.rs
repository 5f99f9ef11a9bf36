//! Command line arguments for the exchange binary.

use {
    anyhow::{anyhow, Context, Result},
    model::BidderName,
    std::{net::SocketAddr, path::PathBuf, time::Duration},
    url::Url,
};

#[derive(Debug, clap::Parser)]
pub struct Arguments {
    #[clap(long, env, default_value = "info,exchange=debug,stored_requests=debug")]
    pub log_filter: String,

    /// Address the auction and admin endpoints bind to.
    #[clap(long, env, default_value = "0.0.0.0:8000")]
    pub bind_address: SocketAddr,

    /// Address the metrics and liveness endpoints bind to.
    #[clap(long, env, default_value = "0.0.0.0:9586")]
    pub metrics_address: SocketAddr,

    /// Bidders to run, as repeated `name=endpoint` pairs, e.g.
    /// `--bidders appnexus=https://ib.adnxs.com/openrtb2`.
    #[clap(long, env, value_parser = parse_bidder, value_delimiter = ',')]
    pub bidders: Vec<(BidderName, Url)>,

    /// Directory of `<id>.json` stored request files.
    #[clap(long, env, default_value = "stored_requests")]
    pub stored_requests_path: PathBuf,

    /// Reload stored request files when they change on disk.
    #[clap(long, env)]
    pub watch_stored_requests: bool,

    /// Enable the `POST/DELETE /stored_requests/:id` admin endpoint.
    #[clap(long, env)]
    pub stored_requests_admin: bool,

    /// Postgres connection string for stored-request change notifications.
    #[clap(long, env)]
    pub stored_requests_db: Option<String>,

    /// Notification channel carrying stored-request changes.
    #[clap(long, env, default_value = "stored_request_updates")]
    pub stored_requests_db_channel: String,

    /// In-memory stored-request cache budget in bytes; 0 disables caching.
    #[clap(long, env, default_value = "524288")]
    pub stored_requests_cache_size: usize,

    /// Cache entry lifetime in seconds; negative values disable expiry.
    #[clap(long, env, default_value = "-1")]
    pub stored_requests_cache_ttl: i64,

    /// Endpoint of the external creative cache (prebid-cache compatible).
    #[clap(long, env)]
    pub cache_endpoint: Option<Url>,

    /// Expected time for one creative-cache put; reserved out of the auction
    /// deadline when bid caching is requested.
    #[clap(long, env, default_value = "50", value_parser = duration_from_millis)]
    pub cache_expected_time: Duration,

    /// Auction budget for requests without `tmax`.
    #[clap(long, env, default_value = "300", value_parser = duration_from_millis)]
    pub default_auction_timeout: Duration,

    /// Let bidders participate when the request carries no consent string.
    #[clap(long, env)]
    pub usersync_if_ambiguous: bool,

    /// App ids rejected before the auction runs.
    #[clap(long, env, value_delimiter = ',')]
    pub blacklisted_apps: Vec<String>,

    /// Publisher account ids rejected before the auction runs.
    #[clap(long, env, value_delimiter = ',')]
    pub blacklisted_accounts: Vec<String>,
}

fn parse_bidder(value: &str) -> Result<(BidderName, Url)> {
    let (name, endpoint) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=endpoint, got {value:?}"))?;
    if name.is_empty() {
        return Err(anyhow!("bidder name must not be empty"));
    }
    let endpoint = endpoint
        .parse()
        .with_context(|| format!("invalid endpoint for bidder {name:?}"))?;
    Ok((BidderName::from(name), endpoint))
}

fn duration_from_millis(value: &str) -> Result<Duration> {
    Ok(Duration::from_millis(value.parse()?))
}

impl Arguments {
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.stored_requests_cache_ttl >= 0)
            .then(|| Duration::from_secs(self.stored_requests_cache_ttl as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bidder_pairs_parse() {
        let (name, endpoint) = parse_bidder("appnexus=https://ib.adnxs.com/openrtb2").unwrap();
        assert_eq!(name.as_str(), "appnexus");
        assert_eq!(endpoint.as_str(), "https://ib.adnxs.com/openrtb2");
        assert!(parse_bidder("appnexus").is_err());
        assert!(parse_bidder("=https://x").is_err());
        assert!(parse_bidder("a=not a url").is_err());
    }
}
