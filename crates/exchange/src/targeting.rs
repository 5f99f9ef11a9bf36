//! Ad-server targeting keywords for winning bids.

use {
    crate::{
        auction::{lookup, Auction},
        bidder::BidderSeatBid,
    },
    model::{
        ext::{ExtRequestPrebid, PriceGranularity},
        Bid, BidderName,
    },
    std::collections::{BTreeMap, HashMap},
};

/// Ad servers cap keyword length; longer keys are silently truncated.
pub const MAX_KEY_LENGTH: usize = 20;

pub const HB_PB_KEY: &str = "hb_pb";
pub const HB_BIDDER_KEY: &str = "hb_bidder";
pub const HB_SIZE_KEY: &str = "hb_size";
pub const HB_CACHE_ID_KEY: &str = "hb_cache_id";
pub const HB_VAST_CACHE_KEY: &str = "hb_uuid";
pub const HB_DEAL_KEY: &str = "hb_deal";
pub const HB_ENV_KEY: &str = "hb_env";
pub const HB_ENV_APP_VALUE: &str = "mobile-app";

/// Targeting configuration resolved from the request extension.
pub struct TargetData {
    pub price_granularity: PriceGranularity,
    pub include_winners: bool,
    pub include_bidder_keys: bool,
    pub include_cache_bids: bool,
    pub include_cache_vast: bool,
}

impl TargetData {
    /// `None` when the request did not ask for targeting.
    pub fn from_prebid(prebid: &ExtRequestPrebid) -> Option<Self> {
        let targeting = prebid.targeting.as_ref()?;
        let cache = prebid.cache.as_ref();
        Some(Self {
            price_granularity: targeting.pricegranularity.clone(),
            include_winners: targeting.includewinners,
            include_bidder_keys: targeting.includebidderkeys,
            include_cache_bids: cache.is_some_and(|cache| cache.bids.is_some()),
            include_cache_vast: cache.is_some_and(|cache| cache.vastxml.is_some()),
        })
    }

    /// Writes the keyword maps onto each bidder's best bid per impression.
    pub fn set_targeting(
        &self,
        auction: &Auction,
        adapter_bids: &mut HashMap<BidderName, BidderSeatBid>,
        is_app: bool,
    ) {
        for (impid, per_bidder) in &auction.winning_bids_by_bidder {
            let overall_winner = &auction.winning_bids[impid];
            for (bidder, key) in per_bidder {
                let is_overall_winner = key == overall_winner;
                let mut targets = BTreeMap::new();
                {
                    let Some(typed) = lookup(adapter_bids, key) else {
                        continue;
                    };
                    if let Some(bucket) = auction.rounded_prices.get(key) {
                        self.add_keys(&mut targets, HB_PB_KEY, bucket, bidder, is_overall_winner);
                    }
                    self.add_keys(&mut targets, HB_BIDDER_KEY, bidder.as_str(), bidder, is_overall_winner);
                    if let Some(size) = hb_size(&typed.bid) {
                        self.add_keys(&mut targets, HB_SIZE_KEY, &size, bidder, is_overall_winner);
                    }
                    if let Some(cache_id) = auction.cache_ids.get(key) {
                        self.add_keys(&mut targets, HB_CACHE_ID_KEY, cache_id, bidder, is_overall_winner);
                    }
                    if let Some(vast_id) = auction.vast_cache_ids.get(key) {
                        self.add_keys(&mut targets, HB_VAST_CACHE_KEY, vast_id, bidder, is_overall_winner);
                    }
                    if let Some(deal) = &typed.bid.dealid {
                        self.add_keys(&mut targets, HB_DEAL_KEY, deal, bidder, is_overall_winner);
                    }
                    if is_app {
                        self.add_keys(&mut targets, HB_ENV_KEY, HB_ENV_APP_VALUE, bidder, is_overall_winner);
                    }
                }
                if let Some(seat) = adapter_bids.get_mut(&key.0) {
                    if let Some(typed) = seat.bids.get_mut(key.1) {
                        typed.bid_targets = targets;
                    }
                }
            }
        }
    }

    fn add_keys(
        &self,
        targets: &mut BTreeMap<String, String>,
        key: &str,
        value: &str,
        bidder: &BidderName,
        overall_winner: bool,
    ) {
        if self.include_bidder_keys {
            targets.insert(bidder_key(key, bidder.as_str()), value.to_string());
        }
        if self.include_winners && overall_winner {
            targets.insert(truncate_key(key.to_string()), value.to_string());
        }
    }
}

fn bidder_key(key: &str, bidder: &str) -> String {
    truncate_key(format!("{key}_{bidder}"))
}

fn truncate_key(mut key: String) -> String {
    key.truncate(MAX_KEY_LENGTH);
    key
}

fn hb_size(bid: &Bid) -> Option<String> {
    match (bid.w, bid.h) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{w}x{h}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::bidder::TypedBid,
        model::{ext::ExtRequestTargeting, BidType},
    };

    fn target_data() -> TargetData {
        TargetData {
            price_granularity: PriceGranularity::medium(),
            include_winners: true,
            include_bidder_keys: true,
            include_cache_bids: false,
            include_cache_vast: false,
        }
    }

    fn seat(id: &str, price: f64) -> BidderSeatBid {
        BidderSeatBid {
            bids: vec![TypedBid::new(
                Bid {
                    id: id.to_string(),
                    impid: "1".to_string(),
                    price,
                    crid: "c".to_string(),
                    w: Some(300),
                    h: Some(250),
                    ..Default::default()
                },
                BidType::Banner,
            )],
            currency: "USD".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn winner_gets_both_key_families() {
        let mut adapter_bids = HashMap::from([
            (BidderName::from("alpha"), seat("a", 2.0)),
            (BidderName::from("beta"), seat("b", 1.0)),
        ]);
        let mut auction = Auction::new(&adapter_bids);
        auction.set_rounded_prices(&adapter_bids, &PriceGranularity::medium());
        target_data().set_targeting(&auction, &mut adapter_bids, false);

        let alpha = &adapter_bids[&BidderName::from("alpha")].bids[0].bid_targets;
        assert_eq!(alpha["hb_pb"], "2.00");
        assert_eq!(alpha["hb_bidder"], "alpha");
        assert_eq!(alpha["hb_size"], "300x250");
        assert_eq!(alpha["hb_pb_alpha"], "2.00");

        let beta = &adapter_bids[&BidderName::from("beta")].bids[0].bid_targets;
        assert!(!beta.contains_key("hb_bidder"));
        assert_eq!(beta["hb_bidder_beta"], "beta");
        assert_eq!(beta["hb_pb_beta"], "1.00");
    }

    #[test]
    fn winner_keys_can_be_disabled() {
        let mut adapter_bids = HashMap::from([(BidderName::from("alpha"), seat("a", 2.0))]);
        let mut auction = Auction::new(&adapter_bids);
        auction.set_rounded_prices(&adapter_bids, &PriceGranularity::medium());
        let data = TargetData {
            include_winners: false,
            ..target_data()
        };
        data.set_targeting(&auction, &mut adapter_bids, false);
        let targets = &adapter_bids[&BidderName::from("alpha")].bids[0].bid_targets;
        assert!(!targets.contains_key("hb_bidder"));
        assert_eq!(targets["hb_bidder_alpha"], "alpha");
    }

    #[test]
    fn long_bidder_names_truncate_to_twenty_chars() {
        let name = "averylongbiddername";
        let mut adapter_bids = HashMap::from([(BidderName::from(name), seat("a", 2.0))]);
        let mut auction = Auction::new(&adapter_bids);
        auction.set_rounded_prices(&adapter_bids, &PriceGranularity::medium());
        target_data().set_targeting(&auction, &mut adapter_bids, false);
        let targets = &adapter_bids[&BidderName::from(name)].bids[0].bid_targets;
        assert!(targets.keys().all(|key| key.len() <= MAX_KEY_LENGTH));
        assert!(targets.contains_key("hb_bidder_averylongb"));
    }

    #[test]
    fn app_requests_emit_hb_env() {
        let mut adapter_bids = HashMap::from([(BidderName::from("alpha"), seat("a", 2.0))]);
        let mut auction = Auction::new(&adapter_bids);
        auction.set_rounded_prices(&adapter_bids, &PriceGranularity::medium());
        target_data().set_targeting(&auction, &mut adapter_bids, true);
        let targets = &adapter_bids[&BidderName::from("alpha")].bids[0].bid_targets;
        assert_eq!(targets["hb_env"], HB_ENV_APP_VALUE);
    }

    #[test]
    fn deal_ids_are_surfaced() {
        let mut with_deal = seat("a", 2.0);
        with_deal.bids[0].bid.dealid = Some("deal-9".to_string());
        let mut adapter_bids = HashMap::from([(BidderName::from("alpha"), with_deal)]);
        let mut auction = Auction::new(&adapter_bids);
        auction.set_rounded_prices(&adapter_bids, &PriceGranularity::medium());
        target_data().set_targeting(&auction, &mut adapter_bids, false);
        let targets = &adapter_bids[&BidderName::from("alpha")].bids[0].bid_targets;
        assert_eq!(targets["hb_deal"], "deal-9");
    }

    #[test]
    fn from_prebid_requires_targeting_block() {
        assert!(TargetData::from_prebid(&ExtRequestPrebid::default()).is_none());
        let prebid = ExtRequestPrebid {
            targeting: Some(ExtRequestTargeting::default()),
            ..Default::default()
        };
        let data = TargetData::from_prebid(&prebid).unwrap();
        assert!(data.include_winners);
        assert!(!data.include_cache_bids);
    }
}
