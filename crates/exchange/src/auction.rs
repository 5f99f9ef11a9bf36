//! Per-impression winner selection and creative-cache orchestration.

use {
    crate::{
        bidder::BidderSeatBid,
        cache_client::{CacheClient, Cacheable, PayloadType},
    },
    model::{ext::PriceGranularity, BidType, BidderName},
    std::{cmp::Ordering, collections::HashMap},
};

/// Identifies one bid as (seat, index into the seat's bid list).
pub type BidKey = (BidderName, usize);

pub struct Auction {
    /// Overall winner per impression id.
    pub winning_bids: HashMap<String, BidKey>,
    /// Best bid per bidder per impression id, for bidder-suffixed targeting.
    pub winning_bids_by_bidder: HashMap<String, HashMap<BidderName, BidKey>>,
    /// Price-bucket strings, computed once before caching and targeting.
    pub rounded_prices: HashMap<BidKey, String>,
    pub cache_ids: HashMap<BidKey, String>,
    pub vast_cache_ids: HashMap<BidKey, String>,
}

struct Candidate {
    key: BidKey,
    price: f64,
    bid_id: String,
}

impl Auction {
    pub fn new(adapter_bids: &HashMap<BidderName, BidderSeatBid>) -> Self {
        let mut candidates: HashMap<String, Vec<Candidate>> = HashMap::new();
        for (bidder, seat) in adapter_bids {
            for (index, typed) in seat.bids.iter().enumerate() {
                candidates.entry(typed.bid.impid.clone()).or_default().push(Candidate {
                    key: (bidder.clone(), index),
                    price: typed.bid.price,
                    bid_id: typed.bid.id.clone(),
                });
            }
        }

        let mut winning_bids = HashMap::new();
        let mut winning_bids_by_bidder: HashMap<String, HashMap<BidderName, BidKey>> = HashMap::new();
        for (impid, mut bids) in candidates {
            // Highest price first; equal prices settle deterministically on
            // (bidder, bid id).
            bids.sort_by(|a, b| {
                b.price
                    .partial_cmp(&a.price)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.key.0.cmp(&b.key.0))
                    .then_with(|| a.bid_id.cmp(&b.bid_id))
            });
            let per_bidder = winning_bids_by_bidder.entry(impid.clone()).or_default();
            for candidate in &bids {
                per_bidder
                    .entry(candidate.key.0.clone())
                    .or_insert_with(|| candidate.key.clone());
            }
            winning_bids.insert(impid, bids[0].key.clone());
        }

        Self {
            winning_bids,
            winning_bids_by_bidder,
            rounded_prices: HashMap::new(),
            cache_ids: HashMap::new(),
            vast_cache_ids: HashMap::new(),
        }
    }

    pub fn set_rounded_prices(
        &mut self,
        adapter_bids: &HashMap<BidderName, BidderSeatBid>,
        granularity: &PriceGranularity,
    ) {
        self.rounded_prices.clear();
        for per_bidder in self.winning_bids_by_bidder.values() {
            for key in per_bidder.values() {
                if let Some(typed) = lookup(adapter_bids, key) {
                    self.rounded_prices
                        .insert(key.clone(), granularity.bucket(typed.bid.price));
                }
            }
        }
    }

    /// Issues one batched put for the winning creatives and records the
    /// returned ids. Failures leave the id maps untouched, which downstream
    /// turns into absent targeting keys.
    pub async fn do_cache(
        &mut self,
        adapter_bids: &HashMap<BidderName, BidderSeatBid>,
        cache: &dyn CacheClient,
        cache_bids: bool,
        cache_vast: bool,
    ) {
        if !cache_bids && !cache_vast {
            return;
        }

        enum Target {
            Bid(BidKey),
            Vast(BidKey),
        }

        // Deterministic put order keeps ids stable for identical auctions.
        let mut winners: Vec<(&String, &BidKey)> = self.winning_bids.iter().collect();
        winners.sort_by_key(|(impid, _)| impid.clone());

        let mut entries = Vec::new();
        let mut targets = Vec::new();
        for (_, key) in winners {
            let Some(typed) = lookup(adapter_bids, key) else {
                continue;
            };
            if cache_bids {
                match encode_bid(&typed.bid) {
                    Ok(value) => {
                        entries.push(Cacheable {
                            payload_type: PayloadType::Json,
                            value,
                        });
                        targets.push(Target::Bid(key.clone()));
                    }
                    Err(err) => tracing::warn!(?err, "failed to encode winning bid for caching"),
                }
            }
            if cache_vast && typed.bid_type == BidType::Video {
                if let Some(adm) = &typed.bid.adm {
                    entries.push(Cacheable {
                        payload_type: PayloadType::Xml,
                        value: serde_json::Value::String(adm.clone()),
                    });
                    targets.push(Target::Vast(key.clone()));
                }
            }
        }
        if entries.is_empty() {
            return;
        }

        let ids = cache.put_many(entries).await;
        for (target, id) in targets.into_iter().zip(ids) {
            let Some(id) = id else { continue };
            match target {
                Target::Bid(key) => {
                    self.cache_ids.insert(key, id);
                }
                Target::Vast(key) => {
                    self.vast_cache_ids.insert(key, id);
                }
            }
        }
    }
}

// Via a string because a bid's opaque ext doesn't pass through the Value
// serializer.
fn encode_bid(bid: &model::Bid) -> serde_json::Result<serde_json::Value> {
    serde_json::from_str(&serde_json::to_string(bid)?)
}

/// Resolves a [`BidKey`] back to its bid.
pub fn lookup<'a>(
    adapter_bids: &'a HashMap<BidderName, BidderSeatBid>,
    key: &BidKey,
) -> Option<&'a crate::bidder::TypedBid> {
    adapter_bids.get(&key.0)?.bids.get(key.1)
}
