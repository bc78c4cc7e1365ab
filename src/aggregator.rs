use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::BOTTOM_PERCENT;
use crate::types::{Listing, PricePoint};

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Bucket width in seconds. Must be positive.
    pub granularity_secs: i64,
    /// Buckets with fewer listings than this report `avg_bottom20_price = None`.
    pub min_bottom_sample: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { granularity_secs: 60, min_bottom_sample: 1 }
    }
}

/// Turns priced listings into price-history points. Input must already be
/// stripped of blacklisted sellers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceAggregator {
    cfg: AggregatorConfig,
}

impl PriceAggregator {
    pub fn new(cfg: AggregatorConfig) -> Self {
        let granularity_secs = cfg.granularity_secs.max(1);
        Self { cfg: AggregatorConfig { granularity_secs, ..cfg } }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_of(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.cfg.granularity_secs;
        let start = ts.timestamp().div_euclid(width) * width;
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }

    /// Aggregate one bucket. `None` for an empty bucket; zero-filled points are never produced.
    pub fn aggregate<'a, I>(&self, bucket: DateTime<Utc>, listings: I) -> Option<PricePoint>
    where
        I: IntoIterator<Item = &'a Listing>,
    {
        let prices: Vec<f64> = listings.into_iter().map(Listing::unit_price).collect();
        self.summarize(bucket, prices)
    }

    /// Bucket listings by `seen_at` and aggregate each bucket, oldest first.
    pub fn history<'a, I>(&self, listings: I) -> Vec<PricePoint>
    where
        I: IntoIterator<Item = &'a Listing>,
    {
        let mut buckets: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
        for listing in listings {
            buckets
                .entry(self.bucket_of(listing.seen_at))
                .or_default()
                .push(listing.unit_price());
        }
        buckets
            .into_iter()
            .filter_map(|(bucket, prices)| self.summarize(bucket, prices))
            .collect()
    }

    fn summarize(&self, bucket: DateTime<Utc>, mut prices: Vec<f64>) -> Option<PricePoint> {
        if prices.is_empty() {
            return None;
        }
        prices.sort_by(f64::total_cmp);

        let count = prices.len();
        let min_unit_price = prices[0];
        let avg_unit_price = prices.iter().sum::<f64>() / count as f64;

        let avg_bottom20_price = if count < self.cfg.min_bottom_sample {
            None
        } else {
            let take = bottom_count(count);
            Some(prices[..take].iter().sum::<f64>() / take as f64)
        };

        Some(PricePoint {
            timestamp: bucket,
            avg_unit_price,
            min_unit_price,
            avg_bottom20_price,
            total_listings: count,
        })
    }
}

/// ⌈count × 20%⌉, never below one listing.
fn bottom_count(count: usize) -> usize {
    (count * BOTTOM_PERCENT).div_ceil(100).max(1)
}
