use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::HTTP_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::types::Listing;

/// Supplies listings for one (query, server) scan. An empty result is valid.
/// Failures are reported to the caller; no retries happen here.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listings(&self, query: &str, server: &str) -> Result<Vec<Listing>>;
}

/// Talks to the external scraper service:
/// `GET {base_url}/listings?query=..&server=..` returning a JSON array of listings
/// (or an object with a `listings` array).
pub struct HttpListingSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpListingSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_listings(&self, query: &str, server: &str) -> Result<Vec<Listing>> {
        let url = format!("{}/listings", self.base_url);
        let resp: serde_json::Value = self
            .client
            .get(&url)
            .query(&[("query", query), ("server", server)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let listings = parse_listings(resp, server)?;
        debug!(query, server, count = listings.len(), "listing source returned");
        Ok(listings)
    }
}

/// Decode a scraper payload. Listings without a positive total price are dropped;
/// listings without a server inherit the requested one.
pub fn parse_listings(payload: serde_json::Value, server: &str) -> Result<Vec<Listing>> {
    let items = match payload {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("listings") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(AppError::ListingSource(
                    "response object has no 'listings' array".to_string(),
                ))
            }
        },
        _ => {
            return Err(AppError::ListingSource(
                "response was neither an array nor an object".to_string(),
            ))
        }
    };

    let mut listings = Vec::with_capacity(items.len());
    let mut rejected = 0usize;
    for item in items {
        let mut listing: Listing = match serde_json::from_value(item) {
            Ok(l) => l,
            Err(e) => {
                rejected += 1;
                debug!("skipping malformed listing: {e}");
                continue;
            }
        };
        if listing.total_price_yang() <= 0 {
            rejected += 1;
            continue;
        }
        if listing.server.is_empty() {
            listing.server = server.to_string();
        }
        listings.push(listing);
    }
    if rejected > 0 {
        warn!(server, rejected, "listing source returned unusable records");
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_array_payload_and_fills_server() {
        let payload = json!([
            {"item_name": "Schwert+9", "seller_name": "a", "price_yang": 500, "quantity": 5},
            {"item_name": "Schwert+9", "seller_name": "b", "price_won": 1, "server": "Lucifer"}
        ]);
        let listings = parse_listings(payload, "Chimera").unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].server, "Chimera");
        assert_eq!(listings[0].unit_price(), 100.0);
        assert_eq!(listings[1].server, "Lucifer");
    }

    #[test]
    fn drops_free_and_malformed_records() {
        let payload = json!({"listings": [
            {"item_name": "Stein", "seller_name": "a", "price_yang": 0},
            {"item_name": "Stein"},
            {"item_name": "Stein", "seller_name": "c", "price_yang": 10}
        ]});
        let listings = parse_listings(payload, "Chimera").unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].seller_name, "c");
    }

    #[test]
    fn rejects_unexpected_shape() {
        assert!(matches!(
            parse_listings(json!("nope"), "Chimera"),
            Err(AppError::ListingSource(_))
        ));
        assert!(matches!(
            parse_listings(json!({"items": []}), "Chimera"),
            Err(AppError::ListingSource(_))
        ));
    }
}
