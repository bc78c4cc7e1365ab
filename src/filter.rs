//! Tier and seller filtering for raw listing sets.
//!
//! One pass yields both the display projection (every tier-matching listing,
//! flagged when its seller is blacklisted) and the priced subset that feeds
//! aggregation and alert evaluation.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ValidationError;
use crate::types::Listing;

static TIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+(\d+)").expect("valid tier pattern"));

/// Upgrade level from the first "+N" anywhere in an item name. `None` = material/base item.
pub fn extract_tier(item_name: &str) -> Option<u32> {
    let caps = TIER_PATTERN.captures(item_name)?;
    // Absurdly long digit runs still denote an upgraded item.
    Some(caps[1].parse::<u32>().unwrap_or(u32::MAX))
}

// ---------------------------------------------------------------------------
// Tier selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TierSelector {
    #[default]
    All,
    /// Items without any "+N".
    Material,
    /// +0 to +6
    Low,
    /// +7 to +8
    High,
    /// +9 only
    Nine,
    /// +10 and above
    TenPlus,
}

impl TierSelector {
    /// Every selector except `All`. They partition any listing set.
    pub const PARTITION: [TierSelector; 5] = [
        TierSelector::Material,
        TierSelector::Low,
        TierSelector::High,
        TierSelector::Nine,
        TierSelector::TenPlus,
    ];

    pub fn matches(self, tier: Option<u32>) -> bool {
        match (self, tier) {
            (TierSelector::All, _) => true,
            (TierSelector::Material, t) => t.is_none(),
            (TierSelector::Low, Some(n)) => n <= 6,
            (TierSelector::High, Some(n)) => (7..=8).contains(&n),
            (TierSelector::Nine, Some(n)) => n == 9,
            (TierSelector::TenPlus, Some(n)) => n >= 10,
            (_, None) => false,
        }
    }
}

impl std::fmt::Display for TierSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TierSelector::All => "ALL",
            TierSelector::Material => "MATERIAL",
            TierSelector::Low => "0-6",
            TierSelector::High => "7-8",
            TierSelector::Nine => "9",
            TierSelector::TenPlus => "10+",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TierSelector {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(TierSelector::All),
            "MATERIAL" => Ok(TierSelector::Material),
            "0-6" => Ok(TierSelector::Low),
            "7-8" => Ok(TierSelector::High),
            "9" => Ok(TierSelector::Nine),
            "10+" => Ok(TierSelector::TenPlus),
            _ => Err(ValidationError::UnknownTier(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Seller blacklist
// ---------------------------------------------------------------------------

/// Seller names whose listings never enter price statistics. Exact, case-sensitive match.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    sellers: HashSet<String>,
}

impl Blacklist {
    pub fn new<I, S>(sellers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { sellers: sellers.into_iter().map(Into::into).collect() }
    }

    pub fn contains(&self, seller_name: &str) -> bool {
        self.sellers.contains(seller_name)
    }

    pub fn len(&self) -> usize {
        self.sellers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sellers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct AnnotatedListing<'a> {
    pub listing: &'a Listing,
    pub excluded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FilteredListings<'a> {
    /// Tier-matching listings in input order, blacklisted ones flagged.
    pub annotated: Vec<AnnotatedListing<'a>>,
}

impl<'a> FilteredListings<'a> {
    /// The subset allowed into statistics and alert evaluation.
    pub fn priced(&self) -> Vec<&'a Listing> {
        self.annotated
            .iter()
            .filter(|a| !a.excluded)
            .map(|a| a.listing)
            .collect()
    }

    pub fn excluded_count(&self) -> usize {
        self.annotated.iter().filter(|a| a.excluded).count()
    }

    pub fn len(&self) -> usize {
        self.annotated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotated.is_empty()
    }
}

pub fn filter_visible<'a>(
    listings: &'a [Listing],
    blacklist: &Blacklist,
    tier: TierSelector,
) -> FilteredListings<'a> {
    let annotated = listings
        .iter()
        .filter(|l| tier.matches(l.tier()))
        .map(|listing| AnnotatedListing {
            listing,
            excluded: blacklist.contains(&listing.seller_name),
        })
        .collect();
    FilteredListings { annotated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn listing(name: &str, seller: &str) -> Listing {
        Listing {
            id: 0,
            item_name: name.to_string(),
            category: None,
            server: "Chimera".to_string(),
            seller_name: seller.to_string(),
            quantity: 1,
            price_won: 0,
            price_yang: 1_000,
            seen_at: Utc::now(),
            bonuses: Vec::new(),
        }
    }

    #[test]
    fn tier_extraction() {
        assert_eq!(extract_tier("Vollmondschwert+9"), Some(9));
        assert_eq!(extract_tier("Drachenschild +12 (rare)"), Some(12));
        assert_eq!(extract_tier("Schwert+0"), Some(0));
        assert_eq!(extract_tier("Segen Schriftrolle"), None);
        assert_eq!(extract_tier("Item + 5"), None);
        // first occurrence wins
        assert_eq!(extract_tier("Ring+3 Set+8"), Some(3));
    }

    #[test]
    fn selector_ranges_are_inclusive() {
        assert!(TierSelector::Low.matches(Some(0)));
        assert!(TierSelector::Low.matches(Some(6)));
        assert!(!TierSelector::Low.matches(Some(7)));
        assert!(TierSelector::High.matches(Some(7)));
        assert!(TierSelector::High.matches(Some(8)));
        assert!(TierSelector::Nine.matches(Some(9)));
        assert!(TierSelector::TenPlus.matches(Some(10)));
        assert!(TierSelector::TenPlus.matches(Some(250)));
        assert!(TierSelector::Material.matches(None));
        assert!(!TierSelector::Material.matches(Some(0)));
    }

    #[test]
    fn tiers_partition_the_listing_set() {
        let listings: Vec<Listing> = [
            "Stein", "Schwert+0", "Schwert+4", "Schwert+6", "Schwert+7", "Schwert+8",
            "Schwert+9", "Schwert+10", "Schwert+15", "Holz", "Ring+3 Set+8",
        ]
        .iter()
        .map(|n| listing(n, "alice"))
        .collect();
        let blacklist = Blacklist::default();

        let all = filter_visible(&listings, &blacklist, TierSelector::All).len();
        let parts: usize = TierSelector::PARTITION
            .iter()
            .map(|&t| filter_visible(&listings, &blacklist, t).len())
            .sum();
        assert_eq!(all, listings.len());
        assert_eq!(all, parts);
    }

    #[test]
    fn blacklisted_sellers_are_flagged_not_dropped() {
        let listings = vec![
            listing("Schwert+9", "alice"),
            listing("Schwert+9", "scammer"),
            listing("Schwert+9", "Scammer"),
        ];
        let blacklist = Blacklist::new(["scammer"]);

        let filtered = filter_visible(&listings, &blacklist, TierSelector::All);
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered.excluded_count(), 1);
        let priced = filtered.priced();
        assert_eq!(priced.len(), 2);
        assert!(priced.iter().all(|l| l.seller_name != "scammer"));
    }

    #[test]
    fn tier_and_seller_filters_compose() {
        let listings = vec![
            listing("Schwert+9", "scammer"),
            listing("Schwert+9", "alice"),
            listing("Schwert+7", "alice"),
        ];
        let blacklist = Blacklist::new(["scammer"]);

        let filtered = filter_visible(&listings, &blacklist, TierSelector::Nine);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.priced().len(), 1);
    }

    #[test]
    fn selector_parsing() {
        assert_eq!("10+".parse::<TierSelector>().unwrap(), TierSelector::TenPlus);
        assert_eq!("material".parse::<TierSelector>().unwrap(), TierSelector::Material);
        assert_eq!("ALL".parse::<TierSelector>().unwrap(), TierSelector::All);
        assert!(matches!(
            "11-12".parse::<TierSelector>(),
            Err(ValidationError::UnknownTier(_))
        ));
        for t in TierSelector::PARTITION {
            assert_eq!(t.to_string().parse::<TierSelector>().unwrap(), t);
        }
    }
}
