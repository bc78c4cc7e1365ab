//! Database row types matching `migrations/0001_init.sql`.
//! Enum columns are stored as text and parsed back into domain types on load.

use chrono::{DateTime, Utc};

use crate::error::{AppError, ValidationError};
use crate::types::{
    Bonus, FakeSeller, Listing, PercentageAlert, TelegramSettings, ThresholdAlert, WatchlistEntry,
};

#[derive(Debug, sqlx::FromRow)]
pub struct ListingRow {
    pub id: i64,
    pub item_name: String,
    pub category: Option<String>,
    pub server_name: String,
    pub seller_name: String,
    pub quantity: i64,
    pub price_won: i64,
    pub price_yang: i64,
    pub seen_at: DateTime<Utc>,
}

impl ListingRow {
    pub fn into_listing(self, bonuses: Vec<Bonus>) -> Listing {
        Listing {
            id: self.id,
            item_name: self.item_name,
            category: self.category,
            server: self.server_name,
            seller_name: self.seller_name,
            quantity: self.quantity,
            price_won: self.price_won,
            price_yang: self.price_yang,
            seen_at: self.seen_at,
            bonuses,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct BonusRow {
    pub listing_id: i64,
    pub bonus_name: String,
    pub bonus_value: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct WatchlistRow {
    pub id: i64,
    pub query: String,
    pub server_name: String,
    pub is_active: bool,
    pub interval_minutes: i64,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<WatchlistRow> for WatchlistEntry {
    fn from(r: WatchlistRow) -> Self {
        WatchlistEntry {
            id: r.id,
            query: r.query,
            server_name: r.server_name,
            is_active: r.is_active,
            interval_minutes: r.interval_minutes,
            last_scraped_at: r.last_scraped_at,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ThresholdAlertRow {
    pub id: i64,
    pub watchlist_id: i64,
    pub price_threshold: i64,
    pub price_type: String,
    pub direction: String,
    pub is_active: bool,
    pub condition_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ThresholdAlertRow> for ThresholdAlert {
    type Error = AppError;

    fn try_from(r: ThresholdAlertRow) -> Result<Self, Self::Error> {
        let corrupt = |e: ValidationError| AppError::Corrupt(format!("price_alerts row {}: {e}", r.id));
        Ok(ThresholdAlert {
            id: r.id,
            watchlist_id: r.watchlist_id,
            price_threshold: r.price_threshold,
            price_type: r.price_type.parse().map_err(corrupt)?,
            direction: r.direction.parse().map_err(corrupt)?,
            is_active: r.is_active,
            last_triggered_at: r.last_triggered_at,
            condition_active: r.condition_active,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PercentageAlertRow {
    pub id: i64,
    pub watchlist_id: i64,
    pub metric_a: String,
    pub metric_b: String,
    pub threshold_pct: f64,
    pub is_active: bool,
    pub condition_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PercentageAlertRow> for PercentageAlert {
    type Error = AppError;

    fn try_from(r: PercentageAlertRow) -> Result<Self, Self::Error> {
        let corrupt = |e: ValidationError| AppError::Corrupt(format!("percentage_alerts row {}: {e}", r.id));
        Ok(PercentageAlert {
            id: r.id,
            watchlist_id: r.watchlist_id,
            metric_a: r.metric_a.parse().map_err(corrupt)?,
            metric_b: r.metric_b.parse().map_err(corrupt)?,
            threshold_pct: r.threshold_pct,
            is_active: r.is_active,
            last_triggered_at: r.last_triggered_at,
            condition_active: r.condition_active,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct FakeSellerRow {
    pub id: i64,
    pub seller_name: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<FakeSellerRow> for FakeSeller {
    fn from(r: FakeSellerRow) -> Self {
        FakeSeller {
            id: r.id,
            seller_name: r.seller_name,
            reason: r.reason,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TelegramSettingsRow {
    pub id: i64,
    pub bot_token: String,
    pub chat_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TelegramSettingsRow> for TelegramSettings {
    fn from(r: TelegramSettingsRow) -> Self {
        TelegramSettings {
            id: r.id,
            bot_token: r.bot_token,
            chat_id: r.chat_id,
            is_active: r.is_active,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct TopItemRow {
    pub item_name: String,
    pub listing_count: i64,
    pub min_total_price_yang: i64,
}
