use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::{DEFAULT_INTERVAL_MINUTES, YANG_PER_WON};
use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bonus {
    pub name: String,
    /// Raw value text as emitted by the marketplace; may be empty when the
    /// number is embedded in `name`.
    #[serde(default)]
    pub value: String,
}

/// One observed marketplace offer. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub id: i64,
    pub item_name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub server: String,
    pub seller_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub price_won: i64,
    #[serde(default)]
    pub price_yang: i64,
    #[serde(default = "Utc::now")]
    pub seen_at: DateTime<Utc>,
    #[serde(default)]
    pub bonuses: Vec<Bonus>,
}

fn default_quantity() -> i64 {
    1
}

impl Listing {
    /// Line total in yang: both denominations folded together.
    pub fn total_price_yang(&self) -> i64 {
        self.price_won
            .saturating_mul(YANG_PER_WON)
            .saturating_add(self.price_yang)
    }

    /// Per-unit price in yang. Quantities below 1 count as 1.
    pub fn unit_price(&self) -> f64 {
        self.total_price_yang() as f64 / self.quantity.max(1) as f64
    }

    pub fn tier(&self) -> Option<u32> {
        crate::filter::extract_tier(&self.item_name)
    }
}

// ---------------------------------------------------------------------------
// Price points
// ---------------------------------------------------------------------------

/// Aggregate over the priced listings of one bucket. Always derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub avg_unit_price: f64,
    pub min_unit_price: f64,
    pub avg_bottom20_price: Option<f64>,
    pub total_listings: usize,
}

// ---------------------------------------------------------------------------
// Alert vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    #[default]
    Yang,
    Won,
}

impl Currency {
    /// Convert a yang amount into this denomination.
    pub fn from_yang(self, yang: f64) -> f64 {
        match self {
            Currency::Yang => yang,
            Currency::Won => yang / YANG_PER_WON as f64,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Currency::Yang => "yang",
            Currency::Won => "won",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yang" => Ok(Currency::Yang),
            "won" => Ok(Currency::Won),
            other => Err(ValidationError::UnknownCurrency(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Below,
    Above,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Below => write!(f, "below"),
            Direction::Above => write!(f, "above"),
        }
    }
}

impl FromStr for Direction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "below" => Ok(Direction::Below),
            "above" => Ok(Direction::Above),
            other => Err(ValidationError::UnknownDirection(other.to_string())),
        }
    }
}

/// Named statistic of a `PricePoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "avg_bottom20")]
    AvgBottom20,
    #[serde(rename = "avg")]
    Avg,
}

impl Metric {
    pub fn resolve(self, point: &PricePoint) -> Option<f64> {
        match self {
            Metric::Min => Some(point.min_unit_price),
            Metric::AvgBottom20 => point.avg_bottom20_price,
            Metric::Avg => Some(point.avg_unit_price),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::Min => "Minimum",
            Metric::AvgBottom20 => "Bottom-20% average",
            Metric::Avg => "Average",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Metric::Min => "min",
            Metric::AvgBottom20 => "avg_bottom20",
            Metric::Avg => "avg",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Metric {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(Metric::Min),
            "avg_bottom20" => Ok(Metric::AvgBottom20),
            "avg" => Ok(Metric::Avg),
            other => Err(ValidationError::UnknownMetric(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Watchlist and alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchlistEntry {
    pub id: i64,
    pub query: String,
    pub server_name: String,
    pub is_active: bool,
    pub interval_minutes: i64,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdAlert {
    pub id: i64,
    pub watchlist_id: i64,
    pub price_threshold: i64,
    pub price_type: Currency,
    pub direction: Direction,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Whether the condition held at the last evaluation. The alert only fires
    /// on a false → true transition.
    pub condition_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentageAlert {
    pub id: i64,
    pub watchlist_id: i64,
    pub metric_a: Metric,
    pub metric_b: Metric,
    pub threshold_pct: f64,
    pub is_active: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub condition_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A watchlist entry together with the alerts it owns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEntry {
    #[serde(flatten)]
    pub entry: WatchlistEntry,
    pub alerts: Vec<ThresholdAlert>,
    pub percentage_alerts: Vec<PercentageAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FakeSeller {
    pub id: i64,
    pub seller_name: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bot credentials used for alert delivery. At most one row exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelegramSettings {
    pub id: i64,
    pub bot_token: String,
    pub chat_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A marketplace server the scraper knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub group: &'static str,
}

/// Identity of an alert across both alert kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AlertRef {
    Threshold(i64),
    Percentage(i64),
}

impl std::fmt::Display for AlertRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertRef::Threshold(id) => write!(f, "threshold#{id}"),
            AlertRef::Percentage(id) => write!(f, "percentage#{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validated creation requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NewWatchlistEntry {
    pub query: String,
    pub server_name: String,
    #[serde(default = "default_interval")]
    pub interval_minutes: i64,
}

fn default_interval() -> i64 {
    DEFAULT_INTERVAL_MINUTES
}

impl NewWatchlistEntry {
    pub fn validate(self) -> Result<Self, ValidationError> {
        let query = self.query.trim().to_string();
        let server_name = self.server_name.trim().to_string();
        if query.is_empty() {
            return Err(ValidationError::Empty("query"));
        }
        if server_name.is_empty() {
            return Err(ValidationError::Empty("server_name"));
        }
        if self.interval_minutes <= 0 {
            return Err(ValidationError::NonPositiveInterval(self.interval_minutes));
        }
        Ok(Self { query, server_name, interval_minutes: self.interval_minutes })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewThresholdAlert {
    pub watchlist_id: i64,
    pub price_threshold: i64,
    #[serde(default)]
    pub price_type: Currency,
    #[serde(default)]
    pub direction: Direction,
}

impl NewThresholdAlert {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.price_threshold <= 0 {
            return Err(ValidationError::NonPositiveThreshold(self.price_threshold));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPercentageAlert {
    pub watchlist_id: i64,
    pub metric_a: Metric,
    pub metric_b: Metric,
    pub threshold_pct: f64,
}

impl NewPercentageAlert {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.metric_a == self.metric_b {
            return Err(ValidationError::DuplicateMetric(self.metric_a.to_string()));
        }
        if !self.threshold_pct.is_finite() || self.threshold_pct <= 0.0 {
            return Err(ValidationError::NonPositivePercentage(self.threshold_pct));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFakeSeller {
    pub seller_name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl NewFakeSeller {
    pub fn validate(self) -> Result<Self, ValidationError> {
        let seller_name = self.seller_name.trim().to_string();
        if seller_name.is_empty() {
            return Err(ValidationError::Empty("seller_name"));
        }
        let reason = self.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        Ok(Self { seller_name, reason })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

impl NewTelegramSettings {
    pub fn validate(self) -> Result<Self, ValidationError> {
        let bot_token = self.bot_token.trim().to_string();
        if bot_token.is_empty() {
            return Err(ValidationError::Empty("bot_token"));
        }
        let chat_id = self.chat_id.trim().to_string();
        if chat_id.is_empty() {
            return Err(ValidationError::Empty("chat_id"));
        }
        Ok(Self { bot_token, chat_id })
    }
}

// ---------------------------------------------------------------------------
// Trigger events handed to the notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerDetail {
    Threshold {
        direction: Direction,
        price_type: Currency,
        /// Cheapest priced unit price, in `price_type`.
        comparison_value: f64,
        threshold: i64,
    },
    Percentage {
        metric_a: Metric,
        value_a: f64,
        metric_b: Metric,
        value_b: f64,
        deviation_pct: f64,
        threshold_pct: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredAlert {
    pub alert: AlertRef,
    pub watchlist_id: i64,
    pub query: String,
    pub server_name: String,
    pub detail: TriggerDetail,
    pub triggered_at: DateTime<Utc>,
}
