use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::{
    BonusRow, FakeSellerRow, ListingRow, PercentageAlertRow, TelegramSettingsRow,
    ThresholdAlertRow, TopItemRow, WatchlistRow,
};
use crate::error::{AppError, Result, ValidationError};
use crate::types::{
    AlertRef, Bonus, FakeSeller, Listing, NewFakeSeller, NewPercentageAlert, NewTelegramSettings,
    NewThresholdAlert, NewWatchlistEntry, PercentageAlert, TelegramSettings, ThresholdAlert,
    WatchlistEntry,
};

/// SQLite caps bound parameters per statement; stay well below it.
const BONUS_LOOKUP_CHUNK: usize = 500;

const LISTING_COLUMNS: &str =
    "id, item_name, category, server_name, seller_name, quantity, price_won, price_yang, seen_at";
const WATCHLIST_COLUMNS: &str =
    "id, query, server_name, is_active, interval_minutes, last_scraped_at, created_at";
const THRESHOLD_COLUMNS: &str = "id, watchlist_id, price_threshold, price_type, direction, \
     is_active, condition_active, last_triggered_at, created_at";
const TELEGRAM_COLUMNS: &str = "id, bot_token, chat_id, is_active, created_at, updated_at";
const PERCENTAGE_COLUMNS: &str = "id, watchlist_id, metric_a, metric_b, threshold_pct, \
     is_active, condition_active, last_triggered_at, created_at";

fn map_unique(e: sqlx::Error, what: impl FnOnce() -> String) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(what()),
        _ => AppError::Database(e),
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// Row order for stored listings. Ties fall back to insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingSort {
    #[default]
    Newest,
    Oldest,
    PriceAsc,
    PriceDesc,
}

impl ListingSort {
    fn order_by(self) -> &'static str {
        match self {
            ListingSort::Newest => " ORDER BY seen_at DESC, id DESC",
            ListingSort::Oldest => " ORDER BY seen_at ASC, id ASC",
            ListingSort::PriceAsc => " ORDER BY total_price_yang ASC, id DESC",
            ListingSort::PriceDesc => " ORDER BY total_price_yang DESC, id DESC",
        }
    }
}

impl FromStr for ListingSort {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(ListingSort::Newest),
            "price_asc" => Ok(ListingSort::PriceAsc),
            "price_desc" => Ok(ListingSort::PriceDesc),
            _ => Err(ValidationError::UnknownSort(s.to_string())),
        }
    }
}

/// Filter for stored listings. `item_name` is a substring match unless
/// `item_exact` is set.
#[derive(Debug, Default, Clone)]
pub struct ListingQuery {
    pub item_name: Option<String>,
    pub item_exact: bool,
    pub server: Option<String>,
    pub sort: ListingSort,
    pub offset: i64,
    pub limit: Option<i64>,
}

/// `LIKE` pattern matching `needle` anywhere, with its wildcards taken literally.
fn contains_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for ch in needle.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

/// Append one scan's listings and their bonuses in a single transaction.
pub async fn insert_listings(pool: &SqlitePool, listings: &[Listing]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    for l in listings {
        let listing_id = sqlx::query(
            r#"
            INSERT INTO listings (
                item_name, category, server_name, seller_name,
                quantity, price_won, price_yang, total_price_yang, seen_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(l.item_name.as_str())
        .bind(l.category.as_deref())
        .bind(l.server.as_str())
        .bind(l.seller_name.as_str())
        .bind(l.quantity)
        .bind(l.price_won)
        .bind(l.price_yang)
        .bind(l.total_price_yang())
        .bind(l.seen_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, bonus) in l.bonuses.iter().enumerate() {
            sqlx::query(
                "INSERT INTO listing_bonuses (listing_id, position, bonus_name, bonus_value) VALUES (?, ?, ?, ?)",
            )
            .bind(listing_id)
            .bind(position as i64)
            .bind(bonus.name.as_str())
            .bind(bonus.value.as_str())
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;
    Ok(listings.len())
}

pub async fn fetch_listings(pool: &SqlitePool, q: &ListingQuery) -> Result<Vec<Listing>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {LISTING_COLUMNS} FROM listings WHERE 1 = 1"));
    match &q.item_name {
        Some(name) if q.item_exact => {
            qb.push(" AND item_name = ").push_bind(name.clone());
        }
        Some(name) => {
            qb.push(" AND item_name LIKE ")
                .push_bind(contains_pattern(name))
                .push(" ESCAPE '\\'");
        }
        None => {}
    }
    if let Some(server) = &q.server {
        qb.push(" AND server_name = ").push_bind(server.clone());
    }
    qb.push(q.sort.order_by());
    // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
    if q.limit.is_some() || q.offset > 0 {
        qb.push(" LIMIT ").push_bind(q.limit.unwrap_or(-1));
        qb.push(" OFFSET ").push_bind(q.offset);
    }

    let rows = qb.build_query_as::<ListingRow>().fetch_all(pool).await?;
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut bonuses = fetch_bonuses(pool, &ids).await?;

    Ok(rows
        .into_iter()
        .map(|r| {
            let b = bonuses.remove(&r.id).unwrap_or_default();
            r.into_listing(b)
        })
        .collect())
}

async fn fetch_bonuses(pool: &SqlitePool, listing_ids: &[i64]) -> Result<HashMap<i64, Vec<Bonus>>> {
    let mut out: HashMap<i64, Vec<Bonus>> = HashMap::new();
    for chunk in listing_ids.chunks(BONUS_LOOKUP_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT listing_id, bonus_name, bonus_value FROM listing_bonuses WHERE listing_id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in chunk {
            sep.push_bind(*id);
        }
        sep.push_unseparated(") ORDER BY listing_id, position");

        let rows = qb.build_query_as::<BonusRow>().fetch_all(pool).await?;
        for row in rows {
            out.entry(row.listing_id).or_default().push(Bonus {
                name: row.bonus_name,
                value: row.bonus_value,
            });
        }
    }
    Ok(out)
}

/// Items with the most stored listings.
pub async fn top_items(pool: &SqlitePool, limit: i64) -> Result<Vec<TopItemRow>> {
    let rows = sqlx::query_as::<_, TopItemRow>(
        r#"
        SELECT item_name,
               COUNT(*) AS listing_count,
               MIN(total_price_yang) AS min_total_price_yang
        FROM listings
        GROUP BY item_name
        ORDER BY listing_count DESC, item_name ASC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Server names that have at least one stored listing.
pub async fn servers_with_listings(pool: &SqlitePool) -> Result<Vec<String>> {
    let names: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT server_name FROM listings ORDER BY server_name")
            .fetch_all(pool)
            .await?;
    Ok(names)
}

// ---------------------------------------------------------------------------
// Watchlist
// ---------------------------------------------------------------------------

pub async fn list_watchlist(pool: &SqlitePool) -> Result<Vec<WatchlistEntry>> {
    let rows = sqlx::query_as::<_, WatchlistRow>(&format!(
        "SELECT {WATCHLIST_COLUMNS} FROM watchlist ORDER BY created_at DESC, id DESC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(WatchlistEntry::from).collect())
}

pub async fn create_watchlist_entry(
    pool: &SqlitePool,
    new: &NewWatchlistEntry,
    now: DateTime<Utc>,
) -> Result<WatchlistEntry> {
    let row = sqlx::query_as::<_, WatchlistRow>(&format!(
        "INSERT INTO watchlist (query, server_name, is_active, interval_minutes, created_at) \
         VALUES (?, ?, 1, ?, ?) RETURNING {WATCHLIST_COLUMNS}"
    ))
    .bind(new.query.as_str())
    .bind(new.server_name.as_str())
    .bind(new.interval_minutes)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        map_unique(e, || format!("'{}' on {} is already watched", new.query, new.server_name))
    })?;
    Ok(row.into())
}

/// Delete an entry. Its alerts go with it (`ON DELETE CASCADE`).
pub async fn delete_watchlist_entry(pool: &SqlitePool, id: i64) -> Result<()> {
    let res = sqlx::query("DELETE FROM watchlist WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("watchlist entry {id}")));
    }
    Ok(())
}

pub async fn toggle_watchlist_entry(pool: &SqlitePool, id: i64) -> Result<WatchlistEntry> {
    sqlx::query_as::<_, WatchlistRow>(&format!(
        "UPDATE watchlist SET is_active = NOT is_active WHERE id = ? RETURNING {WATCHLIST_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .map(WatchlistEntry::from)
    .ok_or_else(|| AppError::NotFound(format!("watchlist entry {id}")))
}

pub async fn mark_scraped(pool: &SqlitePool, id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE watchlist SET last_scraped_at = ? WHERE id = ?")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert the first watchlist entry when the table is still empty.
/// Returns whether a row was written.
pub async fn seed_watchlist(
    pool: &SqlitePool,
    new: &NewWatchlistEntry,
    now: DateTime<Utc>,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM watchlist")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(false);
    }
    create_watchlist_entry(pool, new, now).await?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Threshold alerts
// ---------------------------------------------------------------------------

pub async fn list_threshold_alerts(pool: &SqlitePool) -> Result<Vec<ThresholdAlert>> {
    sqlx::query_as::<_, ThresholdAlertRow>(&format!(
        "SELECT {THRESHOLD_COLUMNS} FROM price_alerts ORDER BY id"
    ))
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(ThresholdAlert::try_from)
    .collect()
}

pub async fn create_threshold_alert(
    pool: &SqlitePool,
    new: &NewThresholdAlert,
    now: DateTime<Utc>,
) -> Result<ThresholdAlert> {
    ensure_entry_exists(pool, new.watchlist_id).await?;
    sqlx::query_as::<_, ThresholdAlertRow>(&format!(
        "INSERT INTO price_alerts (watchlist_id, price_threshold, price_type, direction, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING {THRESHOLD_COLUMNS}"
    ))
    .bind(new.watchlist_id)
    .bind(new.price_threshold)
    .bind(new.price_type.to_string())
    .bind(new.direction.to_string())
    .bind(now)
    .fetch_one(pool)
    .await?
    .try_into()
}

pub async fn delete_threshold_alert(pool: &SqlitePool, id: i64) -> Result<()> {
    let res = sqlx::query("DELETE FROM price_alerts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("price alert {id}")));
    }
    Ok(())
}

/// Flip `is_active`. The condition state is reset so a re-enabled alert fires
/// on the next breach instead of waiting for a clear.
pub async fn toggle_threshold_alert(pool: &SqlitePool, id: i64) -> Result<ThresholdAlert> {
    sqlx::query_as::<_, ThresholdAlertRow>(&format!(
        "UPDATE price_alerts SET is_active = NOT is_active, condition_active = 0 \
         WHERE id = ? RETURNING {THRESHOLD_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("price alert {id}")))?
    .try_into()
}

// ---------------------------------------------------------------------------
// Percentage alerts
// ---------------------------------------------------------------------------

pub async fn list_percentage_alerts(pool: &SqlitePool) -> Result<Vec<PercentageAlert>> {
    sqlx::query_as::<_, PercentageAlertRow>(&format!(
        "SELECT {PERCENTAGE_COLUMNS} FROM percentage_alerts ORDER BY id"
    ))
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(PercentageAlert::try_from)
    .collect()
}

pub async fn create_percentage_alert(
    pool: &SqlitePool,
    new: &NewPercentageAlert,
    now: DateTime<Utc>,
) -> Result<PercentageAlert> {
    ensure_entry_exists(pool, new.watchlist_id).await?;
    sqlx::query_as::<_, PercentageAlertRow>(&format!(
        "INSERT INTO percentage_alerts (watchlist_id, metric_a, metric_b, threshold_pct, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING {PERCENTAGE_COLUMNS}"
    ))
    .bind(new.watchlist_id)
    .bind(new.metric_a.to_string())
    .bind(new.metric_b.to_string())
    .bind(new.threshold_pct)
    .bind(now)
    .fetch_one(pool)
    .await?
    .try_into()
}

pub async fn delete_percentage_alert(pool: &SqlitePool, id: i64) -> Result<()> {
    let res = sqlx::query("DELETE FROM percentage_alerts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("percentage alert {id}")));
    }
    Ok(())
}

pub async fn toggle_percentage_alert(pool: &SqlitePool, id: i64) -> Result<PercentageAlert> {
    sqlx::query_as::<_, PercentageAlertRow>(&format!(
        "UPDATE percentage_alerts SET is_active = NOT is_active, condition_active = 0 \
         WHERE id = ? RETURNING {PERCENTAGE_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("percentage alert {id}")))?
    .try_into()
}

// ---------------------------------------------------------------------------
// Alert state (both kinds)
// ---------------------------------------------------------------------------

/// Persist an edge transition. `triggered_at` is only set on false → true;
/// a clear keeps the previous trigger time.
pub async fn record_alert_state(
    pool: &SqlitePool,
    alert: AlertRef,
    condition_active: bool,
    triggered_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let (table, id) = alert_table(alert);
    sqlx::query(&format!(
        "UPDATE {table} SET condition_active = ?, \
         last_triggered_at = COALESCE(?, last_triggered_at) WHERE id = ?"
    ))
    .bind(condition_active)
    .bind(triggered_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_alerts(pool: &SqlitePool, alerts: &[AlertRef]) -> Result<u64> {
    let mut removed = 0;
    for alert in alerts {
        let (table, id) = alert_table(*alert);
        removed += sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
            .bind(id)
            .execute(pool)
            .await?
            .rows_affected();
    }
    Ok(removed)
}

fn alert_table(alert: AlertRef) -> (&'static str, i64) {
    match alert {
        AlertRef::Threshold(id) => ("price_alerts", id),
        AlertRef::Percentage(id) => ("percentage_alerts", id),
    }
}

async fn ensure_entry_exists(pool: &SqlitePool, watchlist_id: i64) -> Result<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM watchlist WHERE id = ?")
        .bind(watchlist_id)
        .fetch_optional(pool)
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("watchlist entry {watchlist_id}")))
}

// ---------------------------------------------------------------------------
// Fake sellers
// ---------------------------------------------------------------------------

pub async fn list_fake_sellers(pool: &SqlitePool) -> Result<Vec<FakeSeller>> {
    let rows = sqlx::query_as::<_, FakeSellerRow>(
        "SELECT id, seller_name, reason, created_at FROM fake_sellers ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(FakeSeller::from).collect())
}

pub async fn create_fake_seller(
    pool: &SqlitePool,
    new: &NewFakeSeller,
    now: DateTime<Utc>,
) -> Result<FakeSeller> {
    let row = sqlx::query_as::<_, FakeSellerRow>(
        "INSERT INTO fake_sellers (seller_name, reason, created_at) VALUES (?, ?, ?) \
         RETURNING id, seller_name, reason, created_at",
    )
    .bind(new.seller_name.as_str())
    .bind(new.reason.as_deref())
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| map_unique(e, || format!("seller '{}' is already flagged", new.seller_name)))?;
    Ok(row.into())
}

/// Remove a flagged seller, returning the deleted record.
pub async fn delete_fake_seller(pool: &SqlitePool, id: i64) -> Result<FakeSeller> {
    sqlx::query_as::<_, FakeSellerRow>(
        "DELETE FROM fake_sellers WHERE id = ? RETURNING id, seller_name, reason, created_at",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .map(FakeSeller::from)
    .ok_or_else(|| AppError::NotFound(format!("fake seller {id}")))
}

// ---------------------------------------------------------------------------
// Telegram settings (single row, id = 1)
// ---------------------------------------------------------------------------

pub async fn get_telegram_settings(pool: &SqlitePool) -> Result<Option<TelegramSettings>> {
    let row = sqlx::query_as::<_, TelegramSettingsRow>(&format!(
        "SELECT {TELEGRAM_COLUMNS} FROM telegram_settings WHERE id = 1"
    ))
    .fetch_optional(pool)
    .await?;
    Ok(row.map(TelegramSettings::from))
}

/// Create or replace the bot credentials. A new row starts enabled; an
/// existing row keeps its on/off state.
pub async fn save_telegram_settings(
    pool: &SqlitePool,
    new: &NewTelegramSettings,
    now: DateTime<Utc>,
) -> Result<TelegramSettings> {
    let row = sqlx::query_as::<_, TelegramSettingsRow>(&format!(
        "INSERT INTO telegram_settings (id, bot_token, chat_id, is_active, created_at, updated_at) \
         VALUES (1, ?, ?, 1, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET \
             bot_token = excluded.bot_token, \
             chat_id = excluded.chat_id, \
             updated_at = excluded.updated_at \
         RETURNING {TELEGRAM_COLUMNS}"
    ))
    .bind(new.bot_token.as_str())
    .bind(new.chat_id.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

/// Insert credentials only when none are stored yet. Returns whether a row was written.
pub async fn seed_telegram_settings(
    pool: &SqlitePool,
    new: &NewTelegramSettings,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO telegram_settings (id, bot_token, chat_id, is_active, created_at, updated_at) \
         VALUES (1, ?, ?, 1, ?, ?) ON CONFLICT (id) DO NOTHING",
    )
    .bind(new.bot_token.as_str())
    .bind(new.chat_id.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn toggle_telegram_settings(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> Result<TelegramSettings> {
    sqlx::query_as::<_, TelegramSettingsRow>(&format!(
        "UPDATE telegram_settings SET is_active = NOT is_active, updated_at = ? \
         WHERE id = 1 RETURNING {TELEGRAM_COLUMNS}"
    ))
    .bind(now)
    .fetch_optional(pool)
    .await?
    .map(TelegramSettings::from)
    .ok_or_else(|| AppError::NotFound("telegram settings".to_string()))
}
