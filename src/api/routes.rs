use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregator::PriceAggregator;
use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::{LatencySnapshot, LatencyStats};
use crate::db::models::TopItemRow;
use crate::config::SERVERS;
use crate::db::repo::{self, ListingQuery, ListingSort};
use crate::detector::BonusCaps;
use crate::error::{AppError, ValidationError};
use crate::filter::{filter_visible, TierSelector};
use crate::notify::TelegramNotifier;
use crate::state::WatchlistStore;
use crate::types::{
    AlertRef, FakeSeller, NewFakeSeller, NewPercentageAlert, NewTelegramSettings,
    NewThresholdAlert, NewWatchlistEntry, PercentageAlert, PricePoint, TelegramSettings,
    ThresholdAlert, TrackedEntry,
};

const DEFAULT_LISTING_LIMIT: i64 = 100;
const MAX_LISTING_LIMIT: i64 = 1000;
const TOP_ITEMS: i64 = 10;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub store: Arc<WatchlistStore>,
    pub caps: Arc<BonusCaps>,
    pub aggregator: PriceAggregator,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub telegram: Arc<TelegramNotifier>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/stats/price-history", get(get_price_history))
        .route("/stats/top-items", get(get_top_items))
        .route("/listings", get(get_listings))
        .route("/servers", get(get_servers))
        .route("/watchlist", get(list_watchlist).post(create_watchlist_entry))
        .route("/watchlist/:id", delete(delete_watchlist_entry))
        .route("/watchlist/:id/toggle", patch(toggle_watchlist_entry))
        .route("/alerts", get(list_alerts).post(create_alert))
        .route("/alerts/:id", delete(delete_alert))
        .route("/alerts/:id/toggle", patch(toggle_alert))
        .route("/percentage-alerts", get(list_percentage_alerts).post(create_percentage_alert))
        .route("/percentage-alerts/:id", delete(delete_percentage_alert))
        .route("/percentage-alerts/:id/toggle", patch(toggle_percentage_alert))
        .route("/fake-sellers", get(list_fake_sellers).post(create_fake_seller))
        .route("/fake-sellers/:id", delete(delete_fake_seller))
        .route("/telegram/settings", get(get_telegram_settings).post(save_telegram_settings))
        .route("/telegram/settings/toggle", patch(toggle_telegram_settings))
        .route("/telegram/test", post(test_telegram))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ListingsQuery {
    pub item_name: Option<String>,
    pub server: Option<String>,
    pub tier: Option<String>,
    pub sort_by: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct PriceHistoryQuery {
    pub item_name: String,
    pub server: Option<String>,
    pub tier: Option<String>,
}

#[derive(Deserialize)]
pub struct AlertsQuery {
    pub watchlist_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct BonusResponse {
    pub name: String,
    pub value: String,
    pub is_max: bool,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub id: i64,
    pub item_name: String,
    pub category: Option<String>,
    pub server: String,
    pub seller_name: String,
    pub quantity: i64,
    pub price_won: i64,
    pub price_yang: i64,
    pub total_price_yang: i64,
    pub unit_price: f64,
    pub tier: Option<u32>,
    pub seen_at: DateTime<Utc>,
    /// Seller is blacklisted; shown but not used in statistics.
    pub excluded: bool,
    pub bonuses: Vec<BonusResponse>,
}

#[derive(Debug, Serialize)]
pub struct ServerResponse {
    pub id: &'static str,
    pub name: &'static str,
    pub group: &'static str,
    /// At least one listing from this server is stored.
    pub has_data: bool,
}

// ---------------------------------------------------------------------------
// Handlers: observability
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(state.health.snapshot())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySnapshot> {
    Json(state.latency.snapshot())
}

// ---------------------------------------------------------------------------
// Handlers: listings and price history
// ---------------------------------------------------------------------------

fn parse_tier(raw: Option<&str>) -> Result<TierSelector, AppError> {
    match raw {
        Some(s) if !s.trim().is_empty() => Ok(s.parse()?),
        _ => Ok(TierSelector::All),
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn get_listings(
    State(state): State<ApiState>,
    Query(params): Query<ListingsQuery>,
) -> Result<Json<Vec<ListingResponse>>, AppError> {
    let tier = parse_tier(params.tier.as_deref())?;
    let sort = match params.sort_by.as_deref() {
        Some(s) if !s.trim().is_empty() => s.parse::<ListingSort>()?,
        _ => ListingSort::Newest,
    };
    let skip = params.skip.unwrap_or(0);
    if skip < 0 {
        return Err(ValidationError::Negative("skip", skip).into());
    }
    let limit = params.limit.unwrap_or(DEFAULT_LISTING_LIMIT).clamp(1, MAX_LISTING_LIMIT);

    // Tiers come from the item name, so a tier-filtered page is cut after filtering.
    let page_in_sql = tier == TierSelector::All;
    let listings = repo::fetch_listings(
        &state.pool,
        &ListingQuery {
            item_name: non_blank(params.item_name),
            item_exact: false,
            server: non_blank(params.server),
            sort,
            offset: if page_in_sql { skip } else { 0 },
            limit: page_in_sql.then_some(limit),
        },
    )
    .await?;
    let skip_after = if page_in_sql { 0 } else { skip as usize };

    let blacklist = state.store.blacklist();
    let visible = filter_visible(&listings, &blacklist, tier);
    let response = visible
        .annotated
        .iter()
        .skip(skip_after)
        .take(limit as usize)
        .map(|a| {
            let l = a.listing;
            ListingResponse {
                id: l.id,
                item_name: l.item_name.clone(),
                category: l.category.clone(),
                server: l.server.clone(),
                seller_name: l.seller_name.clone(),
                quantity: l.quantity,
                price_won: l.price_won,
                price_yang: l.price_yang,
                total_price_yang: l.total_price_yang(),
                unit_price: l.unit_price(),
                tier: l.tier(),
                seen_at: l.seen_at,
                excluded: a.excluded,
                bonuses: l
                    .bonuses
                    .iter()
                    .map(|b| BonusResponse {
                        name: b.name.clone(),
                        value: b.value.clone(),
                        is_max: state.caps.is_max_bonus(&b.name, &b.value),
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(Json(response))
}

async fn get_price_history(
    State(state): State<ApiState>,
    Query(params): Query<PriceHistoryQuery>,
) -> Result<Json<Vec<PricePoint>>, AppError> {
    let tier = parse_tier(params.tier.as_deref())?;
    let Some(item_name) = non_blank(Some(params.item_name)) else {
        return Err(ValidationError::Empty("item_name").into());
    };

    let listings = repo::fetch_listings(
        &state.pool,
        &ListingQuery {
            item_name: Some(item_name),
            item_exact: true,
            server: non_blank(params.server),
            sort: ListingSort::Oldest,
            offset: 0,
            limit: None,
        },
    )
    .await?;

    let blacklist = state.store.blacklist();
    let visible = filter_visible(&listings, &blacklist, tier);
    Ok(Json(state.aggregator.history(visible.priced())))
}

async fn get_top_items(State(state): State<ApiState>) -> Result<Json<Vec<TopItemRow>>, AppError> {
    Ok(Json(repo::top_items(&state.pool, TOP_ITEMS).await?))
}

async fn get_servers(State(state): State<ApiState>) -> Result<Json<Vec<ServerResponse>>, AppError> {
    let with_data = repo::servers_with_listings(&state.pool).await?;
    Ok(Json(
        SERVERS
            .iter()
            .map(|s| ServerResponse {
                id: s.id,
                name: s.name,
                group: s.group,
                has_data: with_data.iter().any(|n| n == s.name),
            })
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// Handlers: watchlist
// ---------------------------------------------------------------------------

async fn list_watchlist(State(state): State<ApiState>) -> Json<Vec<TrackedEntry>> {
    Json(state.store.all_tracked())
}

async fn create_watchlist_entry(
    State(state): State<ApiState>,
    Json(body): Json<NewWatchlistEntry>,
) -> Result<(StatusCode, Json<TrackedEntry>), AppError> {
    let new = body.validate()?;
    let entry = repo::create_watchlist_entry(&state.pool, &new, Utc::now()).await?;
    let id = entry.id;
    state.store.upsert_entry(entry);
    let tracked = state
        .store
        .tracked(id)
        .ok_or_else(|| AppError::NotFound(format!("watchlist entry {id}")))?;
    Ok((StatusCode::CREATED, Json(tracked)))
}

async fn delete_watchlist_entry(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    repo::delete_watchlist_entry(&state.pool, id).await?;
    state.store.remove_entry(id);
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_watchlist_entry(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<TrackedEntry>, AppError> {
    let entry = repo::toggle_watchlist_entry(&state.pool, id).await?;
    if !state.store.set_entry_active(id, entry.is_active) {
        state.store.upsert_entry(entry);
    }
    state
        .store
        .tracked(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("watchlist entry {id}")))
}

// ---------------------------------------------------------------------------
// Handlers: threshold alerts
// ---------------------------------------------------------------------------

/// Entries an alert listing covers: one entry when filtered, otherwise all.
fn tracked_for(store: &WatchlistStore, watchlist_id: Option<i64>) -> Vec<TrackedEntry> {
    match watchlist_id {
        Some(id) => store.tracked(id).into_iter().collect(),
        None => store.all_tracked(),
    }
}

async fn list_alerts(
    State(state): State<ApiState>,
    Query(params): Query<AlertsQuery>,
) -> Json<Vec<ThresholdAlert>> {
    let mut alerts: Vec<ThresholdAlert> = tracked_for(&state.store, params.watchlist_id)
        .into_iter()
        .flat_map(|t| t.alerts)
        .collect();
    alerts.sort_by_key(|a| a.id);
    Json(alerts)
}

async fn create_alert(
    State(state): State<ApiState>,
    Json(body): Json<NewThresholdAlert>,
) -> Result<(StatusCode, Json<ThresholdAlert>), AppError> {
    let new = body.validate()?;
    let alert = repo::create_threshold_alert(&state.pool, &new, Utc::now()).await?;
    state.store.upsert_threshold_alert(alert.clone())?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn delete_alert(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    repo::delete_threshold_alert(&state.pool, id).await?;
    state.store.remove_alert(AlertRef::Threshold(id));
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_alert(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<ThresholdAlert>, AppError> {
    let alert = repo::toggle_threshold_alert(&state.pool, id).await?;
    if !state.store.set_alert_active(AlertRef::Threshold(id), alert.is_active) {
        state.store.upsert_threshold_alert(alert.clone())?;
    }
    // The store may hold a trigger the DB writer has not persisted yet.
    Ok(Json(state.store.threshold_alert(id).unwrap_or(alert)))
}

// ---------------------------------------------------------------------------
// Handlers: percentage alerts
// ---------------------------------------------------------------------------

async fn list_percentage_alerts(
    State(state): State<ApiState>,
    Query(params): Query<AlertsQuery>,
) -> Json<Vec<PercentageAlert>> {
    let mut alerts: Vec<PercentageAlert> = tracked_for(&state.store, params.watchlist_id)
        .into_iter()
        .flat_map(|t| t.percentage_alerts)
        .collect();
    alerts.sort_by_key(|a| a.id);
    Json(alerts)
}

async fn create_percentage_alert(
    State(state): State<ApiState>,
    Json(body): Json<NewPercentageAlert>,
) -> Result<(StatusCode, Json<PercentageAlert>), AppError> {
    let new = body.validate()?;
    let alert = repo::create_percentage_alert(&state.pool, &new, Utc::now()).await?;
    state.store.upsert_percentage_alert(alert.clone())?;
    Ok((StatusCode::CREATED, Json(alert)))
}

async fn delete_percentage_alert(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    repo::delete_percentage_alert(&state.pool, id).await?;
    state.store.remove_alert(AlertRef::Percentage(id));
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_percentage_alert(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<PercentageAlert>, AppError> {
    let alert = repo::toggle_percentage_alert(&state.pool, id).await?;
    if !state.store.set_alert_active(AlertRef::Percentage(id), alert.is_active) {
        state.store.upsert_percentage_alert(alert.clone())?;
    }
    Ok(Json(state.store.percentage_alert(id).unwrap_or(alert)))
}

// ---------------------------------------------------------------------------
// Handlers: fake sellers
// ---------------------------------------------------------------------------

async fn list_fake_sellers(State(state): State<ApiState>) -> Result<Json<Vec<FakeSeller>>, AppError> {
    Ok(Json(repo::list_fake_sellers(&state.pool).await?))
}

async fn create_fake_seller(
    State(state): State<ApiState>,
    Json(body): Json<NewFakeSeller>,
) -> Result<(StatusCode, Json<FakeSeller>), AppError> {
    let new = body.validate()?;
    let seller = repo::create_fake_seller(&state.pool, &new, Utc::now()).await?;
    state.store.add_fake_seller(seller.clone());
    Ok((StatusCode::CREATED, Json(seller)))
}

async fn delete_fake_seller(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let seller = repo::delete_fake_seller(&state.pool, id).await?;
    state.store.remove_fake_seller(&seller.seller_name);
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Handlers: Telegram settings
// ---------------------------------------------------------------------------

/// `null` until credentials have been saved.
async fn get_telegram_settings(
    State(state): State<ApiState>,
) -> Result<Json<Option<TelegramSettings>>, AppError> {
    Ok(Json(repo::get_telegram_settings(&state.pool).await?))
}

async fn save_telegram_settings(
    State(state): State<ApiState>,
    Json(body): Json<NewTelegramSettings>,
) -> Result<Json<TelegramSettings>, AppError> {
    let new = body.validate()?;
    let settings = repo::save_telegram_settings(&state.pool, &new, Utc::now()).await?;
    info!(chat_id = %settings.chat_id, "Telegram settings saved");
    Ok(Json(settings))
}

async fn toggle_telegram_settings(
    State(state): State<ApiState>,
) -> Result<Json<TelegramSettings>, AppError> {
    let settings = repo::toggle_telegram_settings(&state.pool, Utc::now()).await?;
    info!(enabled = settings.is_active, "Telegram notifications toggled");
    Ok(Json(settings))
}

async fn test_telegram(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, AppError> {
    state.telegram.send_test().await?;
    Ok(Json(serde_json::json!({ "detail": "test message sent" })))
}
