use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Rejected alert or watchlist configuration. Each variant names the violated invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("price_threshold must be positive (got {0})")]
    NonPositiveThreshold(i64),

    #[error("threshold_pct must be a positive number (got {0})")]
    NonPositivePercentage(f64),

    #[error("metric_a and metric_b must differ (both are '{0}')")]
    DuplicateMetric(String),

    #[error("unknown metric '{0}', expected one of: min, avg_bottom20, avg")]
    UnknownMetric(String),

    #[error("unknown price type '{0}', expected 'yang' or 'won'")]
    UnknownCurrency(String),

    #[error("unknown direction '{0}', expected 'below' or 'above'")]
    UnknownDirection(String),

    #[error("unknown tier filter '{0}', expected one of: ALL, MATERIAL, 0-6, 7-8, 9, 10+")]
    UnknownTier(String),

    #[error("unknown sort order '{0}', expected one of: newest, price_asc, price_desc")]
    UnknownSort(String),

    #[error("{0} must not be negative (got {1})")]
    Negative(&'static str, i64),

    #[error("interval_minutes must be positive (got {0})")]
    NonPositiveInterval(i64),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Listing source error: {0}")]
    ListingSource(String),

    #[error("Scrape failed for watchlist entry {entry_id} ('{query}') at {at}: {reason}")]
    Scrape {
        entry_id: i64,
        query: String,
        at: DateTime<Utc>,
        reason: String,
    },

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Stored data is inconsistent: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Http(_) | AppError::ListingSource(_) | AppError::Scrape { .. } | AppError::Notify(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}
