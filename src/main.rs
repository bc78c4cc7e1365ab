mod aggregator;
mod api;
mod config;
mod db;
mod detector;
mod error;
mod fetcher;
mod filter;
mod notify;
mod scheduler;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aggregator::{AggregatorConfig, PriceAggregator};
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY, DEFAULT_INTERVAL_MINUTES};
use crate::db::repo;
use crate::db::writer::{DbWrite, DbWriter};
use crate::detector::BonusCaps;
use crate::error::Result;
use crate::fetcher::HttpListingSource;
use crate::notify::{Notifier, TelegramNotifier};
use crate::scheduler::WatchlistScheduler;
use crate::state::WatchlistStore;
use crate::types::{NewTelegramSettings, NewWatchlistEntry};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    if let (Some(query), Some(server)) = (&cfg.seed_query, &cfg.seed_server) {
        let seed = NewWatchlistEntry {
            query: query.clone(),
            server_name: server.clone(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
        }
        .validate()?;
        if repo::seed_watchlist(&pool, &seed, Utc::now()).await? {
            info!("Seeded watchlist with '{}' on {}", seed.query, seed.server_name);
        }
    }

    // --- In-memory watchlist store ---
    let store = WatchlistStore::new();
    let orphans = store.hydrate(
        repo::list_watchlist(&pool).await?,
        repo::list_threshold_alerts(&pool).await?,
        repo::list_percentage_alerts(&pool).await?,
        repo::list_fake_sellers(&pool).await?,
    );
    if !orphans.is_empty() {
        warn!(count = orphans.len(), "Removing alerts without a watchlist entry");
        repo::delete_alerts(&pool, &orphans).await?;
    }
    info!("Watchlist loaded: {} entries", store.entry_count());

    // --- Bonus caps ---
    let caps = match &cfg.bonus_caps_path {
        Some(path) => BonusCaps::from_json_file(path)?,
        None => BonusCaps::builtin(),
    };
    info!("Bonus caps loaded: {} entries", caps.len());

    let aggregator = PriceAggregator::new(AggregatorConfig {
        granularity_secs: cfg.bucket_granularity_secs,
        min_bottom_sample: cfg.bottom20_min_sample,
    });
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- DB writer ---
    let (db_tx, db_rx) = mpsc::channel::<DbWrite>(CHANNEL_CAPACITY);
    let writer = DbWriter::new(pool.clone(), db_rx, Arc::clone(&health));
    tokio::spawn(async move { writer.run().await });

    // --- Notifier ---
    if let (Some(token), Some(chat_id)) = (&cfg.telegram_bot_token, &cfg.telegram_chat_id) {
        let creds = NewTelegramSettings { bot_token: token.clone(), chat_id: chat_id.clone() }
            .validate()?;
        if repo::seed_telegram_settings(&pool, &creds, Utc::now()).await? {
            info!("Telegram settings seeded from environment");
        }
    }
    match repo::get_telegram_settings(&pool).await? {
        Some(s) if s.is_active => info!(chat_id = %s.chat_id, "Telegram notifications enabled"),
        Some(_) => info!("Telegram notifications switched off - alerts are only logged"),
        None => warn!("Telegram not configured - alerts are only logged"),
    }
    let telegram = Arc::new(TelegramNotifier::new(&cfg.telegram_api_url, pool.clone())?);
    let notifier: Arc<dyn Notifier> = telegram.clone();

    // --- Scheduler ---
    let source = Arc::new(HttpListingSource::new(&cfg.listing_source_url)?);
    let scheduler = WatchlistScheduler::new(
        Arc::clone(&store),
        source,
        notifier,
        aggregator,
        db_tx,
        Arc::clone(&health),
        Arc::clone(&latency),
        Duration::from_secs(cfg.scheduler_tick_secs),
    );
    tokio::spawn(async move { scheduler.run().await });
    info!(
        "Scheduler running every {}s against {}",
        cfg.scheduler_tick_secs, cfg.listing_source_url
    );

    // --- HTTP API server ---
    let api_state = ApiState {
        pool,
        store,
        caps: Arc::new(caps),
        aggregator,
        health,
        latency,
        telegram,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
