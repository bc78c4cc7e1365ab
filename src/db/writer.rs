use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::api::health::HealthState;
use crate::db::repo;
use crate::error::Result;
use crate::types::{AlertRef, Listing};

/// Persistence requests produced by the scheduler.
#[derive(Debug)]
pub enum DbWrite {
    /// One scan's listings, bonuses included.
    Listings(Vec<Listing>),
    Scraped { entry_id: i64, at: DateTime<Utc> },
    AlertState {
        alert: AlertRef,
        condition_active: bool,
        triggered_at: Option<DateTime<Utc>>,
    },
    DeleteAlerts(Vec<AlertRef>),
}

/// Receives `DbWrite`s and persists them to SQLite.
/// Runs as a dedicated background task so scans never wait on disk.
pub struct DbWriter {
    pool: sqlx::SqlitePool,
    rx: mpsc::Receiver<DbWrite>,
    health: Arc<HealthState>,
}

impl DbWriter {
    pub fn new(pool: sqlx::SqlitePool, rx: mpsc::Receiver<DbWrite>, health: Arc<HealthState>) -> Self {
        Self { pool, rx, health }
    }

    pub async fn run(mut self) {
        while let Some(write) = self.rx.recv().await {
            self.health.dec_write_queue_pending();
            if let Err(e) = self.apply(write).await {
                error!("DB write error: {e}");
            }
        }
        debug!("DB writer channel closed");
    }

    async fn apply(&self, write: DbWrite) -> Result<()> {
        match write {
            DbWrite::Listings(listings) => {
                let n = repo::insert_listings(&self.pool, &listings).await?;
                debug!(count = n, "listings persisted");
            }
            DbWrite::Scraped { entry_id, at } => {
                repo::mark_scraped(&self.pool, entry_id, at).await?;
            }
            DbWrite::AlertState { alert, condition_active, triggered_at } => {
                repo::record_alert_state(&self.pool, alert, condition_active, triggered_at).await?;
            }
            DbWrite::DeleteAlerts(alerts) => {
                let n = repo::delete_alerts(&self.pool, &alerts).await?;
                debug!(count = n, "orphaned alerts deleted");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::{Currency, Direction, NewThresholdAlert, NewWatchlistEntry};

    #[tokio::test]
    async fn drains_channel_into_database() {
        let pool = test_pool().await;
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let entry = repo::create_watchlist_entry(
            &pool,
            &NewWatchlistEntry {
                query: "Segi".to_string(),
                server_name: "Chimera".to_string(),
                interval_minutes: 20,
            },
            now,
        )
        .await
        .unwrap();
        let alert = repo::create_threshold_alert(
            &pool,
            &NewThresholdAlert {
                watchlist_id: entry.id,
                price_threshold: 100,
                price_type: Currency::Yang,
                direction: Direction::Below,
            },
            now,
        )
        .await
        .unwrap();

        let health = Arc::new(HealthState::new());
        let (tx, rx) = mpsc::channel(8);
        let writer = DbWriter::new(pool.clone(), rx, Arc::clone(&health));

        tx.send(DbWrite::Scraped { entry_id: entry.id, at: now }).await.unwrap();
        tx.send(DbWrite::AlertState {
            alert: AlertRef::Threshold(alert.id),
            condition_active: true,
            triggered_at: Some(now),
        })
        .await
        .unwrap();
        drop(tx);
        writer.run().await;

        let stored = repo::list_watchlist(&pool).await.unwrap();
        assert_eq!(stored[0].last_scraped_at, Some(now));
        let alerts = repo::list_threshold_alerts(&pool).await.unwrap();
        assert!(alerts[0].condition_active);
        assert_eq!(alerts[0].last_triggered_at, Some(now));
    }
}
