use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::aggregator::PriceAggregator;
use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::MAX_SCAN_TIER;
use crate::db::writer::DbWrite;
use crate::detector::evaluate;
use crate::error::{AppError, Result};
use crate::fetcher::ListingSource;
use crate::filter::{extract_tier, filter_visible, TierSelector};
use crate::notify::Notifier;
use crate::state::WatchlistStore;
use crate::types::{PricePoint, TrackedEntry, WatchlistEntry};

/// Whether `entry` should be scanned at `now`.
pub fn is_due(entry: &WatchlistEntry, now: DateTime<Utc>) -> bool {
    if !entry.is_active {
        return false;
    }
    match entry.last_scraped_at {
        None => true,
        Some(last) => TimeDelta::try_minutes(entry.interval_minutes)
            .is_some_and(|interval| now - last >= interval),
    }
}

/// Expand a watchlist query into the marketplace searches that cover it.
/// A query naming a tier is searched as-is; otherwise every tier is searched.
pub fn scan_queries(query: &str) -> Vec<String> {
    if extract_tier(query).is_some() {
        return vec![query.to_string()];
    }
    (0..=MAX_SCAN_TIER).map(|tier| format!("{query} +{tier}")).collect()
}

/// Summary of one successful entry scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub entry_id: i64,
    pub listings: usize,
    pub excluded: usize,
    pub point: Option<PricePoint>,
    pub triggered: usize,
    pub notified: usize,
    pub cleared: usize,
}

/// Periodically scans due watchlist entries and fires their alerts.
pub struct WatchlistScheduler {
    store: Arc<WatchlistStore>,
    source: Arc<dyn ListingSource>,
    notifier: Arc<dyn Notifier>,
    aggregator: PriceAggregator,
    db_tx: mpsc::Sender<DbWrite>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    tick: Duration,
}

impl WatchlistScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<WatchlistStore>,
        source: Arc<dyn ListingSource>,
        notifier: Arc<dyn Notifier>,
        aggregator: PriceAggregator,
        db_tx: mpsc::Sender<DbWrite>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        tick: Duration,
    ) -> Self {
        Self { store, source, notifier, aggregator, db_tx, health, latency, tick }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.tick);
        // A slow scan must not cause a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.tick_once(Utc::now()).await;
        }
    }

    /// One scheduler pass: drop orphaned alerts, then scan every due entry concurrently.
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Vec<Result<ScanOutcome>> {
        self.drop_orphans().await;

        let due = self.store.due_entries(now);
        if due.is_empty() {
            debug!("no watchlist entries due");
            return Vec::new();
        }
        debug!(count = due.len(), "scanning due watchlist entries");

        let results = join_all(due.into_iter().map(|t| self.run_pipeline(t, now))).await;
        for result in &results {
            match result {
                Ok(outcome) => {
                    self.health.record_scan(true, now);
                    info!(
                        entry_id = outcome.entry_id,
                        listings = outcome.listings,
                        excluded = outcome.excluded,
                        triggered = outcome.triggered,
                        cleared = outcome.cleared,
                        "Scan complete: {} listings ({} excluded), min {}, {} alert(s) fired",
                        outcome.listings,
                        outcome.excluded,
                        outcome
                            .point
                            .as_ref()
                            .map_or_else(|| "n/a".to_string(), |p| format!("{:.0}", p.min_unit_price)),
                        outcome.triggered,
                    );
                }
                Err(e) => {
                    self.health.record_scan(false, now);
                    warn!("{e}");
                }
            }
        }
        results
    }

    async fn drop_orphans(&self) {
        let orphans = self.store.orphaned_alerts();
        if orphans.is_empty() {
            return;
        }
        let names: Vec<String> = orphans.iter().map(ToString::to_string).collect();
        warn!(
            count = orphans.len(),
            "Dropping alerts whose watchlist entry is gone: {}",
            names.join(", "),
        );
        for alert in &orphans {
            self.store.remove_alert(*alert);
        }
        self.write(DbWrite::DeleteAlerts(orphans)).await;
    }

    /// fetch → persist → blacklist → aggregate → evaluate → record → notify.
    async fn run_pipeline(&self, tracked: TrackedEntry, now: DateTime<Utc>) -> Result<ScanOutcome> {
        let started = Instant::now();
        let entry_id = tracked.entry.id;
        let server = tracked.entry.server_name.as_str();

        let mut listings = Vec::new();
        for query in scan_queries(&tracked.entry.query) {
            match self.source.fetch_listings(&query, server).await {
                Ok(batch) => listings.extend(batch),
                Err(e) => {
                    return Err(AppError::Scrape {
                        entry_id,
                        query,
                        at: now,
                        reason: e.to_string(),
                    })
                }
            }
        }

        if !listings.is_empty() {
            self.write(DbWrite::Listings(listings.clone())).await;
        }
        self.store.mark_scraped(entry_id, now);
        self.write(DbWrite::Scraped { entry_id, at: now }).await;

        let blacklist = self.store.blacklist();
        let visible = filter_visible(&listings, &blacklist, TierSelector::All);
        let priced = visible.priced();
        let point = self
            .aggregator
            .aggregate(self.aggregator.bucket_of(now), priced.iter().copied());

        let mut outcome = ScanOutcome {
            entry_id,
            listings: visible.len(),
            excluded: visible.excluded_count(),
            point,
            triggered: 0,
            notified: 0,
            cleared: 0,
        };

        // The entry or its alerts may have changed while we were fetching.
        let Some(current) = self.store.tracked(entry_id) else {
            debug!(entry_id, "entry removed during scan, skipping evaluation");
            return Ok(outcome);
        };

        let eval = evaluate(&current, outcome.point.as_ref(), &priced, now);

        for alert in eval.cleared {
            if self.store.rearm(alert) {
                outcome.cleared += 1;
                debug!(entry_id, alert_id = %alert, "alert condition cleared, re-armed");
                self.write(DbWrite::AlertState { alert, condition_active: false, triggered_at: None })
                    .await;
            }
        }

        for triggered in eval.triggered {
            // Lost the race against a concurrent evaluation of the same breach.
            if !self.store.try_trigger(triggered.alert, triggered.triggered_at) {
                continue;
            }
            outcome.triggered += 1;
            self.health.inc_alerts_fired();
            self.write(DbWrite::AlertState {
                alert: triggered.alert,
                condition_active: true,
                triggered_at: Some(triggered.triggered_at),
            })
            .await;

            match self.notifier.send(&triggered).await {
                Ok(()) => outcome.notified += 1,
                Err(e) => error!(
                    entry_id,
                    alert_id = %triggered.alert,
                    "Alert recorded but notification failed: {e}"
                ),
            }
        }

        self.latency.record(started.elapsed());
        Ok(outcome)
    }

    async fn write(&self, write: DbWrite) {
        self.health.inc_write_queue_pending();
        if let Err(e) = self.db_tx.send(write).await {
            self.health.dec_write_queue_pending();
            warn!("DB writer channel closed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::types::{
        AlertRef, Currency, Direction, FakeSeller, Listing, ThresholdAlert, TriggeredAlert,
    };

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn entry(last_scraped_at: Option<DateTime<Utc>>) -> WatchlistEntry {
        WatchlistEntry {
            id: 1,
            query: "Vollmondschwert+9".to_string(),
            server_name: "Chimera".to_string(),
            is_active: true,
            interval_minutes: 20,
            last_scraped_at,
            created_at: t0(),
        }
    }

    fn below_alert(threshold: i64) -> ThresholdAlert {
        ThresholdAlert {
            id: 10,
            watchlist_id: 1,
            price_threshold: threshold,
            price_type: Currency::Yang,
            direction: Direction::Below,
            is_active: true,
            last_triggered_at: None,
            condition_active: false,
            created_at: t0(),
        }
    }

    fn listing(seller: &str, yang: i64) -> Listing {
        Listing {
            id: 0,
            item_name: "Vollmondschwert+9".to_string(),
            category: None,
            server: "Chimera".to_string(),
            seller_name: seller.to_string(),
            quantity: 1,
            price_won: 0,
            price_yang: yang,
            seen_at: t0(),
            bonuses: Vec::new(),
        }
    }

    #[derive(Default)]
    struct FakeSource {
        listings: Mutex<Vec<Listing>>,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn set(&self, listings: Vec<Listing>) {
            *self.listings.lock().unwrap() = listings;
        }
    }

    #[async_trait]
    impl ListingSource for FakeSource {
        async fn fetch_listings(&self, _query: &str, _server: &str) -> Result<Vec<Listing>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::ListingSource("scraper unreachable".to_string()));
            }
            Ok(self.listings.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<TriggeredAlert>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, alert: &TriggeredAlert) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Notify("bot blocked".to_string()));
            }
            self.sent.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct Harness {
        scheduler: WatchlistScheduler,
        store: Arc<WatchlistStore>,
        source: Arc<FakeSource>,
        notifier: Arc<FakeNotifier>,
        health: Arc<HealthState>,
        rx: mpsc::Receiver<DbWrite>,
    }

    fn harness() -> Harness {
        let store = WatchlistStore::new();
        store.hydrate(vec![entry(None)], vec![below_alert(1000)], Vec::new(), Vec::new());
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(FakeNotifier::default());
        let health = Arc::new(HealthState::new());
        let (tx, rx) = mpsc::channel(1024);
        let scheduler = WatchlistScheduler::new(
            Arc::clone(&store),
            source.clone(),
            notifier.clone(),
            PriceAggregator::default(),
            tx,
            Arc::clone(&health),
            Arc::new(LatencyStats::new()),
            Duration::from_secs(30),
        );
        Harness { scheduler, store, source, notifier, health, rx }
    }

    fn alert_state(store: &WatchlistStore) -> ThresholdAlert {
        store.tracked(1).unwrap().alerts[0].clone()
    }

    #[test]
    fn due_after_full_interval() {
        let now = t0();
        assert!(!is_due(&entry(Some(now - TimeDelta::minutes(19))), now));
        assert!(is_due(&entry(Some(now - TimeDelta::minutes(20))), now));
        assert!(is_due(&entry(None), now));

        let mut paused = entry(None);
        paused.is_active = false;
        assert!(!is_due(&paused, now));
    }

    #[test]
    fn tiered_query_is_scanned_as_is() {
        assert_eq!(scan_queries("Vollmondschwert+9"), vec!["Vollmondschwert+9"]);
        let all = scan_queries("Vollmondschwert");
        assert_eq!(all.len(), 10);
        assert_eq!(all[0], "Vollmondschwert +0");
        assert_eq!(all[9], "Vollmondschwert +9");
    }

    #[tokio::test]
    async fn sustained_breach_fires_once_and_rearms_after_clear() {
        let h = harness();
        h.source.set(vec![listing("a", 900), listing("b", 1500)]);

        let results = h.scheduler.tick_once(t0()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().triggered, 1);
        assert!(alert_state(&h.store).condition_active);

        // Same breach 20 minutes later: no second notification.
        let t1 = t0() + TimeDelta::minutes(20);
        h.scheduler.tick_once(t1).await;
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);

        // Price recovers, then breaches again.
        h.source.set(vec![listing("a", 1100)]);
        let t2 = t1 + TimeDelta::minutes(20);
        let results = h.scheduler.tick_once(t2).await;
        assert_eq!(results[0].as_ref().unwrap().cleared, 1);
        assert!(!alert_state(&h.store).condition_active);

        h.source.set(vec![listing("a", 1000)]);
        h.scheduler.tick_once(t2 + TimeDelta::minutes(20)).await;
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
        assert_eq!(h.health.alerts_fired(), 2);
    }

    #[tokio::test]
    async fn entry_not_due_is_not_fetched() {
        let h = harness();
        h.source.set(vec![listing("a", 1500)]);
        h.scheduler.tick_once(t0()).await;
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);

        h.scheduler.tick_once(t0() + TimeDelta::minutes(19)).await;
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_stamp_last_scraped() {
        let h = harness();
        h.source.fail.store(true, Ordering::SeqCst);

        let results = h.scheduler.tick_once(t0()).await;
        match &results[0] {
            Err(AppError::Scrape { entry_id, query, .. }) => {
                assert_eq!(*entry_id, 1);
                assert_eq!(query, "Vollmondschwert+9");
            }
            other => panic!("expected scrape error, got {other:?}"),
        }
        assert!(h.store.tracked(1).unwrap().entry.last_scraped_at.is_none());
        assert_eq!(h.health.snapshot().scans_failed, 1);
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notify_failure_keeps_recorded_trigger() {
        let h = harness();
        h.notifier.fail.store(true, Ordering::SeqCst);
        h.source.set(vec![listing("a", 500)]);

        let results = h.scheduler.tick_once(t0()).await;
        let outcome = results[0].as_ref().unwrap();
        assert_eq!(outcome.triggered, 1);
        assert_eq!(outcome.notified, 0);
        let alert = alert_state(&h.store);
        assert!(alert.condition_active);
        assert_eq!(alert.last_triggered_at, Some(t0()));
    }

    #[tokio::test]
    async fn blacklisted_seller_cannot_trigger() {
        let h = harness();
        h.store.add_fake_seller(FakeSeller {
            id: 1,
            seller_name: "Scammer".to_string(),
            reason: None,
            created_at: t0(),
        });
        h.source.set(vec![listing("Scammer", 1), listing("honest", 5000)]);

        let results = h.scheduler.tick_once(t0()).await;
        let outcome = results[0].as_ref().unwrap();
        assert_eq!(outcome.listings, 2);
        assert_eq!(outcome.excluded, 1);
        assert_eq!(outcome.triggered, 0);
        assert_eq!(outcome.point.as_ref().unwrap().min_unit_price, 5000.0);
    }

    #[tokio::test]
    async fn orphaned_alert_is_swept_on_tick() {
        let mut h = harness();
        let mut orphan = below_alert(1000);
        orphan.id = 11;
        orphan.watchlist_id = 99;
        h.store.insert_threshold_alert_unchecked(orphan);
        assert_eq!(h.store.orphaned_alerts(), vec![AlertRef::Threshold(11)]);

        h.scheduler.tick_once(t0()).await;

        assert!(h.store.orphaned_alerts().is_empty());
        assert!(h.store.threshold_alert(11).is_none());
        assert!(h.store.threshold_alert(10).is_some());

        let mut deleted = Vec::new();
        while let Ok(write) = h.rx.try_recv() {
            if let DbWrite::DeleteAlerts(refs) = write {
                deleted.extend(refs);
            }
        }
        assert_eq!(deleted, vec![AlertRef::Threshold(11)]);
    }
}
