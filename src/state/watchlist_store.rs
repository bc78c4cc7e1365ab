use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{AppError, Result};
use crate::filter::Blacklist;
use crate::scheduler::is_due;
use crate::types::{
    AlertRef, FakeSeller, PercentageAlert, ThresholdAlert, TrackedEntry, WatchlistEntry,
};

// ---------------------------------------------------------------------------
// WatchlistStore
// ---------------------------------------------------------------------------

/// In-memory arena of watchlist entries, their alerts, and the seller blacklist.
///
/// Alerts are keyed by their own id and point back at their entry; removing an
/// entry cascades to its alerts. Alert state transitions go through
/// [`try_trigger`](Self::try_trigger) / [`rearm`](Self::rearm), which hold the
/// alert's shard lock for the read-compare-write so concurrent evaluations of
/// one breach register it once.
pub struct WatchlistStore {
    /// entry_id → entry (alerts live in their own maps)
    entries: DashMap<i64, WatchlistEntry>,
    /// alert_id → threshold alert
    threshold_alerts: DashMap<i64, ThresholdAlert>,
    /// alert_id → percentage alert
    percentage_alerts: DashMap<i64, PercentageAlert>,
    /// seller_name → fake seller record
    fake_sellers: DashMap<String, FakeSeller>,
}

impl WatchlistStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Load persisted state. Alerts whose entry is missing are not inserted;
    /// their refs are returned so the caller can clean them up.
    pub fn hydrate(
        &self,
        entries: Vec<WatchlistEntry>,
        threshold_alerts: Vec<ThresholdAlert>,
        percentage_alerts: Vec<PercentageAlert>,
        fake_sellers: Vec<FakeSeller>,
    ) -> Vec<AlertRef> {
        for entry in entries {
            self.entries.insert(entry.id, entry);
        }
        let mut orphans = Vec::new();
        for alert in threshold_alerts {
            if self.entries.contains_key(&alert.watchlist_id) {
                self.threshold_alerts.insert(alert.id, alert);
            } else {
                orphans.push(AlertRef::Threshold(alert.id));
            }
        }
        for alert in percentage_alerts {
            if self.entries.contains_key(&alert.watchlist_id) {
                self.percentage_alerts.insert(alert.id, alert);
            } else {
                orphans.push(AlertRef::Percentage(alert.id));
            }
        }
        for seller in fake_sellers {
            self.fake_sellers.insert(seller.seller_name.clone(), seller);
        }
        orphans
    }

    // --- entries ---

    pub fn upsert_entry(&self, entry: WatchlistEntry) {
        self.entries.insert(entry.id, entry);
    }

    /// Remove an entry together with every alert it owns.
    /// Returns the removed entry and the refs of the cascaded alerts.
    pub fn remove_entry(&self, entry_id: i64) -> Option<(WatchlistEntry, Vec<AlertRef>)> {
        let (_, entry) = self.entries.remove(&entry_id)?;
        let mut removed = Vec::new();
        self.threshold_alerts.retain(|id, a| {
            let keep = a.watchlist_id != entry_id;
            if !keep {
                removed.push(AlertRef::Threshold(*id));
            }
            keep
        });
        self.percentage_alerts.retain(|id, a| {
            let keep = a.watchlist_id != entry_id;
            if !keep {
                removed.push(AlertRef::Percentage(*id));
            }
            keep
        });
        Some((entry, removed))
    }

    pub fn mark_scraped(&self, entry_id: i64, at: DateTime<Utc>) -> bool {
        match self.entries.get_mut(&entry_id) {
            Some(mut entry) => {
                entry.last_scraped_at = Some(at);
                true
            }
            None => false,
        }
    }

    /// Pause or resume an entry without touching its scrape stamp.
    pub fn set_entry_active(&self, entry_id: i64, is_active: bool) -> bool {
        match self.entries.get_mut(&entry_id) {
            Some(mut entry) => {
                entry.is_active = is_active;
                true
            }
            None => false,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of one entry with its alerts, sorted by alert id.
    pub fn tracked(&self, entry_id: i64) -> Option<TrackedEntry> {
        let entry = self.entries.get(&entry_id)?.clone();
        Some(self.assemble(entry))
    }

    /// Snapshots of every entry, newest first.
    pub fn all_tracked(&self) -> Vec<TrackedEntry> {
        let mut entries: Vec<WatchlistEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        entries.into_iter().map(|e| self.assemble(e)).collect()
    }

    /// Active entries whose scan interval has elapsed at `now`.
    pub fn due_entries(&self, now: DateTime<Utc>) -> Vec<TrackedEntry> {
        let mut due: Vec<WatchlistEntry> = self
            .entries
            .iter()
            .filter(|e| is_due(e.value(), now))
            .map(|e| e.value().clone())
            .collect();
        due.sort_by_key(|e| e.id);
        due.into_iter().map(|e| self.assemble(e)).collect()
    }

    fn assemble(&self, entry: WatchlistEntry) -> TrackedEntry {
        let mut alerts: Vec<ThresholdAlert> = self
            .threshold_alerts
            .iter()
            .filter(|a| a.watchlist_id == entry.id)
            .map(|a| a.value().clone())
            .collect();
        alerts.sort_by_key(|a| a.id);
        let mut percentage_alerts: Vec<PercentageAlert> = self
            .percentage_alerts
            .iter()
            .filter(|a| a.watchlist_id == entry.id)
            .map(|a| a.value().clone())
            .collect();
        percentage_alerts.sort_by_key(|a| a.id);
        TrackedEntry { entry, alerts, percentage_alerts }
    }

    // --- alerts ---

    pub fn upsert_threshold_alert(&self, alert: ThresholdAlert) -> Result<()> {
        if !self.entries.contains_key(&alert.watchlist_id) {
            return Err(AppError::NotFound(format!("watchlist entry {}", alert.watchlist_id)));
        }
        self.threshold_alerts.insert(alert.id, alert);
        Ok(())
    }

    pub fn upsert_percentage_alert(&self, alert: PercentageAlert) -> Result<()> {
        if !self.entries.contains_key(&alert.watchlist_id) {
            return Err(AppError::NotFound(format!("watchlist entry {}", alert.watchlist_id)));
        }
        self.percentage_alerts.insert(alert.id, alert);
        Ok(())
    }

    pub fn remove_alert(&self, alert: AlertRef) -> bool {
        match alert {
            AlertRef::Threshold(id) => self.threshold_alerts.remove(&id).is_some(),
            AlertRef::Percentage(id) => self.percentage_alerts.remove(&id).is_some(),
        }
    }

    /// Pause or resume an alert in place. The condition is reset so a resumed
    /// alert fires on the next breach; the last trigger time is kept.
    pub fn set_alert_active(&self, alert: AlertRef, is_active: bool) -> bool {
        match alert {
            AlertRef::Threshold(id) => self
                .threshold_alerts
                .get_mut(&id)
                .map(|mut a| {
                    a.is_active = is_active;
                    a.condition_active = false;
                })
                .is_some(),
            AlertRef::Percentage(id) => self
                .percentage_alerts
                .get_mut(&id)
                .map(|mut a| {
                    a.is_active = is_active;
                    a.condition_active = false;
                })
                .is_some(),
        }
    }

    pub fn threshold_alert(&self, id: i64) -> Option<ThresholdAlert> {
        self.threshold_alerts.get(&id).map(|a| a.value().clone())
    }

    pub fn percentage_alert(&self, id: i64) -> Option<PercentageAlert> {
        self.percentage_alerts.get(&id).map(|a| a.value().clone())
    }

    /// Insert without the entry check, as a create racing an entry delete would.
    #[cfg(test)]
    pub fn insert_threshold_alert_unchecked(&self, alert: ThresholdAlert) {
        self.threshold_alerts.insert(alert.id, alert);
    }

    /// Alerts pointing at an entry that no longer exists.
    pub fn orphaned_alerts(&self) -> Vec<AlertRef> {
        let threshold = self
            .threshold_alerts
            .iter()
            .filter(|a| !self.entries.contains_key(&a.watchlist_id))
            .map(|a| AlertRef::Threshold(*a.key()));
        let percentage = self
            .percentage_alerts
            .iter()
            .filter(|a| !self.entries.contains_key(&a.watchlist_id))
            .map(|a| AlertRef::Percentage(*a.key()));
        threshold.chain(percentage).collect()
    }

    /// Compare-and-set `condition_active: false → true`, stamping `last_triggered_at`.
    /// Returns false when the alert is gone, inactive, orphaned, or already triggered.
    pub fn try_trigger(&self, alert: AlertRef, at: DateTime<Utc>) -> bool {
        match alert {
            AlertRef::Threshold(id) => {
                let Some(mut a) = self.threshold_alerts.get_mut(&id) else {
                    return false;
                };
                if !a.is_active || a.condition_active || !self.entries.contains_key(&a.watchlist_id) {
                    return false;
                }
                a.condition_active = true;
                a.last_triggered_at = Some(at);
                true
            }
            AlertRef::Percentage(id) => {
                let Some(mut a) = self.percentage_alerts.get_mut(&id) else {
                    return false;
                };
                if !a.is_active || a.condition_active || !self.entries.contains_key(&a.watchlist_id) {
                    return false;
                }
                a.condition_active = true;
                a.last_triggered_at = Some(at);
                true
            }
        }
    }

    /// Compare-and-set `condition_active: true → false`. Returns whether it changed.
    pub fn rearm(&self, alert: AlertRef) -> bool {
        let flag = match alert {
            AlertRef::Threshold(id) => self
                .threshold_alerts
                .get_mut(&id)
                .map(|mut a| std::mem::replace(&mut a.condition_active, false)),
            AlertRef::Percentage(id) => self
                .percentage_alerts
                .get_mut(&id)
                .map(|mut a| std::mem::replace(&mut a.condition_active, false)),
        };
        flag.unwrap_or(false)
    }

    // --- fake sellers ---

    pub fn add_fake_seller(&self, seller: FakeSeller) {
        self.fake_sellers.insert(seller.seller_name.clone(), seller);
    }

    pub fn remove_fake_seller(&self, seller_name: &str) -> Option<FakeSeller> {
        self.fake_sellers.remove(seller_name).map(|(_, s)| s)
    }

    pub fn blacklist(&self) -> Blacklist {
        Blacklist::new(self.fake_sellers.iter().map(|s| s.key().clone()))
    }
}

impl Default for WatchlistStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            threshold_alerts: DashMap::new(),
            percentage_alerts: DashMap::new(),
            fake_sellers: DashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
