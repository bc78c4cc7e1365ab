use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{
    AlertRef, Direction, Listing, Metric, PercentageAlert, PricePoint, ThresholdAlert, TrackedEntry,
    TriggerDetail, TriggeredAlert,
};

/// Why an alert was not evaluated this cycle. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    NoListings,
    NoPricePoint,
    MetricUnavailable(Metric),
    ZeroBaseline(Metric),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoListings => write!(f, "no priced listings"),
            SkipReason::NoPricePoint => write!(f, "no price point"),
            SkipReason::MetricUnavailable(m) => write!(f, "metric '{m}' unavailable"),
            SkipReason::ZeroBaseline(m) => write!(f, "metric '{m}' is zero"),
        }
    }
}

/// Result of one evaluation pass over an entry's alerts.
///
/// `triggered` holds alerts whose condition went false → true; `cleared` holds
/// alerts whose condition went true → false and must be re-armed. Alerts whose
/// condition is unchanged appear in neither list.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub triggered: Vec<TriggeredAlert>,
    pub cleared: Vec<AlertRef>,
    pub skipped: Vec<(AlertRef, SkipReason)>,
}

/// Evaluate every active alert of `tracked` against the latest scan.
///
/// `listings` must be the priced subset (blacklisted sellers removed).
/// Pure: the caller applies state transitions through the watchlist store.
pub fn evaluate(
    tracked: &TrackedEntry,
    point: Option<&PricePoint>,
    listings: &[&Listing],
    now: DateTime<Utc>,
) -> Evaluation {
    let mut eval = Evaluation::default();
    let min_unit_price = listings
        .iter()
        .map(|l| l.unit_price())
        .min_by(f64::total_cmp);

    for alert in tracked.alerts.iter().filter(|a| a.is_active) {
        let alert_ref = AlertRef::Threshold(alert.id);
        match check_threshold(alert, min_unit_price) {
            Ok((holds, detail)) => {
                record(&mut eval, tracked, alert_ref, alert.condition_active, holds, detail, now)
            }
            Err(reason) => skip(&mut eval, tracked, alert_ref, reason),
        }
    }

    for alert in tracked.percentage_alerts.iter().filter(|a| a.is_active) {
        let alert_ref = AlertRef::Percentage(alert.id);
        match check_percentage(alert, point) {
            Ok((holds, detail)) => {
                record(&mut eval, tracked, alert_ref, alert.condition_active, holds, detail, now)
            }
            Err(reason) => skip(&mut eval, tracked, alert_ref, reason),
        }
    }

    eval
}

fn check_threshold(
    alert: &ThresholdAlert,
    min_unit_price: Option<f64>,
) -> Result<(bool, TriggerDetail), SkipReason> {
    let min_yang = min_unit_price.ok_or(SkipReason::NoListings)?;
    let value = alert.price_type.from_yang(min_yang);
    let threshold = alert.price_threshold as f64;
    let holds = match alert.direction {
        Direction::Below => value <= threshold,
        Direction::Above => value >= threshold,
    };
    Ok((
        holds,
        TriggerDetail::Threshold {
            direction: alert.direction,
            price_type: alert.price_type,
            comparison_value: value,
            threshold: alert.price_threshold,
        },
    ))
}

fn check_percentage(
    alert: &PercentageAlert,
    point: Option<&PricePoint>,
) -> Result<(bool, TriggerDetail), SkipReason> {
    let point = point.ok_or(SkipReason::NoPricePoint)?;
    let value_a = alert
        .metric_a
        .resolve(point)
        .ok_or(SkipReason::MetricUnavailable(alert.metric_a))?;
    let value_b = alert
        .metric_b
        .resolve(point)
        .ok_or(SkipReason::MetricUnavailable(alert.metric_b))?;
    if value_b == 0.0 {
        return Err(SkipReason::ZeroBaseline(alert.metric_b));
    }

    let deviation_pct = deviation_pct(value_a, value_b);
    Ok((
        deviation_pct >= alert.threshold_pct,
        TriggerDetail::Percentage {
            metric_a: alert.metric_a,
            value_a,
            metric_b: alert.metric_b,
            value_b,
            deviation_pct,
            threshold_pct: alert.threshold_pct,
        },
    ))
}

/// |A − B| / B × 100. B is always the baseline.
pub fn deviation_pct(a: f64, b: f64) -> f64 {
    (a - b).abs() * 100.0 / b.abs()
}

fn record(
    eval: &mut Evaluation,
    tracked: &TrackedEntry,
    alert: AlertRef,
    was_active: bool,
    holds: bool,
    detail: TriggerDetail,
    now: DateTime<Utc>,
) {
    match (was_active, holds) {
        (false, true) => eval.triggered.push(TriggeredAlert {
            alert,
            watchlist_id: tracked.entry.id,
            query: tracked.entry.query.clone(),
            server_name: tracked.entry.server_name.clone(),
            detail,
            triggered_at: now,
        }),
        (true, false) => eval.cleared.push(alert),
        _ => {}
    }
}

fn skip(eval: &mut Evaluation, tracked: &TrackedEntry, alert: AlertRef, reason: SkipReason) {
    debug!(
        entry_id = tracked.entry.id,
        alert = %alert,
        "alert skipped for '{}': {reason}",
        tracked.entry.query,
    );
    eval.skipped.push((alert, reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, Direction, WatchlistEntry};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn tracked() -> TrackedEntry {
        TrackedEntry {
            entry: WatchlistEntry {
                id: 1,
                query: "Vollmondschwert".to_string(),
                server_name: "Chimera".to_string(),
                is_active: true,
                interval_minutes: 20,
                last_scraped_at: None,
                created_at: now(),
            },
            alerts: Vec::new(),
            percentage_alerts: Vec::new(),
        }
    }

    fn threshold(id: i64, threshold: i64, direction: Direction, price_type: Currency) -> ThresholdAlert {
        ThresholdAlert {
            id,
            watchlist_id: 1,
            price_threshold: threshold,
            price_type,
            direction,
            is_active: true,
            last_triggered_at: None,
            condition_active: false,
            created_at: now(),
        }
    }

    fn percentage(id: i64, a: Metric, b: Metric, pct: f64) -> PercentageAlert {
        PercentageAlert {
            id,
            watchlist_id: 1,
            metric_a: a,
            metric_b: b,
            threshold_pct: pct,
            is_active: true,
            last_triggered_at: None,
            condition_active: false,
            created_at: now(),
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
            seen_at: now(),
            bonuses: Vec::new(),
        }
    }

    fn point(min: f64, b20: Option<f64>, avg: f64) -> PricePoint {
        PricePoint {
            timestamp: now(),
            avg_unit_price: avg,
            min_unit_price: min,
            avg_bottom20_price: b20,
            total_listings: 10,
        }
    }

    #[test]
    fn below_threshold_is_inclusive() {
        let mut t = tracked();
        t.alerts.push(threshold(7, 1_000, Direction::Below, Currency::Yang));

        let at_threshold = [listing("a", 1_000), listing("b", 5_000)];
        let refs: Vec<&Listing> = at_threshold.iter().collect();
        let eval = evaluate(&t, None, &refs, now());
        assert_eq!(eval.triggered.len(), 1);
        assert_eq!(eval.triggered[0].alert, AlertRef::Threshold(7));

        let above = [listing("a", 1_001)];
        let refs: Vec<&Listing> = above.iter().collect();
        assert!(evaluate(&t, None, &refs, now()).triggered.is_empty());
    }

    #[test]
    fn above_threshold_uses_cheapest_listing() {
        let mut t = tracked();
        t.alerts.push(threshold(1, 2_000, Direction::Above, Currency::Yang));

        let listings = [listing("a", 1_500), listing("b", 9_000)];
        let refs: Vec<&Listing> = listings.iter().collect();
        assert!(evaluate(&t, None, &refs, now()).triggered.is_empty());

        let listings = [listing("a", 2_000), listing("b", 9_000)];
        let refs: Vec<&Listing> = listings.iter().collect();
        assert_eq!(evaluate(&t, None, &refs, now()).triggered.len(), 1);
    }

    #[test]
    fn won_alerts_compare_in_won() {
        let mut t = tracked();
        t.alerts.push(threshold(1, 3, Direction::Below, Currency::Won));

        let mut l = listing("a", 50_000_000);
        l.price_won = 2;
        let refs = vec![&l];
        let eval = evaluate(&t, None, &refs, now());
        assert_eq!(eval.triggered.len(), 1);
        match &eval.triggered[0].detail {
            TriggerDetail::Threshold { comparison_value, .. } => assert_eq!(*comparison_value, 2.5),
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn percentage_boundary_is_inclusive() {
        let mut t = tracked();
        t.percentage_alerts.push(percentage(3, Metric::Min, Metric::Avg, 20.0));

        let eval = evaluate(&t, Some(&point(80.0, Some(85.0), 100.0)), &[], now());
        assert_eq!(eval.triggered.len(), 1);
        match &eval.triggered[0].detail {
            TriggerDetail::Percentage { deviation_pct, .. } => assert_eq!(*deviation_pct, 20.0),
            other => panic!("unexpected detail {other:?}"),
        }

        let eval = evaluate(&t, Some(&point(85.0, Some(90.0), 100.0)), &[], now());
        assert!(eval.triggered.is_empty());
    }

    #[test]
    fn percentage_deviation_is_symmetric_magnitude() {
        assert_eq!(deviation_pct(120.0, 100.0), 20.0);
        assert_eq!(deviation_pct(80.0, 100.0), 20.0);
    }

    #[test]
    fn missing_metric_skips_without_affecting_siblings() {
        let mut t = tracked();
        t.percentage_alerts.push(percentage(1, Metric::AvgBottom20, Metric::Avg, 5.0));
        t.percentage_alerts.push(percentage(2, Metric::Min, Metric::Avg, 5.0));

        let eval = evaluate(&t, Some(&point(50.0, None, 100.0)), &[], now());
        assert_eq!(eval.skipped, vec![(
            AlertRef::Percentage(1),
            SkipReason::MetricUnavailable(Metric::AvgBottom20)
        )]);
        assert_eq!(eval.triggered.len(), 1);
        assert_eq!(eval.triggered[0].alert, AlertRef::Percentage(2));
    }

    #[test]
    fn no_data_skips_everything() {
        let mut t = tracked();
        t.alerts.push(threshold(1, 100, Direction::Below, Currency::Yang));
        t.percentage_alerts.push(percentage(2, Metric::Min, Metric::Avg, 5.0));

        let eval = evaluate(&t, None, &[], now());
        assert!(eval.triggered.is_empty());
        assert_eq!(eval.skipped.len(), 2);
        assert!(eval.skipped.contains(&(AlertRef::Threshold(1), SkipReason::NoListings)));
        assert!(eval.skipped.contains(&(AlertRef::Percentage(2), SkipReason::NoPricePoint)));
    }

    #[test]
    fn zero_baseline_is_skipped() {
        let mut t = tracked();
        t.percentage_alerts.push(percentage(1, Metric::Avg, Metric::Min, 5.0));
        let eval = evaluate(&t, Some(&point(0.0, Some(0.0), 10.0)), &[], now());
        assert_eq!(eval.skipped, vec![(AlertRef::Percentage(1), SkipReason::ZeroBaseline(Metric::Min))]);
    }

    #[test]
    fn holding_condition_does_not_retrigger() {
        let mut t = tracked();
        let mut alert = threshold(1, 1_000, Direction::Below, Currency::Yang);
        alert.condition_active = true;
        t.alerts.push(alert);

        let listings = [listing("a", 900)];
        let refs: Vec<&Listing> = listings.iter().collect();
        let eval = evaluate(&t, None, &refs, now());
        assert!(eval.triggered.is_empty());
        assert!(eval.cleared.is_empty());
    }

    #[test]
    fn condition_clearing_rearms() {
        let mut t = tracked();
        let mut alert = percentage(4, Metric::Min, Metric::Avg, 20.0);
        alert.condition_active = true;
        t.percentage_alerts.push(alert);

        let eval = evaluate(&t, Some(&point(95.0, Some(96.0), 100.0)), &[], now());
        assert_eq!(eval.cleared, vec![AlertRef::Percentage(4)]);
        assert!(eval.triggered.is_empty());
    }

    #[test]
    fn inactive_alerts_are_ignored() {
        let mut t = tracked();
        let mut alert = threshold(1, 1_000, Direction::Below, Currency::Yang);
        alert.is_active = false;
        t.alerts.push(alert);

        let listings = [listing("a", 1)];
        let refs: Vec<&Listing> = listings.iter().collect();
        let eval = evaluate(&t, None, &refs, now());
        assert!(eval.triggered.is_empty());
        assert!(eval.skipped.is_empty());
    }
}
