use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::HTTP_TIMEOUT_SECS;
use crate::db::repo;
use crate::error::{AppError, Result};
use crate::types::{Currency, Direction, TelegramSettings, TriggerDetail, TriggeredAlert};

const TEST_MESSAGE: &str = "✅ <b>market-watch</b>: Telegram connection works.";

/// Delivers trigger events. A failed send is reported, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &TriggeredAlert) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

/// Sends through the Bot API using the credentials stored in `telegram_settings`.
/// The row is read on every send, so edits and the on/off switch apply to the
/// next alert. Without an enabled row, alerts fall back to [`LogNotifier`].
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    pool: SqlitePool,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, pool: SqlitePool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            pool,
        })
    }

    /// Send a fixed message with the stored credentials, enabled or not.
    pub async fn send_test(&self) -> Result<()> {
        let settings = repo::get_telegram_settings(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("telegram settings".to_string()))?;
        self.post(&settings, TEST_MESSAGE).await
    }

    async fn post(&self, settings: &TelegramSettings, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, settings.bot_token);
        let payload = serde_json::json!({
            "chat_id": settings.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Notify(format!("Telegram API returned {status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, alert: &TriggeredAlert) -> Result<()> {
        match repo::get_telegram_settings(&self.pool).await? {
            Some(settings) if settings.is_active => {
                self.post(&settings, &format_message(alert)).await
            }
            _ => {
                debug!(alert = %alert.alert, "Telegram not configured or disabled");
                LogNotifier.send(alert).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Log-only fallback
// ---------------------------------------------------------------------------

/// Used when no delivery channel is enabled; the trigger still gets recorded.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &TriggeredAlert) -> Result<()> {
        info!(
            event = "ALERT",
            alert = %alert.alert,
            entry_id = alert.watchlist_id,
            "{}",
            format_plain(alert),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// HTML message body for Telegram.
pub fn format_message(alert: &TriggeredAlert) -> String {
    let when = alert.triggered_at.format("%d.%m.%Y %H:%M UTC");
    let item = escape_html(&alert.query);
    let server = escape_html(&alert.server_name);
    match &alert.detail {
        TriggerDetail::Threshold { direction, price_type, comparison_value, threshold } => {
            let arrow = match direction {
                Direction::Below => "⬇️",
                Direction::Above => "⬆️",
            };
            format!(
                "{arrow} <b>Price alert triggered</b>\n\n\
                 <b>Item:</b> {item} ({server})\n\
                 <b>Price:</b> {} {}\n\
                 <b>Threshold:</b> {direction} {} {}\n\
                 {when}",
                format_amount(*comparison_value, *price_type),
                currency_label(*price_type),
                group_thousands(*threshold),
                currency_label(*price_type),
            )
        }
        TriggerDetail::Percentage { metric_a, value_a, metric_b, value_b, deviation_pct, threshold_pct } => {
            format!(
                "📐 <b>Deviation alert triggered</b>\n\n\
                 <b>Item:</b> {item} ({server})\n\
                 <b>{}:</b> {} Yang\n\
                 <b>{}:</b> {} Yang\n\
                 <b>Deviation:</b> {deviation_pct:.1}% (threshold {threshold_pct}%)\n\
                 {when}",
                metric_a.label(),
                group_thousands(value_a.round() as i64),
                metric_b.label(),
                group_thousands(value_b.round() as i64),
            )
        }
    }
}

fn format_plain(alert: &TriggeredAlert) -> String {
    match &alert.detail {
        TriggerDetail::Threshold { direction, price_type, comparison_value, threshold } => format!(
            "'{}' on {}: best price {} {} is {direction} threshold {} {}",
            alert.query,
            alert.server_name,
            format_amount(*comparison_value, *price_type),
            currency_label(*price_type),
            group_thousands(*threshold),
            currency_label(*price_type),
        ),
        TriggerDetail::Percentage { metric_a, value_a, metric_b, value_b, deviation_pct, threshold_pct } => format!(
            "'{}' on {}: {metric_a}={value_a:.0} vs {metric_b}={value_b:.0} deviates {deviation_pct:.1}% (threshold {threshold_pct}%)",
            alert.query, alert.server_name,
        ),
    }
}

fn currency_label(c: Currency) -> &'static str {
    match c {
        Currency::Yang => "Yang",
        Currency::Won => "Won",
    }
}

fn format_amount(value: f64, c: Currency) -> String {
    match c {
        Currency::Yang => group_thousands(value.round() as i64),
        Currency::Won => format!("{value:.2}"),
    }
}

/// `1234567` → `"1,234,567"`.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::types::{AlertRef, Metric, NewTelegramSettings};
    use chrono::DateTime;

    fn triggered(detail: TriggerDetail) -> TriggeredAlert {
        TriggeredAlert {
            alert: AlertRef::Threshold(1),
            watchlist_id: 3,
            query: "Schwert <+9>".to_string(),
            server_name: "Chimera".to_string(),
            detail,
            triggered_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(group_thousands(-45_000), "-45,000");
    }

    #[test]
    fn threshold_message_mentions_price_and_threshold() {
        let msg = format_message(&triggered(TriggerDetail::Threshold {
            direction: Direction::Below,
            price_type: Currency::Yang,
            comparison_value: 950_000.0,
            threshold: 1_000_000,
        }));
        assert!(msg.contains("950,000 Yang"), "{msg}");
        assert!(msg.contains("below 1,000,000 Yang"), "{msg}");
        assert!(msg.contains("Schwert &lt;+9&gt;"), "{msg}");
    }

    #[test]
    fn percentage_message_mentions_deviation() {
        let msg = format_message(&triggered(TriggerDetail::Percentage {
            metric_a: Metric::Min,
            value_a: 80.0,
            metric_b: Metric::Avg,
            value_b: 100.0,
            deviation_pct: 20.0,
            threshold_pct: 20.0,
        }));
        assert!(msg.contains("Minimum:</b> 80 Yang"), "{msg}");
        assert!(msg.contains("20.0%"), "{msg}");
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let alert = triggered(TriggerDetail::Threshold {
            direction: Direction::Above,
            price_type: Currency::Won,
            comparison_value: 2.5,
            threshold: 2,
        });
        assert!(LogNotifier.send(&alert).await.is_ok());
    }

    fn below_yang() -> TriggeredAlert {
        triggered(TriggerDetail::Threshold {
            direction: Direction::Below,
            price_type: Currency::Yang,
            comparison_value: 900.0,
            threshold: 1_000,
        })
    }

    async fn notifier_with_settings(active: bool) -> TelegramNotifier {
        let pool = test_pool().await;
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let creds = NewTelegramSettings { bot_token: "123:abc".to_string(), chat_id: "42".to_string() };
        repo::save_telegram_settings(&pool, &creds, now).await.unwrap();
        if !active {
            repo::toggle_telegram_settings(&pool, now).await.unwrap();
        }
        // Nothing listens on the discard port, so any real send fails fast.
        TelegramNotifier::new("http://127.0.0.1:9", pool).unwrap()
    }

    #[tokio::test]
    async fn unconfigured_telegram_falls_back_to_log() {
        let notifier = TelegramNotifier::new("http://127.0.0.1:9", test_pool().await).unwrap();
        assert!(notifier.send(&below_yang()).await.is_ok());
        assert!(matches!(notifier.send_test().await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn disabled_telegram_does_not_call_the_api() {
        let notifier = notifier_with_settings(false).await;
        assert!(notifier.send(&below_yang()).await.is_ok());
    }

    #[tokio::test]
    async fn enabled_telegram_posts_to_the_api() {
        let notifier = notifier_with_settings(true).await;
        assert!(matches!(notifier.send(&below_yang()).await, Err(AppError::Http(_))));
        assert!(matches!(notifier.send_test().await, Err(AppError::Http(_))));
    }
}
