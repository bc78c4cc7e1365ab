use crate::error::{AppError, Result};
use crate::types::ServerInfo;

pub const LISTING_SOURCE_URL: &str = "http://127.0.0.1:9000";
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// 1 won = 100 000 000 yang. Listing totals are always expressed in yang.
pub const YANG_PER_WON: i64 = 100_000_000;

/// Share of the cheapest listings averaged into `avg_bottom20_price`, in percent.
pub const BOTTOM_PERCENT: usize = 20;

/// Scan interval given to new watchlist entries (minutes).
pub const DEFAULT_INTERVAL_MINUTES: i64 = 20;

/// Highest upgrade tier scanned when a watched query carries no explicit "+N".
pub const MAX_SCAN_TIER: u32 = 9;

/// How often the scheduler checks the watchlist for due entries (seconds).
pub const SCHEDULER_TICK_SECS: u64 = 30;

/// Channel capacity for the DB writer queue.
pub const CHANNEL_CAPACITY: usize = 1024;

/// HTTP timeout for the listing source and Telegram (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

const fn server(id: &'static str, name: &'static str, group: &'static str) -> ServerInfo {
    ServerInfo { id, name, group }
}

/// Servers selectable on the marketplace, with the site's numeric ids.
pub const SERVERS: &[ServerInfo] = &[
    server("439", "Fırtına", "Turkey"),
    server("438", "Lodos", "Turkey"),
    server("418", "Bagjanamu", "Turkey"),
    server("413", "Arkadaşlar", "Turkey"),
    server("409", "Marmara", "Turkey"),
    server("59", "Ezel", "Turkey"),
    server("57", "Barbaros", "Turkey"),
    server("51", "Dandanakan", "Turkey"),
    server("437", "Star", "Sapphire"),
    server("436", "Safir", "Sapphire"),
    server("540", "Oceana", "Sapphire"),
    server("732", "Azure", "Sapphire"),
    server("431", "Lucifer", "Ruby"),
    server("426", "Charon", "Ruby"),
    server("531", "Chimera", "Ruby"),
    server("723", "Kirin", "Ruby"),
    server("70", "Germania", "International"),
    server("71", "Teutonia", "International"),
    server("502", "Europe", "International"),
    server("503", "Italia", "International"),
    server("506", "Iberia", "International"),
    server("524", "Tigerghost", "International"),
    server("541", "Nyx", "International"),
    server("733", "Chione", "International"),
    server("599", "România", "Regional"),
    server("54", "Tara Româneascã", "Regional"),
    server("700", "Magyarország", "Regional"),
    server("701", "Česko", "Regional"),
    server("702", "Polska", "Regional"),
];

/// Maximum bonus rolls, keyed by the (German) bonus label the marketplace emits.
pub const DEFAULT_BONUS_CAPS: &[(&str, i64)] = &[
    // Stats
    ("Stärke", 12),
    ("Intelligenz", 12),
    ("Vitalität", 12),
    ("Beweglichkeit", 12),
    ("Max. TP", 2000),
    ("Max. MP", 2000),
    // Combat speeds
    ("Angriffsgeschwindigkeit", 8),
    ("Zaubergeschwindigkeit", 20),
    ("Angriffswert", 50),
    // Critical / penetrate
    ("Chance auf krit. Treffer", 10),
    ("Chance auf durchbohrenden Treffer", 10),
    ("Vergiftungschance", 8),
    ("Ohnmachtschance", 8),
    ("Verlangsamungschance", 8),
    // Strong against
    ("Stark gegen Halbmenschen", 10),
    ("Stark gegen Tiere", 20),
    ("Stark gegen Orks", 20),
    ("Stark gegen Esoterische", 20),
    ("Stark gegen Untote", 20),
    ("Stark gegen Teufel", 20),
    ("Stark gegen Monster", 25),
    ("Stark gegen Krieger", 10),
    ("Stark gegen Ninja", 10),
    ("Stark gegen Sura", 10),
    ("Stark gegen Schamanen", 10),
    ("Stark gegen Lykaner", 10),
    ("Stark gegen Zodiakmonster", 10),
    ("Stark gegen Insekten", 10),
    ("Stark gegen Wüstenmonster", 10),
    ("Stark gegen Metinsteine", 10),
    ("Stark gegen Mysterien", 10),
    ("Stark gegen Drachen", 10),
    ("Stark gegen Mondschatten", 10),
    // Weapon defenses
    ("Schwertverteidigung", 15),
    ("Zweihänderverteidigung", 15),
    ("Dolchverteidigung", 15),
    ("Glockenverteidigung", 15),
    ("Fächerverteidigung", 15),
    ("Pfeilverteidigung", 15),
    ("Krallenverteidigung", 15),
    // Resistances
    ("Feuerwiderstand", 15),
    ("Blitzwiderstand", 15),
    ("Magiewiderstand", 15),
    ("Windwiderstand", 15),
    ("Eiswiderstand", 15),
    ("Erdwiderstand", 15),
    ("Widerstand gegen Dunkelheit", 15),
    ("Giftwiderstand", 15),
    // Absorption
    ("Schaden wird von TP absorbiert", 10),
    ("Schaden wird von MP absorbiert", 10),
    ("Nahkampftreffer zu reflektieren", 15),
    ("Nahkampfangriff abzublocken", 15),
    // Regeneration
    ("TP-Regeneration", 30),
    ("MP-Regeneration", 30),
    // Skill damage
    ("Fertigkeitsschaden", 20),
    ("Durchschn. Schaden", 50),
    // EXP / drop
    ("Chance auf EXP-Bonus", 20),
    ("doppelte Menge von Gegenständen", 20),
    ("doppelte Menge Yang", 20),
    // Elemental powers
    ("Kraft der Blitze", 10),
    ("Kraft des Feuers", 10),
    ("Kraft des Eises", 10),
    ("Kraft des Windes", 10),
    ("Kraft der Erde", 10),
    ("Kraft der Dunkelheit", 10),
    // Boss damage
    ("Angriffsschaden gegen Bosse", 10),
    ("Fertigkeitsschaden gegen Bosse", 10),
    // Class defense
    ("Abwehrchance gegen Kriegerangriffe", 10),
    ("Abwehrchance gegen Ninjaangriffe", 10),
    ("Abwehrchance gegen Suraangriffe", 10),
    ("Abwehrchance gegen Schamanenangriffe", 10),
    ("Abwehrchance gegen Lykaner", 10),
    // Critical / penetrate resistance
    ("Widerstand gegen kritischen Treffer", 10),
    ("Widerstand gegen durchbohrenden Treffer", 10),
    ("Widerstand gegen Blutungsangriff", 10),
    ("Blutungsangriff", 10),
];

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Base URL of the external scraper service (LISTING_SOURCE_URL)
    pub listing_source_url: String,
    /// Width of a price-history bucket in seconds (BUCKET_GRANULARITY_SECS)
    pub bucket_granularity_secs: i64,
    /// Buckets with fewer priced listings report no bottom-20% average (BOTTOM20_MIN_SAMPLE)
    pub bottom20_min_sample: usize,
    /// Watchlist polling period (SCHEDULER_TICK_SECS)
    pub scheduler_tick_secs: u64,
    /// Optional JSON object `{ "bonus label": cap }` replacing the built-in caps (BONUS_CAPS_PATH)
    pub bonus_caps_path: Option<String>,
    pub telegram_api_url: String,
    /// Seed for the `telegram_settings` row when none is stored yet
    /// (TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID)
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// First-run watchlist seed (SEED_QUERY / SEED_SERVER)
    pub seed_query: Option<String>,
    pub seed_server: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bucket_granularity_secs: i64 = parse_env("BUCKET_GRANULARITY_SECS", 60)?;
        if bucket_granularity_secs <= 0 {
            return Err(AppError::Config(
                "BUCKET_GRANULARITY_SECS must be a positive number of seconds".to_string(),
            ));
        }
        let scheduler_tick_secs: u64 = parse_env("SCHEDULER_TICK_SECS", SCHEDULER_TICK_SECS)?;
        if scheduler_tick_secs == 0 {
            return Err(AppError::Config(
                "SCHEDULER_TICK_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "market.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            listing_source_url: std::env::var("LISTING_SOURCE_URL")
                .unwrap_or_else(|_| LISTING_SOURCE_URL.to_string()),
            bucket_granularity_secs,
            bottom20_min_sample: parse_env("BOTTOM20_MIN_SAMPLE", 1)?,
            scheduler_tick_secs,
            bonus_caps_path: non_empty_env("BONUS_CAPS_PATH"),
            telegram_api_url: std::env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| TELEGRAM_API_URL.to_string()),
            telegram_bot_token: non_empty_env("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty_env("TELEGRAM_CHAT_ID"),
            seed_query: non_empty_env("SEED_QUERY"),
            seed_server: non_empty_env("SEED_SERVER"),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match non_empty_env(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| AppError::Config(format!("{name} has an invalid value: '{raw}'")))
}
