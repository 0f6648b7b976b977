// =============================================================================
// Startup configuration — read once from the environment
// =============================================================================
//
// Every knob is an environment variable with a `FXRELAY_` prefix (dotenv is
// honoured by main.rs before this runs). There is no hot reload: the struct
// is built once at process start and shared read-only behind the AppState.
//
// Unparseable numeric values fall back to their defaults with a warning;
// invalid structural values (pair, mode, schedule, offset) fail startup.

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use tracing::{info, warn};

// =============================================================================
// Defaults
// =============================================================================

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_PAIR: &str = "USD-BRL";
const DEFAULT_EXCHANGE_SYMBOL: &str = "USDTBRL";
const DEFAULT_FEED_URL: &str = "wss://marketdata.tradermade.com/feedadv";
const DEFAULT_FEED_SYMBOL: &str = "USDBRL";
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;
const DEFAULT_BACKOFF_CAP_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX: u32 = 30;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_HEARTBEAT_SECS: u64 = 60;
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 2500;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;
const DEFAULT_SYNTHETIC_SPREAD_PCT: f64 = 0.5;
const DEFAULT_MIN_SPREAD: f64 = 0.0;
const DEFAULT_SCHEDULE_UTC_OFFSET: &str = "-03:00";
const DEFAULT_BINANCE_BASE_URL: &str = "https://api.binance.com";
const DEFAULT_AWESOME_BASE_URL: &str = "https://economia.awesomeapi.com.br";
const DEFAULT_ER_API_BASE_URL: &str = "https://open.er-api.com";

// =============================================================================
// Mode & schedule
// =============================================================================

/// How the update worker refreshes the cache. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Mode A: persistent WebSocket ingestion with reconnect/backoff.
    Ingest,
    /// Mode B: scheduled pulls through the aggregator.
    Pull,
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Mode B cadence: a short fixed interval, or fixed daily wall-clock
/// triggers evaluated in the configured UTC offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Interval(u64),
    Daily(Vec<(u32, u32)>),
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,

    /// Display pair, e.g. "USD-BRL".
    pub pair: String,
    pub base_ccy: String,
    pub quote_ccy: String,
    /// Exchange ticker used by the book-ticker provider, e.g. "USDTBRL".
    pub exchange_symbol: String,

    pub mode: WorkerMode,

    // -- Mode A: ingestion link ----------------------------------------------
    pub feed_url: String,
    pub feed_api_key: String,
    pub feed_symbol: String,
    pub keepalive_secs: u64,
    pub max_reconnect_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,

    // -- Mode B: schedule ----------------------------------------------------
    pub schedule: Schedule,
    pub schedule_utc_offset: FixedOffset,

    // -- Endpoints -----------------------------------------------------------
    pub refresh_secret: String,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub heartbeat_secs: u64,

    // -- Providers -----------------------------------------------------------
    pub provider_timeout_ms: u64,
    pub synthetic_spread_pct: f64,
    pub min_spread: f64,
    pub binance_base_url: String,
    pub awesome_base_url: String,
    pub er_api_base_url: String,
}

impl Settings {
    /// Build the full configuration from the environment. Fails fast on
    /// structurally invalid values — notably ingest mode without a feed
    /// credential, which signals the deployment should run in pull mode.
    pub fn from_env() -> Result<Self> {
        let pair = env_string("FXRELAY_PAIR", DEFAULT_PAIR).to_uppercase();
        let (base_ccy, quote_ccy) = parse_pair(&pair)?;

        let feed_api_key = env_string("FXRELAY_FEED_API_KEY", "");

        let mode = match std::env::var("FXRELAY_MODE") {
            Ok(raw) => match raw.to_lowercase().as_str() {
                "ingest" => WorkerMode::Ingest,
                "pull" => WorkerMode::Pull,
                other => bail!("invalid FXRELAY_MODE '{other}' — use 'ingest' or 'pull'"),
            },
            // Without an explicit mode, the presence of a feed credential
            // selects ingestion.
            Err(_) => {
                if feed_api_key.is_empty() {
                    WorkerMode::Pull
                } else {
                    WorkerMode::Ingest
                }
            }
        };

        if mode == WorkerMode::Ingest && feed_api_key.is_empty() {
            bail!(
                "FXRELAY_FEED_API_KEY is required for ingest mode; \
                 set FXRELAY_MODE=pull to run on scheduled pulls instead"
            );
        }

        let schedule = match std::env::var("FXRELAY_DAILY_TRIGGERS") {
            Ok(raw) => Schedule::Daily(parse_daily_triggers(&raw)?),
            Err(_) => Schedule::Interval(env_parse(
                "FXRELAY_REFRESH_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL_SECS,
            )),
        };

        let offset_raw = env_string("FXRELAY_SCHEDULE_UTC_OFFSET", DEFAULT_SCHEDULE_UTC_OFFSET);
        let schedule_utc_offset = parse_utc_offset(&offset_raw)
            .with_context(|| format!("invalid FXRELAY_SCHEDULE_UTC_OFFSET '{offset_raw}'"))?;

        Ok(Self {
            bind_addr: env_string("FXRELAY_BIND_ADDR", DEFAULT_BIND_ADDR),
            pair,
            base_ccy,
            quote_ccy,
            exchange_symbol: env_string("FXRELAY_EXCHANGE_SYMBOL", DEFAULT_EXCHANGE_SYMBOL)
                .to_uppercase(),
            mode,
            feed_url: env_string("FXRELAY_FEED_URL", DEFAULT_FEED_URL),
            feed_api_key,
            feed_symbol: env_string("FXRELAY_FEED_SYMBOL", DEFAULT_FEED_SYMBOL).to_uppercase(),
            keepalive_secs: env_parse("FXRELAY_KEEPALIVE_SECS", DEFAULT_KEEPALIVE_SECS),
            max_reconnect_attempts: env_parse(
                "FXRELAY_MAX_RECONNECT_ATTEMPTS",
                DEFAULT_MAX_RECONNECT_ATTEMPTS,
            ),
            backoff_base_secs: env_parse("FXRELAY_BACKOFF_BASE_SECS", DEFAULT_BACKOFF_BASE_SECS),
            backoff_cap_secs: env_parse("FXRELAY_BACKOFF_CAP_SECS", DEFAULT_BACKOFF_CAP_SECS),
            schedule,
            schedule_utc_offset,
            refresh_secret: env_string("FXRELAY_REFRESH_SECRET", ""),
            rate_limit_max: env_parse("FXRELAY_RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX),
            rate_limit_window_secs: env_parse(
                "FXRELAY_RATE_LIMIT_WINDOW_SECS",
                DEFAULT_RATE_LIMIT_WINDOW_SECS,
            ),
            heartbeat_secs: env_parse("FXRELAY_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS),
            provider_timeout_ms: env_parse(
                "FXRELAY_PROVIDER_TIMEOUT_MS",
                DEFAULT_PROVIDER_TIMEOUT_MS,
            ),
            synthetic_spread_pct: env_parse(
                "FXRELAY_SYNTHETIC_SPREAD_PCT",
                DEFAULT_SYNTHETIC_SPREAD_PCT,
            ),
            min_spread: env_parse("FXRELAY_MIN_SPREAD", DEFAULT_MIN_SPREAD),
            binance_base_url: env_string("FXRELAY_BINANCE_BASE_URL", DEFAULT_BINANCE_BASE_URL),
            awesome_base_url: env_string("FXRELAY_AWESOME_BASE_URL", DEFAULT_AWESOME_BASE_URL),
            er_api_base_url: env_string("FXRELAY_ER_API_BASE_URL", DEFAULT_ER_API_BASE_URL),
        })
    }

    /// Log the effective configuration at startup. The feed credential is
    /// never printed.
    pub fn log_summary(&self) {
        info!(
            pair = %self.pair,
            mode = %self.mode,
            bind_addr = %self.bind_addr,
            feed_credential = if self.feed_api_key.is_empty() { "absent" } else { "present" },
            rate_limit = format!("{}/{}s", self.rate_limit_max, self.rate_limit_window_secs),
            schedule = ?self.schedule,
            "configuration loaded"
        );
    }
}

// =============================================================================
// Env helpers
// =============================================================================

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, fallback = %default, "unparseable value — using default");
            default
        }),
        Err(_) => default,
    }
}

// =============================================================================
// Structural parsers
// =============================================================================

/// Split a "BASE-QUOTE" pair into its currency codes.
fn parse_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('-') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
            Ok((base.to_string(), quote.to_string()))
        }
        _ => bail!("invalid pair '{pair}' — expected the form 'USD-BRL'"),
    }
}

/// Parse "HH:MM,HH:MM,..." into sorted (hour, minute) trigger points.
fn parse_daily_triggers(raw: &str) -> Result<Vec<(u32, u32)>> {
    let mut triggers = Vec::new();

    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (h, m) = part
            .split_once(':')
            .with_context(|| format!("invalid trigger '{part}' — expected HH:MM"))?;
        let hour: u32 = h
            .parse()
            .with_context(|| format!("invalid hour in trigger '{part}'"))?;
        let minute: u32 = m
            .parse()
            .with_context(|| format!("invalid minute in trigger '{part}'"))?;
        if hour >= 24 || minute >= 60 {
            bail!("trigger '{part}' is out of range");
        }
        triggers.push((hour, minute));
    }

    if triggers.is_empty() {
        bail!("FXRELAY_DAILY_TRIGGERS is set but contains no triggers");
    }

    triggers.sort_unstable();
    triggers.dedup();
    Ok(triggers)
}

/// Parse a "+HH:MM" / "-HH:MM" UTC offset into a chrono [`FixedOffset`].
fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1i32, &raw[1..]),
        Some(b'-') => (-1i32, &raw[1..]),
        _ => bail!("offset must start with '+' or '-'"),
    };

    let (h, m) = rest
        .split_once(':')
        .context("offset must have the form +HH:MM")?;
    let hours: i32 = h.parse().context("invalid offset hours")?;
    let minutes: i32 = m.parse().context("invalid offset minutes")?;
    if hours > 23 || minutes > 59 {
        bail!("offset out of range");
    }

    let secs = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(secs).context("offset out of range")
}

// =============================================================================
// Test fixture
// =============================================================================

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        bind_addr: "127.0.0.1:0".into(),
        pair: "USD-BRL".into(),
        base_ccy: "USD".into(),
        quote_ccy: "BRL".into(),
        exchange_symbol: "USDTBRL".into(),
        mode: WorkerMode::Pull,
        feed_url: "ws://127.0.0.1:9/feed".into(),
        feed_api_key: String::new(),
        feed_symbol: "USDBRL".into(),
        keepalive_secs: DEFAULT_KEEPALIVE_SECS,
        max_reconnect_attempts: 3,
        backoff_base_secs: 1,
        backoff_cap_secs: 4,
        schedule: Schedule::Interval(300),
        schedule_utc_offset: parse_utc_offset("-03:00").unwrap(),
        refresh_secret: "test-secret".into(),
        rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
        rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
        provider_timeout_ms: 200,
        synthetic_spread_pct: DEFAULT_SYNTHETIC_SPREAD_PCT,
        min_spread: DEFAULT_MIN_SPREAD,
        binance_base_url: "http://127.0.0.1:9".into(),
        awesome_base_url: "http://127.0.0.1:9".into(),
        er_api_base_url: "http://127.0.0.1:9".into(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pair_splits_currencies() {
        let (base, quote) = parse_pair("USD-BRL").unwrap();
        assert_eq!(base, "USD");
        assert_eq!(quote, "BRL");
    }

    #[test]
    fn parse_pair_rejects_malformed() {
        assert!(parse_pair("USDBRL").is_err());
        assert!(parse_pair("-BRL").is_err());
        assert!(parse_pair("USD-").is_err());
    }

    #[test]
    fn parse_daily_triggers_sorts_and_dedups() {
        let triggers = parse_daily_triggers("16:00, 10:00,16:00").unwrap();
        assert_eq!(triggers, vec![(10, 0), (16, 0)]);
    }

    #[test]
    fn parse_daily_triggers_rejects_out_of_range() {
        assert!(parse_daily_triggers("24:00").is_err());
        assert!(parse_daily_triggers("10:60").is_err());
        assert!(parse_daily_triggers("").is_err());
        assert!(parse_daily_triggers("ten o'clock").is_err());
    }

    #[test]
    fn parse_utc_offset_handles_both_signs() {
        assert_eq!(
            parse_utc_offset("-03:00").unwrap(),
            FixedOffset::west_opt(3 * 3600).unwrap()
        );
        assert_eq!(
            parse_utc_offset("+05:30").unwrap(),
            FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()
        );
    }

    #[test]
    fn parse_utc_offset_rejects_malformed() {
        assert!(parse_utc_offset("03:00").is_err());
        assert!(parse_utc_offset("-3").is_err());
        assert!(parse_utc_offset("-25:00").is_err());
    }
}
