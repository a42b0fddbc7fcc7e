// =============================================================================
// config.rs — EVERY KNOB THE SETTLEMENT ENGINE HAS
// =============================================================================
//
// Fare rules, breaker thresholds, where the pricing engine lives, where
// trips get written down, and which ports to listen on.
//
// All values can be overridden via environment variables prefixed with
// TRIP_SETTLEMENT_. A `.env` file is honored if present. Malformed values
// fall back to the default with a warning rather than refusing to boot;
// values that parse but break a fare-rule invariant DO refuse to boot
// (see `FareRules::validate`).
// =============================================================================

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::error::{SettlementError, SettlementResult};

const PREFIX: &str = "TRIP_SETTLEMENT_";

/// Immutable, process-wide fare rules. Loaded once; shared by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FareRules {
    /// Price per kilometre before any discount.
    pub base_rate_per_km: Decimal,

    pub off_peak_enabled: bool,
    pub off_peak_rate: Decimal,
    /// First off-peak hour, inclusive.
    pub off_peak_start_hour: u32,
    /// First hour after the window, exclusive. `start > end` wraps midnight.
    pub off_peak_end_hour: u32,

    pub loyalty_enabled: bool,
    pub loyalty_rate: Decimal,
    /// The rider's trip count must be strictly greater than this.
    pub loyalty_min_trips: u64,

    pub daily_cap_enabled: bool,
    pub daily_cap: Decimal,

    /// Offset of the local clock the off-peak window is expressed in.
    pub utc_offset: FixedOffset,
}

impl Default for FareRules {
    fn default() -> Self {
        Self {
            base_rate_per_km: dec!(100),
            off_peak_enabled: true,
            off_peak_rate: dec!(0.10),
            off_peak_start_hour: 20,
            off_peak_end_hour: 6,
            loyalty_enabled: true,
            loyalty_rate: dec!(0.05),
            loyalty_min_trips: 10,
            daily_cap_enabled: true,
            daily_cap: dec!(3000),
            utc_offset: utc(),
        }
    }
}

impl FareRules {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let offset_minutes: i32 = env_parse("UTC_OFFSET_MINUTES", 0);
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| {
            warn!(
                offset_minutes,
                "UTC offset out of range — evaluating off-peak hours in UTC"
            );
            utc()
        });

        Self {
            base_rate_per_km: env_parse("BASE_RATE_PER_KM", defaults.base_rate_per_km),
            off_peak_enabled: env_parse("OFF_PEAK_ENABLED", defaults.off_peak_enabled),
            off_peak_rate: env_parse("OFF_PEAK_RATE", defaults.off_peak_rate),
            off_peak_start_hour: env_parse("OFF_PEAK_START_HOUR", defaults.off_peak_start_hour),
            off_peak_end_hour: env_parse("OFF_PEAK_END_HOUR", defaults.off_peak_end_hour),
            loyalty_enabled: env_parse("LOYALTY_ENABLED", defaults.loyalty_enabled),
            loyalty_rate: env_parse("LOYALTY_RATE", defaults.loyalty_rate),
            loyalty_min_trips: env_parse("LOYALTY_MIN_TRIPS", defaults.loyalty_min_trips),
            daily_cap_enabled: env_parse("DAILY_CAP_ENABLED", defaults.daily_cap_enabled),
            daily_cap: env_parse("DAILY_CAP", defaults.daily_cap),
            utc_offset,
        }
    }

    /// Rates are non-negative, the cap is non-negative, hours are in [0, 24).
    pub fn validate(&self) -> SettlementResult<()> {
        let rates = [
            ("base_rate_per_km", self.base_rate_per_km),
            ("off_peak_rate", self.off_peak_rate),
            ("loyalty_rate", self.loyalty_rate),
            ("daily_cap", self.daily_cap),
        ];
        for (name, value) in rates {
            if value < Decimal::ZERO {
                return Err(SettlementError::InvalidConfig(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        for (name, hour) in [
            ("off_peak_start_hour", self.off_peak_start_hour),
            ("off_peak_end_hour", self.off_peak_end_hour),
        ] {
            if hour >= 24 {
                return Err(SettlementError::InvalidConfig(format!(
                    "{name} must be in [0, 24), got {hour}"
                )));
            }
        }
        Ok(())
    }
}

/// Circuit breaker tuning for the pricing dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before letting a trial call through.
    pub reset_timeout: Duration,
    /// Concurrent trial calls allowed while half-open.
    pub half_open_max_calls: u32,
    /// Trial successes needed to close again.
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            success_threshold: 1,
        }
    }
}

/// Which billing collaborator settles trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMode {
    /// Always succeeds. Matches the behavior of the existing platform.
    Stub,
    /// Debits the rider's mobility pass.
    Pass,
}

impl FromStr for BillingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BillingMode::Stub),
            "pass" => Ok(BillingMode::Pass),
            other => Err(format!("unknown billing mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // PRICING
    // =========================================================================
    pub fare_rules: FareRules,

    /// Base URL of a remote pricing engine. `None` prices in-process.
    pub pricing_url: Option<String>,

    /// Upper bound on a single pricing call, remote or local.
    pub pricing_timeout: Duration,

    /// Degraded-mode price per km used whenever the engine can't answer.
    pub fallback_rate_per_km: Decimal,

    pub breaker: BreakerSettings,

    // =========================================================================
    // STORAGE
    // =========================================================================
    /// Redis connection URL. `None` keeps trips in memory.
    pub redis_url: Option<String>,

    /// Namespace for every Redis key this service writes.
    pub redis_key_prefix: String,

    // =========================================================================
    // BILLING
    // =========================================================================
    pub billing_mode: BillingMode,

    /// Balance credited to a rider's pass on first sight, `pass` mode only.
    pub pass_opening_balance: Decimal,

    // =========================================================================
    // NETWORK
    // =========================================================================
    pub http_bind: String,
    pub metrics_bind: String,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let defaults = BreakerSettings::default();

        Config {
            fare_rules: FareRules::from_env(),
            pricing_url: env_optional("PRICING_URL"),
            pricing_timeout: Duration::from_millis(env_parse("PRICING_TIMEOUT_MS", 2000)),
            fallback_rate_per_km: env_parse("FALLBACK_RATE_PER_KM", dec!(125)),
            breaker: BreakerSettings {
                failure_threshold: env_parse("CB_FAILURE_THRESHOLD", defaults.failure_threshold),
                reset_timeout: Duration::from_secs(env_parse(
                    "CB_RESET_TIMEOUT_SECS",
                    defaults.reset_timeout.as_secs(),
                )),
                half_open_max_calls: env_parse(
                    "CB_HALF_OPEN_MAX_CALLS",
                    defaults.half_open_max_calls,
                ),
                success_threshold: env_parse("CB_SUCCESS_THRESHOLD", defaults.success_threshold),
            },

            redis_url: env_optional("REDIS_URL"),
            redis_key_prefix: env_or_default("REDIS_KEY_PREFIX", "trips"),

            billing_mode: env_parse("BILLING_MODE", BillingMode::Stub),
            pass_opening_balance: env_parse("PASS_OPENING_BALANCE", dec!(10000)),

            http_bind: env_or_default("HTTP_BIND", "0.0.0.0:8080"),
            metrics_bind: env_or_default("METRICS_BIND", "0.0.0.0:9090"),
        }
    }

    pub fn validate(&self) -> SettlementResult<()> {
        self.fare_rules.validate()?;
        if self.fallback_rate_per_km < Decimal::ZERO {
            return Err(SettlementError::InvalidConfig(format!(
                "fallback_rate_per_km must be non-negative, got {}",
                self.fallback_rate_per_km
            )));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.half_open_max_calls == 0 {
            return Err(SettlementError::InvalidConfig(
                "breaker thresholds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(format!("{PREFIX}{key}")).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(format!("{PREFIX}{key}"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an env var, keeping the default (and saying so) when it's garbage.
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
{
    match env_optional(key) {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = %format!("{PREFIX}{key}"), value = %raw, default = %default, "Malformed config value — using default");
                default
            }
        },
    }
}

impl Display for BillingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingMode::Stub => write!(f, "stub"),
            BillingMode::Pass => write!(f, "pass"),
        }
    }
}
