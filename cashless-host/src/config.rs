//! Host configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use cashless_icd::card::CHECK_CARD_TIMEOUT;
use cashless_icd::cashless_device::CashlessConfig;

use crate::error::{HostError, Result};

pub const COMMAND_POLL_BACKOFF: Duration = Duration::from_millis(50);
pub const CARD_CHECK_GRACE: Duration = Duration::from_secs(5);
pub const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Reader setup pushed to the cashless bus at start-up
    pub cashless: CashlessConfig,

    /// Card check timeout handed to the payment kernel
    pub card_check_timeout: Duration,

    /// How much longer than `card_check_timeout` to wait on a silent kernel
    pub card_check_grace: Duration,

    /// Sleep after an empty controller poll
    pub command_poll_backoff: Duration,

    /// Status events buffered per subscriber
    pub event_capacity: usize,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    pub log_level: String,

    pub json_logs: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cashless: CashlessConfig::default(),
            card_check_timeout: CHECK_CARD_TIMEOUT,
            card_check_grace: CARD_CHECK_GRACE,
            command_poll_backoff: COMMAND_POLL_BACKOFF,
            event_capacity: EVENT_CAPACITY,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl HostConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CASHLESS_FEATURE_LEVEL`: reader feature level (default: 3)
    /// - `CASHLESS_CURRENCY_CODE`: ISO 4217 numeric currency (default: 840)
    /// - `CASHLESS_SCALE_FACTOR`: price scale factor (default: 100)
    /// - `CASHLESS_DECIMAL_PLACES`: price decimal places (default: 2)
    /// - `CASHLESS_MAX_RESPONSE_SECS`: reader max response time (default: 30)
    /// - `CASHLESS_MISC_OPTIONS`: reader option bits (default: 0)
    /// - `CASHLESS_DRIVER_LOG_LEVEL`: cashless driver verbosity (default: 3)
    /// - `CASHLESS_CARD_TIMEOUT_SECS`: card check timeout (default: 60)
    /// - `CASHLESS_CARD_GRACE_SECS`: extra wait on a silent kernel (default: 5)
    /// - `CASHLESS_POLL_BACKOFF_MS`: controller poll backoff (default: 50)
    /// - `CASHLESS_EVENT_CAPACITY`: status buffer size (default: 64)
    /// - `CASHLESS_LOG_LEVEL` or `RUST_LOG`: log filter (default: info)
    /// - `CASHLESS_JSON_LOGS`: JSON formatted logs (default: false)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`HostConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = HostConfig::default();
        let reader = defaults.cashless;

        let cashless = CashlessConfig {
            feature_level: parse_or(&lookup, "CASHLESS_FEATURE_LEVEL", reader.feature_level)?,
            currency_code: parse_or(&lookup, "CASHLESS_CURRENCY_CODE", reader.currency_code)?,
            scale_factor: parse_or(&lookup, "CASHLESS_SCALE_FACTOR", reader.scale_factor)?,
            decimal_places: parse_or(&lookup, "CASHLESS_DECIMAL_PLACES", reader.decimal_places)?,
            max_response_time_secs: parse_or(
                &lookup,
                "CASHLESS_MAX_RESPONSE_SECS",
                reader.max_response_time_secs,
            )?,
            misc_options: parse_or(&lookup, "CASHLESS_MISC_OPTIONS", reader.misc_options)?,
            driver_log_level: parse_or(&lookup, "CASHLESS_DRIVER_LOG_LEVEL", reader.driver_log_level)?,
        };

        let card_timeout_secs = parse_or(
            &lookup,
            "CASHLESS_CARD_TIMEOUT_SECS",
            defaults.card_check_timeout.as_secs(),
        )?;
        if card_timeout_secs == 0 {
            return Err(HostError::Config {
                key: "CASHLESS_CARD_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            cashless,
            card_check_timeout: Duration::from_secs(card_timeout_secs),
            card_check_grace: Duration::from_secs(parse_or(
                &lookup,
                "CASHLESS_CARD_GRACE_SECS",
                defaults.card_check_grace.as_secs(),
            )?),
            command_poll_backoff: Duration::from_millis(parse_or(
                &lookup,
                "CASHLESS_POLL_BACKOFF_MS",
                defaults.command_poll_backoff.as_millis() as u64,
            )?),
            event_capacity: parse_or(&lookup, "CASHLESS_EVENT_CAPACITY", defaults.event_capacity)?,
            log_level: lookup("CASHLESS_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            json_logs: lookup("CASHLESS_JSON_LOGS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(defaults.json_logs),
        })
    }

    /// Longest the core waits for a card check outcome before giving up on the kernel
    pub fn card_check_deadline(&self) -> Duration {
        self.card_check_timeout + self.card_check_grace
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| HostError::Config { key, value }),
        None => Ok(default),
    }
}
