//! Run configuration.
//!
//! [`Settings`] enumerates every knob named in the external-interfaces contract. Building
//! one from the process environment is a thin convenience on top of
//! [`shared_utils::env::get_env_var`]; nothing here performs I/O beyond reading env vars.

use shared_utils::config::ConfigError;
use shared_utils::env::{MissingEnvVarError, get_env_var};
use snafu::{ResultExt, Snafu};

/// Run-scoped configuration for a single symbol's ingestion core.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Trading symbol this run ingests (e.g. `BTCUSDT`). One symbol per run.
    pub symbol: String,
    /// Root of the output lake; partitions land under `<root>/futures/um/minute/...`.
    pub root_dir: String,
    /// Path to the SQLite ledger file.
    pub state_db: String,
    /// Base URL of the daily-archive object store (Binance Vision).
    pub vision_base_url: String,
    /// Base URL of the REST API.
    pub rest_base_url: String,
    /// Minutes subtracted from "now" to compute the target horizon; absorbs upstream lag.
    pub safety_lag_minutes: i64,
    /// Minutes to look back when bootstrapping a watermark that has never been set.
    pub bootstrap_lookback_minutes: i64,
    /// Closed hours within this many days of the target horizon are WARM, not COLD.
    pub warm_days: i64,
    /// Maximum minutes a mark/index price value may be forward-filled.
    pub max_ffill_minutes: i64,
    /// Bounded retry count for the REST client on 429/5xx.
    pub rest_retries: u32,
    /// Log level name, consumed only by the external logging-setup collaborator.
    pub log_level: String,
}

/// Errors raised while building [`Settings`] from the process environment.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SettingsError {
    /// A required environment variable was not set at all.
    #[snafu(display("{source}"))]
    MissingEnvVar {
        #[snafu(backtrace)]
        source: MissingEnvVarError,
    },
    /// A tuning-knob environment variable was set but could not be parsed for its field.
    #[snafu(display("{source}"))]
    InvalidValue { source: ConfigError },
}

impl Settings {
    /// Construct a [`Settings`] from well-known environment variables, defaulting the
    /// tuning knobs that have sensible defaults but rejecting one that is set to a
    /// value that doesn't parse.
    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            symbol: get_env_var("INGESTOR_SYMBOL").context(MissingEnvVarSnafu)?,
            root_dir: get_env_var("INGESTOR_ROOT_DIR").context(MissingEnvVarSnafu)?,
            state_db: get_env_var("INGESTOR_STATE_DB").context(MissingEnvVarSnafu)?,
            vision_base_url: std::env::var("INGESTOR_VISION_BASE_URL")
                .unwrap_or_else(|_| "https://data.binance.vision".to_string()),
            rest_base_url: std::env::var("INGESTOR_REST_BASE_URL")
                .unwrap_or_else(|_| "https://fapi.binance.com".to_string()),
            safety_lag_minutes: env_i64("INGESTOR_SAFETY_LAG_MINUTES", 2).context(InvalidValueSnafu)?,
            bootstrap_lookback_minutes: env_i64("INGESTOR_BOOTSTRAP_LOOKBACK_MINUTES", 60).context(InvalidValueSnafu)?,
            warm_days: env_i64("INGESTOR_WARM_DAYS", 2).context(InvalidValueSnafu)?,
            max_ffill_minutes: env_i64("INGESTOR_MAX_FFILL_MINUTES", 60).context(InvalidValueSnafu)?,
            rest_retries: env_i64("INGESTOR_REST_RETRIES", 3).context(InvalidValueSnafu)? as u32,
            log_level: std::env::var("INGESTOR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// Parse `name` as an `i64`, falling back to `default` when unset; a value that is set
/// but fails to parse is a configuration error, not a silent fallback.
fn env_i64(name: &str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("expected an integer, got '{raw}'"),
        }),
    }
}
