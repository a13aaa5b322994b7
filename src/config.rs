//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::AccountSign;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Per-statement deadline applied to every pooled connection
    pub database_statement_timeout: Duration,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Deadline for a whole HTTP request
    pub request_timeout: Duration,

    /// Chart of accounts settings
    pub ledger: LedgerConfig,

    /// How often the balance closing job wakes up
    pub balance_closing_interval: Duration,

    /// How far behind `now` the closing cutoff trails
    pub balance_closing_lag: Duration,
}

/// Account numbering and sign settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Sign of newly opened person accounts; the clearing account gets the opposite
    pub person_account_sign: AccountSign,

    /// Bank-routing prefix of person account numbers
    pub account_number_prefix: String,

    /// Number of the shared clearing account
    pub clearing_account_number: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            person_account_sign: AccountSign::Passive,
            account_number_prefix: "408178101".to_string(),
            clearing_account_number: "30102810000000000001".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Person account number for a sequence value
    pub fn account_number(&self, serial: i64) -> String {
        format!("{}{:011}", self.account_number_prefix, serial)
    }

    pub fn clearing_account_sign(&self) -> AccountSign {
        self.person_account_sign.opposite()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;
        let database_statement_timeout =
            Duration::from_millis(parse_or("DATABASE_STATEMENT_TIMEOUT_MS", 5_000)?);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let request_timeout = Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 30)?);

        let defaults = LedgerConfig::default();
        let ledger = LedgerConfig {
            person_account_sign: parse_or("PERSON_ACCOUNT_SIGN", defaults.person_account_sign)?,
            account_number_prefix: env::var("ACCOUNT_NUMBER_PREFIX")
                .unwrap_or(defaults.account_number_prefix),
            clearing_account_number: env::var("CLEARING_ACCOUNT_NUMBER")
                .unwrap_or(defaults.clearing_account_number),
        };

        if ledger.account_number_prefix.is_empty()
            || !ledger.account_number_prefix.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ConfigError::InvalidValue("ACCOUNT_NUMBER_PREFIX"));
        }

        let balance_closing_interval = positive_secs("BALANCE_CLOSING_INTERVAL_SECS", 3600)?;
        let balance_closing_lag = Duration::from_secs(parse_or("BALANCE_CLOSING_LAG_SECS", 3600)?);

        Ok(Self {
            database_url,
            database_max_connections,
            database_statement_timeout,
            host,
            port,
            environment,
            request_timeout,
            ledger,
            balance_closing_interval,
            balance_closing_lag,
        })
    }
}

/// Read and parse an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Read a period in seconds that must not be zero
fn positive_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match parse_or(name, default)? {
        0 => Err(ConfigError::InvalidValue(name)),
        secs => Ok(Duration::from_secs(secs)),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
