//! Database module
//!
//! Connection pool setup, schema verification and the error type shared by
//! every query in the crate.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::Config;
use crate::domain::{DomainError, ErrorKind};

/// PostgreSQL SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL SQLSTATE for query_canceled (raised by statement_timeout)
const QUERY_CANCELED: &str = "57014";

/// Open the pool. Every connection carries the configured statement timeout so no
/// query can block a request indefinitely.
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    let timeout_ms = config.database_statement_timeout.as_millis().to_string();
    let options = PgConnectOptions::from_str(&config.database_url)?
        .options([("statement_timeout", timeout_ms.as_str())]);

    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.database_statement_timeout)
        .connect_with(options)
        .await
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Check if required tables exist.
/// Migrations live in migrations/ and are applied by the deployment's migration runner.
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let required_tables = [
        "api_keys",
        "person",
        "account",
        "balance_snapshot",
        "movement",
        "orders",
    ];

    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table, "Required table does not exist");
            return Ok(false);
        }
    }

    Ok(true)
}

/// Errors raised by anything that talks to the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Expected business outcome (duplicate order, insufficient funds, ...)
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Query failed; `context` names the step that issued it
    #[error("Database error while {context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Statement timeout or pool acquire timeout
    #[error("Timed out while {context}")]
    Timeout {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A row holds a value the domain cannot represent
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StoreError {
    /// Wrap a sqlx error with the step it happened in
    pub fn from_sqlx(context: &'static str, source: sqlx::Error) -> Self {
        let timed_out = match &source {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(QUERY_CANCELED),
            _ => false,
        };

        if timed_out {
            Self::Timeout { context, source }
        } else {
            Self::Database { context, source }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(e) => e.kind(),
            Self::Database { .. } | Self::Timeout { .. } | Self::InvalidData(_) => {
                ErrorKind::StoreFault
            }
        }
    }
}

/// Attach a context label to sqlx results
pub trait StoreContext<T> {
    fn context(self, context: &'static str) -> Result<T, StoreError>;
}

impl<T> StoreContext<T> for Result<T, sqlx::Error> {
    fn context(self, context: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::from_sqlx(context, source))
    }
}

/// Check if an error is a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == UNIQUE_VIOLATION;
        }
    }
    false
}

/// Parse a text column into a domain enum
pub(crate) fn decode_column<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(StoreError::InvalidData)
}
