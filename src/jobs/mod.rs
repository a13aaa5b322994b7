//! Scheduled Jobs
//!
//! Background jobs that run next to the ledger. The balance closing job fixes
//! per-account snapshots so balance reads only sum recent movements.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::interval;

use crate::accounts::AccountDirectory;
use crate::db::{StoreContext, StoreError};
use crate::domain::{compute_balance, Turnover};
use crate::ledger::LedgerStore;

// =========================================================================
// Balance closing
// =========================================================================

/// Fix one snapshot at `cutoff` for every account opened before it.
///
/// Each snapshot is the previous snapshot plus the movements dated in
/// `[previous, cutoff)`. Accounts already closed at `cutoff` are skipped, so
/// re-running with the same cutoff changes nothing.
pub async fn close_balances(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<ClosingReport, JobError> {
    let mut conn = pool.acquire().await.context("acquiring connection")?;
    let accounts = AccountDirectory::accounts_opened_before(&mut conn, cutoff).await?;

    let mut report = ClosingReport {
        cutoff,
        ..ClosingReport::default()
    };

    for account in &accounts {
        let previous = LedgerStore::snapshot_with(&mut conn, account, cutoff).await?;

        if previous.as_ref().is_some_and(|s| s.as_of == cutoff) {
            report.accounts_skipped += 1;
            continue;
        }

        let from = previous.as_ref().map(|s| s.as_of);
        let turnover =
            LedgerStore::turnover_with(&mut conn, &account.number, from, Some(cutoff)).await?;
        let balance = compute_balance(account.sign, previous.as_ref(), &turnover);
        let totals = Turnover {
            debit: previous.as_ref().map_or(0, |s| s.debit_total) + turnover.debit,
            credit: previous.as_ref().map_or(0, |s| s.credit_total) + turnover.credit,
        };

        match LedgerStore::fix_balance_with(&mut conn, account, cutoff, balance, totals).await? {
            Some(_) => report.accounts_closed += 1,
            // Another closer got there first
            None => report.accounts_skipped += 1,
        }
    }

    if report.accounts_closed > 0 {
        tracing::info!(
            %cutoff,
            accounts_closed = report.accounts_closed,
            accounts_skipped = report.accounts_skipped,
            "Closed account balances"
        );
    }

    Ok(report)
}

/// Closing cutoff for `now`: the start of the UTC day `lag` ago.
///
/// Trailing `now` keeps in-flight transactions from landing behind a fresh snapshot.
pub fn closing_cutoff(now: DateTime<Utc>, lag: Duration) -> Result<DateTime<Utc>, JobError> {
    let delta = chrono::Duration::from_std(lag).map_err(|_| JobError::InvalidLag(lag))?;
    let shifted = now
        .checked_sub_signed(delta)
        .ok_or(JobError::InvalidLag(lag))?;

    Ok(Utc.from_utc_datetime(&shifted.date_naive().and_time(NaiveTime::MIN)))
}

/// Result of one closing run
#[derive(Debug, Clone, Default)]
pub struct ClosingReport {
    pub cutoff: DateTime<Utc>,
    pub accounts_closed: u64,
    pub accounts_skipped: u64,
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// How often to attempt balance closing (default: 1 hour)
    pub balance_closing_interval: Duration,
    /// How far the closing cutoff trails `now` (default: 1 hour)
    pub balance_closing_lag: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            balance_closing_interval: Duration::from_secs(3600),
            balance_closing_lag: Duration::from_secs(3600),
        }
    }
}

/// Job Scheduler - runs periodic ledger maintenance
pub struct JobScheduler {
    pool: PgPool,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn with_config(pool: PgPool, config: JobSchedulerConfig) -> Self {
        Self { pool, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.balance_closing_interval.as_secs(),
            "Job scheduler started"
        );

        if self.config.balance_closing_interval.is_zero() {
            tracing::error!("Balance closing interval is zero, job scheduler stopped");
            return;
        }

        let mut closing_interval = interval(self.config.balance_closing_interval);

        loop {
            closing_interval.tick().await;
            if let Err(e) = self.close_once(Utc::now()).await {
                tracing::error!(error = %e, "Balance closing failed");
            }
        }
    }

    /// Run balance closing once for `now` (for manual trigger or testing)
    pub async fn close_once(&self, now: DateTime<Utc>) -> Result<ClosingReport, JobError> {
        let cutoff = closing_cutoff(now, self.config.balance_closing_lag)?;
        close_balances(&self.pool, cutoff).await
    }
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Closing lag out of range: {0:?}")]
    InvalidLag(Duration),
}

// =========================================================================
// Tests
// =========================================================================
