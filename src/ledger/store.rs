//! Ledger Store
//!
//! Append-only movements and periodic balance snapshots. Balances are never cached:
//! every read starts from the latest snapshot and adds the turnover recorded since.
//!
//! A snapshot dated `D` absorbs every movement with `operation_date < D`, so
//! balance reads add the movements with `operation_date >= D`.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::db::{decode_column, StoreContext, StoreError};
use crate::domain::{
    compute_balance, compute_withdrawn, Account, AccountSign, BalanceSnapshot, DomainError,
    Movement, NewMovement, Turnover,
};

#[derive(sqlx::FromRow)]
struct MovementRow {
    id: i64,
    person_id: Option<i64>,
    order_number: Option<i64>,
    kind: String,
    status: String,
    operation_date: DateTime<Utc>,
    debit_account: String,
    credit_account: String,
    amount: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for Movement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(Movement {
            id: row.id,
            person_id: row.person_id,
            order_number: row.order_number,
            kind: decode_column(&row.kind)?,
            status: row.status,
            operation_date: row.operation_date,
            debit_account: row.debit_account,
            credit_account: row.credit_account,
            amount: row.amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    account_id: i64,
    account_number: String,
    as_of: DateTime<Utc>,
    balance: i64,
    debit_total: i64,
    credit_total: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SnapshotRow> for BalanceSnapshot {
    fn from(row: SnapshotRow) -> Self {
        BalanceSnapshot {
            id: row.id,
            account_id: row.account_id,
            account_number: row.account_number,
            as_of: row.as_of,
            balance: row.balance,
            debit_total: row.debit_total,
            credit_total: row.credit_total,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Ledger Store for movements and snapshots
#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: PgPool,
}

impl LedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, StoreError> {
        self.pool.acquire().await.context("acquiring connection")
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Current balance of an account in minor units
    pub async fn balance(&self, account: &Account) -> Result<i64, StoreError> {
        let mut conn = self.acquire().await?;
        Self::balance_with(&mut conn, account).await
    }

    pub async fn balance_with(
        conn: &mut PgConnection,
        account: &Account,
    ) -> Result<i64, StoreError> {
        let snapshot = Self::snapshot_with(conn, account, Utc::now()).await?;
        let from = snapshot.as_ref().map(|s| s.as_of);
        let since = Self::turnover_with(conn, &account.number, from, None).await?;

        Ok(compute_balance(account.sign, snapshot.as_ref(), &since))
    }

    /// Everything that ever left the account, in minor units
    pub async fn withdrawn_total(&self, account: &Account) -> Result<i64, StoreError> {
        let mut conn = self.acquire().await?;
        Self::withdrawn_total_with(&mut conn, account).await
    }

    pub async fn withdrawn_total_with(
        conn: &mut PgConnection,
        account: &Account,
    ) -> Result<i64, StoreError> {
        let snapshot = Self::snapshot_with(conn, account, Utc::now()).await?;
        let from = snapshot.as_ref().map(|s| s.as_of);
        let since = Self::turnover_with(conn, &account.number, from, None).await?;

        Ok(compute_withdrawn(account.sign, snapshot.as_ref(), &since))
    }

    /// Debit and credit sums of `account_number` over `[from, to)`; an open bound
    /// means the beginning or end of time.
    pub async fn turnover_with(
        conn: &mut PgConnection,
        account_number: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Turnover, StoreError> {
        let (debit, credit): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE debit_account = $1), 0)::BIGINT,
                COALESCE(SUM(amount) FILTER (WHERE credit_account = $1), 0)::BIGINT
            FROM movement
            WHERE (debit_account = $1 OR credit_account = $1)
              AND ($2::TIMESTAMPTZ IS NULL OR operation_date >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR operation_date < $3)
            "#,
        )
        .bind(account_number)
        .bind(from)
        .bind(to)
        .fetch_one(&mut *conn)
        .await
        .context("summing account turnover")?;

        Ok(Turnover { debit, credit })
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Latest fixed balance taken after the account was opened and no later than `as_of`.
    ///
    /// Accounts the closing job has not reached yet report `NoFixedBalance`.
    pub async fn snapshot(
        &self,
        account: &Account,
        as_of: DateTime<Utc>,
    ) -> Result<BalanceSnapshot, StoreError> {
        let mut conn = self.acquire().await?;
        Self::snapshot_with(&mut conn, account, as_of)
            .await?
            .ok_or_else(|| DomainError::NoFixedBalance(account.number.clone()).into())
    }

    pub async fn snapshot_with(
        conn: &mut PgConnection,
        account: &Account,
        as_of: DateTime<Utc>,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, account_number, as_of, balance, debit_total, credit_total,
                   created_at, updated_at
            FROM balance_snapshot
            WHERE account_id = $1 AND as_of > $2 AND as_of <= $3
            ORDER BY as_of DESC
            LIMIT 1
            "#,
        )
        .bind(account.id)
        .bind(account.created_at)
        .bind(as_of)
        .fetch_optional(&mut *conn)
        .await
        .context("loading balance snapshot")?;

        if row.is_none() {
            tracing::debug!(account = %account.number, %as_of, "No fixed balance yet");
        }

        Ok(row.map(BalanceSnapshot::from))
    }

    /// Store a fixed balance. Returns `None` when a snapshot already exists at `as_of`.
    pub async fn fix_balance_with(
        conn: &mut PgConnection,
        account: &Account,
        as_of: DateTime<Utc>,
        balance: i64,
        totals: Turnover,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            INSERT INTO balance_snapshot
                (account_id, account_number, as_of, balance, debit_total, credit_total)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (account_id, as_of) DO NOTHING
            RETURNING id, account_id, account_number, as_of, balance, debit_total, credit_total,
                      created_at, updated_at
            "#,
        )
        .bind(account.id)
        .bind(&account.number)
        .bind(as_of)
        .bind(balance)
        .bind(totals.debit)
        .bind(totals.credit)
        .fetch_optional(&mut *conn)
        .await
        .context("inserting balance snapshot")?;

        Ok(row.map(BalanceSnapshot::from))
    }

    // =========================================================================
    // Movements
    // =========================================================================

    /// Append one immutable movement
    pub async fn append_movement(&self, movement: NewMovement) -> Result<Movement, StoreError> {
        let mut conn = self.acquire().await?;
        Self::append_with(&mut conn, movement).await
    }

    pub async fn append_with(
        conn: &mut PgConnection,
        movement: NewMovement,
    ) -> Result<Movement, StoreError> {
        let row: MovementRow = sqlx::query_as(
            r#"
            INSERT INTO movement
                (person_id, order_number, kind, debit_account, credit_account, amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, person_id, order_number, kind, status, operation_date,
                      debit_account, credit_account, amount, created_at, updated_at
            "#,
        )
        .bind(movement.person_id)
        .bind(movement.order_number)
        .bind(movement.kind.as_str())
        .bind(&movement.debit_account)
        .bind(&movement.credit_account)
        .bind(movement.amount)
        .fetch_one(&mut *conn)
        .await
        .context("appending movement")?;

        let movement = Movement::try_from(row)?;

        tracing::debug!(
            movement_id = movement.id,
            kind = movement.kind.as_str(),
            debit = %movement.debit_account,
            credit = %movement.credit_account,
            amount = movement.amount,
            "Movement appended"
        );

        Ok(movement)
    }

    /// Movements that took points out of the account, newest first
    pub async fn outflows(&self, account: &Account) -> Result<Vec<Movement>, StoreError> {
        let mut conn = self.acquire().await?;
        Self::outflows_with(&mut conn, account).await
    }

    pub async fn outflows_with(
        conn: &mut PgConnection,
        account: &Account,
    ) -> Result<Vec<Movement>, StoreError> {
        let query = match account.sign {
            AccountSign::Active => {
                r#"
                SELECT id, person_id, order_number, kind, status, operation_date,
                       debit_account, credit_account, amount, created_at, updated_at
                FROM movement
                WHERE credit_account = $1
                ORDER BY operation_date DESC, id DESC
                "#
            }
            AccountSign::Passive => {
                r#"
                SELECT id, person_id, order_number, kind, status, operation_date,
                       debit_account, credit_account, amount, created_at, updated_at
                FROM movement
                WHERE debit_account = $1
                ORDER BY operation_date DESC, id DESC
                "#
            }
        };

        let rows: Vec<MovementRow> = sqlx::query_as(query)
            .bind(&account.number)
            .fetch_all(&mut *conn)
            .await
            .context("loading outflow movements")?;

        rows.into_iter().map(Movement::try_from).collect()
    }
}
