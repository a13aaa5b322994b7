//! Withdrawal Issuer
//!
//! Spends points against an order. The funds check and the movement append run
//! in one transaction holding a row lock on the person's accounts, so concurrent
//! withdrawals for one person are serialized and cannot overdraw.

use serde::Serialize;
use sqlx::PgPool;

use crate::accounts::AccountDirectory;
use crate::config::LedgerConfig;
use crate::db::{StoreContext, StoreError};
use crate::domain::{Amount, DomainError, Movement, MovementKind, NewMovement, OrderNumber};
use crate::ledger::LedgerStore;

/// Current and lifetime-withdrawn points of a person, in minor units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BalanceSummary {
    pub current: i64,
    pub withdrawn: i64,
}

/// Withdrawal Issuer service
#[derive(Debug, Clone)]
pub struct WithdrawalIssuer {
    pool: PgPool,
    ledger: LedgerConfig,
}

impl WithdrawalIssuer {
    pub fn new(pool: PgPool, ledger: LedgerConfig) -> Self {
        Self { pool, ledger }
    }

    /// Withdraw `amount` from `person_id` against `order`.
    ///
    /// Returns `InsufficientFunds` and writes nothing when the balance across the
    /// person's accounts is below `amount`.
    pub async fn withdraw(
        &self,
        person_id: i64,
        order: OrderNumber,
        amount: Amount,
    ) -> Result<Movement, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("opening withdrawal transaction")?;

        let accounts = AccountDirectory::lock_accounts_of(&mut *tx, person_id).await?;
        let account = accounts
            .first()
            .ok_or(DomainError::NoAccount(person_id))?
            .clone();

        let mut available = 0i64;
        for held in &accounts {
            available += LedgerStore::balance_with(&mut *tx, held).await?;
        }

        if amount.minor() > available {
            tracing::info!(
                person_id,
                order = order.value(),
                required = amount.minor(),
                available,
                "Withdrawal refused"
            );
            return Err(DomainError::insufficient_funds(amount.minor(), available).into());
        }

        let clearing =
            AccountDirectory::clearing_account_with(&mut *tx, &self.ledger.clearing_account_number)
                .await?;

        let posting = account.sign.withdrawal_posting(&account.number, &clearing.number);
        let movement = NewMovement::new(MovementKind::Withdrawal, posting, amount.minor())?
            .with_person(person_id)
            .with_order(order.value());

        let movement = LedgerStore::append_with(&mut *tx, movement).await?;

        tx.commit().await.context("committing withdrawal")?;

        tracing::info!(
            person_id,
            order = order.value(),
            amount = amount.minor(),
            remaining = available - amount.minor(),
            "Withdrawal issued"
        );

        Ok(movement)
    }

    /// Withdrawal movements of a person, newest first
    pub async fn withdrawals_of(&self, person_id: i64) -> Result<Vec<Movement>, StoreError> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        let accounts = AccountDirectory::accounts_of_with(&mut conn, person_id).await?;

        let mut withdrawals = Vec::new();
        for account in &accounts {
            let outflows = LedgerStore::outflows_with(&mut conn, account).await?;
            withdrawals.extend(
                outflows
                    .into_iter()
                    .filter(|m| m.kind == MovementKind::Withdrawal),
            );
        }

        withdrawals.sort_by(|a, b| {
            b.operation_date
                .cmp(&a.operation_date)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(withdrawals)
    }

    /// Current balance and lifetime withdrawals across the person's accounts
    pub async fn summary(&self, person_id: i64) -> Result<BalanceSummary, StoreError> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        let accounts = AccountDirectory::accounts_of_with(&mut conn, person_id).await?;

        if accounts.is_empty() {
            return Err(DomainError::NoAccount(person_id).into());
        }

        let mut summary = BalanceSummary::default();
        for account in &accounts {
            summary.current += LedgerStore::balance_with(&mut conn, account).await?;
            summary.withdrawn += LedgerStore::withdrawn_total_with(&mut conn, account).await?;
        }

        Ok(summary)
    }
}
