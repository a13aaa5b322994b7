//! Order Intake
//!
//! Registers purchase orders for later accrual and applies the accrual
//! collaborator's verdicts.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::accounts::AccountDirectory;
use crate::config::LedgerConfig;
use crate::db::{decode_column, is_unique_violation, StoreContext, StoreError};
use crate::domain::{
    Amount, DomainError, MovementKind, NewMovement, Order, OrderNumber, OrderStatus,
};
use crate::ledger::LedgerStore;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    number: i64,
    person_id: i64,
    status: String,
    accrual: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            number: row.number,
            person_id: row.person_id,
            status: decode_column(&row.status)?,
            accrual: row.accrual,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Verdict of the accrual service for one order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualUpdate {
    pub status: OrderStatus,
    /// Points to credit, only meaningful for PROCESSED
    pub accrual: Option<Amount>,
}

impl AccrualUpdate {
    pub fn new(status: OrderStatus, accrual: Option<Amount>) -> Self {
        Self { status, accrual }
    }

    fn accrual_minor(&self) -> i64 {
        self.accrual.map_or(0, |a| a.minor())
    }
}

/// Order Intake service
#[derive(Debug, Clone)]
pub struct OrderIntake {
    pool: PgPool,
    ledger: LedgerConfig,
}

impl OrderIntake {
    pub fn new(pool: PgPool, ledger: LedgerConfig) -> Self {
        Self { pool, ledger }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Register an order number for `person_id` in NEW.
    ///
    /// Re-submitting an owned number yields `DuplicateOrder`; a number owned by
    /// someone else yields `OrderOwnedByOther`. Neither writes a row.
    pub async fn submit(&self, person_id: i64, number: OrderNumber) -> Result<Order, StoreError> {
        let inserted: Result<OrderRow, sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO orders (number, person_id, status)
            VALUES ($1, $2, $3)
            RETURNING id, number, person_id, status, accrual, created_at, updated_at
            "#,
        )
        .bind(number.value())
        .bind(person_id)
        .bind(OrderStatus::New.as_str())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => {
                let order = Order::try_from(row)?;
                tracing::info!(person_id, number = order.number, "Order submitted");
                Ok(order)
            }
            Err(e) if is_unique_violation(&e) => {
                let existing = self.order(number.value()).await?;
                if existing.person_id == person_id {
                    tracing::debug!(person_id, number = existing.number, "Order re-submitted");
                    Err(DomainError::DuplicateOrder(existing.number).into())
                } else {
                    tracing::info!(
                        person_id,
                        owner = existing.person_id,
                        number = existing.number,
                        "Order number belongs to another person"
                    );
                    Err(DomainError::OrderOwnedByOther(existing.number).into())
                }
            }
            Err(e) => Err(StoreError::from_sqlx("inserting order", e)),
        }
    }

    /// Parse raw order text and submit it
    pub async fn submit_raw(&self, person_id: i64, raw: &str) -> Result<Order, StoreError> {
        let number = OrderNumber::parse(raw)?;
        self.submit(person_id, number).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Orders of a person, newest first
    pub async fn orders_of(&self, person_id: i64) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, number, person_id, status, accrual, created_at, updated_at
            FROM orders
            WHERE person_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await
        .context("listing orders")?;

        rows.into_iter().map(Order::try_from).collect()
    }

    pub async fn order(&self, number: i64) -> Result<Order, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, number, person_id, status, accrual, created_at, updated_at
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .context("loading order")?;

        row.ok_or(DomainError::OrderNotFound(number))?.try_into()
    }

    // =========================================================================
    // Accrual
    // =========================================================================

    /// Apply the accrual service's verdict for an order.
    ///
    /// Final states never change; repeating the same final verdict is a no-op.
    /// Reaching PROCESSED with a positive accrual credits the owner's first account
    /// from the clearing account in the same transaction.
    pub async fn apply_accrual(
        &self,
        number: i64,
        update: AccrualUpdate,
    ) -> Result<Order, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("opening accrual transaction")?;

        let current = Self::lock_order(&mut *tx, number).await?;

        let accrual = if update.status == OrderStatus::Processed {
            update.accrual_minor()
        } else {
            0
        };

        let repeated = current.status == update.status && current.accrual == accrual;
        if current.status.is_final() && repeated {
            tracing::debug!(number, status = %current.status, "Accrual already applied");
            return Ok(current);
        }

        // A final order with a different verdict is a conflict even for the same status
        if current.status.is_final() || !current.status.can_transition_to(update.status) {
            return Err(DomainError::StatusRegression {
                number,
                from: current.status,
                to: update.status,
            }
            .into());
        }

        let row: OrderRow = sqlx::query_as(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3, updated_at = NOW()
            WHERE number = $1
            RETURNING id, number, person_id, status, accrual, created_at, updated_at
            "#,
        )
        .bind(number)
        .bind(update.status.as_str())
        .bind(accrual)
        .fetch_one(&mut *tx)
        .await
        .context("updating order status")?;
        let order = Order::try_from(row)?;

        if order.status == OrderStatus::Processed && accrual > 0 {
            self.credit_accrual(&mut *tx, &order).await?;
        }

        tx.commit().await.context("committing accrual")?;

        tracing::info!(
            number,
            from = %current.status,
            to = %order.status,
            accrual = order.accrual,
            "Order accrual applied"
        );

        Ok(order)
    }

    async fn lock_order(conn: &mut PgConnection, number: i64) -> Result<Order, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, number, person_id, status, accrual, created_at, updated_at
            FROM orders
            WHERE number = $1
            FOR UPDATE
            "#,
        )
        .bind(number)
        .fetch_optional(&mut *conn)
        .await
        .context("locking order")?;

        row.ok_or(DomainError::OrderNotFound(number))?.try_into()
    }

    async fn credit_accrual(
        &self,
        conn: &mut PgConnection,
        order: &Order,
    ) -> Result<(), StoreError> {
        let accounts = AccountDirectory::accounts_of_with(conn, order.person_id).await?;
        let account = accounts
            .first()
            .ok_or(DomainError::NoAccount(order.person_id))?;
        let clearing =
            AccountDirectory::clearing_account_with(conn, &self.ledger.clearing_account_number)
                .await?;

        let posting = account.sign.accrual_posting(&account.number, &clearing.number);
        let movement = NewMovement::new(MovementKind::Accrual, posting, order.accrual)?
            .with_person(order.person_id)
            .with_order(order.number);

        LedgerStore::append_with(conn, movement).await?;

        Ok(())
    }
}
