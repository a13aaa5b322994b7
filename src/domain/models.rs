//! Ledger data model
//!
//! Plain records shared by the directory, ledger, order and withdrawal services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Registered participant of the loyalty program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Person {
    pub id: i64,
    pub login: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    #[serde(skip_serializing)]
    pub secret_salt: String,
    pub full_name: Option<String>,
    pub surname: Option<String>,
    pub name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which side of a movement increases an account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSign {
    /// Debits increase the balance (asset-like)
    Active,
    /// Credits increase the balance (liability-like)
    Passive,
}

impl AccountSign {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSign::Active => "active",
            AccountSign::Passive => "passive",
        }
    }

    /// The other sign class
    pub fn opposite(&self) -> Self {
        match self {
            AccountSign::Active => AccountSign::Passive,
            AccountSign::Passive => AccountSign::Active,
        }
    }

    /// Net effect of a turnover on a balance of this sign.
    pub fn net(&self, turnover: &Turnover) -> i64 {
        match self {
            AccountSign::Active => turnover.debit - turnover.credit,
            AccountSign::Passive => turnover.credit - turnover.debit,
        }
    }

    /// The side of a turnover that takes points out of an account of this sign.
    pub fn outflow(&self, turnover: &Turnover) -> i64 {
        match self {
            AccountSign::Active => turnover.credit,
            AccountSign::Passive => turnover.debit,
        }
    }

    /// Posting that moves points out of `person` into `clearing`.
    pub fn withdrawal_posting<'a>(&self, person: &'a str, clearing: &'a str) -> Posting<'a> {
        match self {
            AccountSign::Active => Posting {
                debit: clearing,
                credit: person,
            },
            AccountSign::Passive => Posting {
                debit: person,
                credit: clearing,
            },
        }
    }

    /// Posting that moves points from `clearing` into `person`.
    pub fn accrual_posting<'a>(&self, person: &'a str, clearing: &'a str) -> Posting<'a> {
        let out = self.withdrawal_posting(person, clearing);
        Posting {
            debit: out.credit,
            credit: out.debit,
        }
    }
}

impl fmt::Display for AccountSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountSign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AccountSign::Active),
            "passive" => Ok(AccountSign::Passive),
            other => Err(format!("unknown account sign: {}", other)),
        }
    }
}

/// Debit/credit account numbers of one movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting<'a> {
    pub debit: &'a str,
    pub credit: &'a str,
}

/// Ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: i64,
    /// Owner; `None` for the system clearing account
    pub person_id: Option<i64>,
    pub number: String,
    pub sign: AccountSign,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_system(&self) -> bool {
        self.person_id.is_none()
    }
}

/// Lifecycle of a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// PROCESSED and INVALID never change again.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::New => true,
            OrderStatus::Processing => next != OrderStatus::New,
            OrderStatus::Invalid | OrderStatus::Processed => *self == next,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// Purchase order submitted for accrual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: i64,
    pub number: i64,
    pub person_id: i64,
    pub status: OrderStatus,
    /// Accrued minor units, set by the accrual service
    pub accrual: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a movement records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Accrual,
    Withdrawal,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Accrual => "accrual",
            MovementKind::Withdrawal => "withdrawal",
        }
    }
}

impl FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accrual" => Ok(MovementKind::Accrual),
            "withdrawal" => Ok(MovementKind::Withdrawal),
            other => Err(format!("unknown movement kind: {}", other)),
        }
    }
}

/// Immutable ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movement {
    pub id: i64,
    pub person_id: Option<i64>,
    pub order_number: Option<i64>,
    pub kind: MovementKind,
    pub status: String,
    pub operation_date: DateTime<Utc>,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Movement about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMovement {
    pub person_id: Option<i64>,
    pub order_number: Option<i64>,
    pub kind: MovementKind,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: i64,
}

impl NewMovement {
    pub fn new(kind: MovementKind, posting: Posting<'_>, amount: i64) -> Result<Self, DomainError> {
        if amount < 0 {
            return Err(DomainError::InvalidAmount(format!(
                "movement amount must not be negative (got {})",
                amount
            )));
        }

        if posting.debit.is_empty() || posting.credit.is_empty() {
            return Err(DomainError::InvalidAmount(
                "movement needs both a debit and a credit account".to_string(),
            ));
        }

        if posting.debit == posting.credit {
            return Err(DomainError::InvalidAmount(format!(
                "debit and credit account are both {}",
                posting.debit
            )));
        }

        Ok(Self {
            person_id: None,
            order_number: None,
            kind,
            debit_account: posting.debit.to_string(),
            credit_account: posting.credit.to_string(),
            amount,
        })
    }

    pub fn with_person(mut self, person_id: i64) -> Self {
        self.person_id = Some(person_id);
        self
    }

    pub fn with_order(mut self, order_number: i64) -> Self {
        self.order_number = Some(order_number);
        self
    }
}

/// Fixed balance of one account, absorbing every movement dated before `as_of`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub id: i64,
    pub account_id: i64,
    pub account_number: String,
    pub as_of: DateTime<Utc>,
    pub balance: i64,
    /// Cumulative debit turnover absorbed into this snapshot
    pub debit_total: i64,
    /// Cumulative credit turnover absorbed into this snapshot
    pub credit_total: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Debit and credit sums of one account over a range of movements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Turnover {
    pub debit: i64,
    pub credit: i64,
}

/// Balance from an optional snapshot plus the turnover recorded since it.
pub fn compute_balance(
    sign: AccountSign,
    snapshot: Option<&BalanceSnapshot>,
    since: &Turnover,
) -> i64 {
    snapshot.map_or(0, |s| s.balance) + sign.net(since)
}

/// Lifetime outflow from an optional snapshot plus the turnover recorded since it.
pub fn compute_withdrawn(
    sign: AccountSign,
    snapshot: Option<&BalanceSnapshot>,
    since: &Turnover,
) -> i64 {
    let absorbed = snapshot.map_or(Turnover::default(), |s| Turnover {
        debit: s.debit_total,
        credit: s.credit_total,
    });
    sign.outflow(&absorbed) + sign.outflow(since)
}
