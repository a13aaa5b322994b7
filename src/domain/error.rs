//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

use super::OrderStatus;

/// How an error should be treated by whoever receives it.
///
/// None of the kinds are retried by the ledger itself; retrying is the caller's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad checksum, malformed number, bad amount
    Validation,
    /// Taken login, order owned by someone else, status regression
    Conflict,
    /// Same person re-submitted the same order; treat as success
    IdempotentDuplicate,
    /// Not enough points for a withdrawal
    InsufficientFunds,
    /// Wrong login or password
    Unauthorized,
    /// Expected absence (no snapshot yet, unknown order)
    NotFound,
    /// Anything the store failed at
    StoreFault,
}

/// Business rule violations and expected outcomes of ledger operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Order number text is not a positive decimal integer
    #[error("Malformed order number: {0:?}")]
    MalformedNumber(String),

    /// Order number fails the Luhn checksum
    #[error("Order number {0} fails the Luhn checksum")]
    Checksum(i64),

    /// Invalid amount (zero, negative, too precise or too large)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Missing or unusable request field
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Login already registered
    #[error("Login is already taken: {0}")]
    UserExists(String),

    /// Login/secret pair does not match
    #[error("Invalid login or password")]
    InvalidCredentials,

    /// Same person submitted the same order number again
    #[error("Order {0} was already submitted by this person")]
    DuplicateOrder(i64),

    /// Order number is registered to a different person
    #[error("Order {0} was already submitted by another person")]
    OrderOwnedByOther(i64),

    /// Withdrawal exceeds the current balance
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    /// Account has not been closed by the balance job yet
    #[error("No fixed balance yet for account {0}")]
    NoFixedBalance(String),

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Person not found: {0}")]
    PersonNotFound(i64),

    /// Person exists but owns no open account
    #[error("Person {0} has no open account")]
    NoAccount(i64),

    /// Order status would move backwards
    #[error("Order {number} cannot move from {from} to {to}")]
    StatusRegression {
        number: i64,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl DomainError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(required: i64, available: i64) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedNumber(_)
            | Self::Checksum(_)
            | Self::InvalidAmount(_)
            | Self::InvalidInput(_) => ErrorKind::Validation,
            Self::UserExists(_) | Self::OrderOwnedByOther(_) | Self::StatusRegression { .. } => {
                ErrorKind::Conflict
            }
            Self::DuplicateOrder(_) => ErrorKind::IdempotentDuplicate,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InvalidCredentials => ErrorKind::Unauthorized,
            Self::NoFixedBalance(_)
            | Self::OrderNotFound(_)
            | Self::PersonNotFound(_)
            | Self::NoAccount(_) => ErrorKind::NotFound,
        }
    }
}
