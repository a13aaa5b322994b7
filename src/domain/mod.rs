//! Domain module
//!
//! Core domain types and business logic.

pub mod amount;
pub mod checksum;
pub mod error;
pub mod models;

pub use amount::{to_points, Amount};
pub use checksum::{validate, OrderNumber};
pub use error::{DomainError, ErrorKind};
pub use models::{
    compute_balance, compute_withdrawn, Account, AccountSign, BalanceSnapshot, Movement,
    MovementKind, NewMovement, Order, OrderStatus, Person, Posting, Turnover,
};
