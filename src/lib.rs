//! Loyalty Ledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod accounts;
pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod jobs;
pub mod ledger;
pub mod orders;
pub mod withdrawals;

mod error;

pub use config::{Config, LedgerConfig};
pub use db::StoreError;
pub use domain::{Amount, DomainError, ErrorKind, OrderNumber};
pub use error::{AppError, AppResult};
