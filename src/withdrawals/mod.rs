//! Withdrawals module
//!
//! Spending accrued points against orders.

mod issuer;

pub use issuer::{BalanceSummary, WithdrawalIssuer};
