//! Ledger module
//!
//! Double-entry movements between accounts and the balances derived from them.

mod store;

pub use store::LedgerStore;
