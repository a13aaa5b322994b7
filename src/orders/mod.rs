//! Orders module
//!
//! Order submission with Luhn validation and ownership deduplication.

mod intake;

pub use intake::{AccrualUpdate, OrderIntake};
