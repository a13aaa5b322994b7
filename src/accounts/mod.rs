//! Accounts module
//!
//! Person registration, credentials and the chart of accounts.

mod credentials;
mod directory;

pub use credentials::SecretDigest;
pub use directory::{AccountDirectory, Registration};
