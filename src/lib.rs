//! Remote command host.
//!
//! A TCP server that authenticates clients against a fixed set of accounts,
//! hands out bearer session tokens and runs shell commands for token holders.

pub mod credentials;
pub mod executor;
pub mod host;
pub mod session_table;

pub use credentials::CredentialStore;
pub use executor::{CommandExecutor, CommandResult};
pub use session_table::SessionTable;
