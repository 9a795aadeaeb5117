//! Remote execution: the executor contract and its SSH and local transports

pub mod executor;
pub mod local;
pub mod ssh;

pub use executor::{shell_quote, CommandOutput, RemoteExecutor};
