//! Async MogileFS client.
//! Tracker commands go through failover and retries; file bytes move over HTTP
//! to storage nodes; an optional transaction undoes applied commands on rollback.

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod transaction;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use channel::{ChannelError, CommandChannel};
pub use client::{Client, DomainInfo};
pub use config::{Config, ConfigError};
pub use dispatcher::RetryDispatcher;
pub use domain::Domain;
pub use error::ClientError;
pub use transaction::TransactionManager;
pub use transfer::{TransferEngine, TransferError};

pub use mogile_core::{verb, Command, Fields, LineEncoding, TrackerAddr};
