//! Client error: every failure a public operation can return.

use std::time::Duration;

use mogile_core::{FieldError, ProtocolError, TrackerAddr, TransactionError};

use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::transfer::TransferError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No tracker is marked alive; nothing was attempted.
    #[error("no live trackers found")]
    NoLiveTrackers,
    /// Every live tracker refused the connection during one attempt.
    #[error("all {tried} live trackers are down")]
    AllTrackersDown {
        tried: usize,
        #[source]
        last: ChannelError,
    },
    /// The tracker accepted the command but stayed idle past the timeout.
    #[error("tracker {tracker} timed out after {after:?}")]
    Timeout { tracker: TrackerAddr, after: Duration },
    /// The response did not split into the two-token `OK`/`ERR` shape.
    #[error("communication error: {0}")]
    Communication(String),
    /// The command could not be encoded; nothing was sent.
    #[error("invalid command: {0}")]
    InvalidCommand(#[source] ProtocolError),
    /// `ERR <code>` from the tracker. Never retried.
    #[error("tracker error: {code}")]
    Application { code: String },
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },
    /// A compensating action failed; later log entries were abandoned.
    #[error("rollback stopped while undoing {verb} of {key:?}: {source}")]
    Rollback {
        verb: String,
        key: String,
        #[source]
        source: Box<ClientError>,
    },
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("bad tracker response: {0}")]
    Field(#[from] FieldError),
    /// The tracker knows the key but listed no storage paths for it.
    #[error("no storage paths for key {0:?}")]
    NoPaths(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Tracker error code for `ERR` responses.
    pub fn application_code(&self) -> Option<&str> {
        match self {
            ClientError::Application { code } => Some(code),
            _ => None,
        }
    }
}
