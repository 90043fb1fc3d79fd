//! Retry dispatcher: runs one logical command across live trackers and a retry count.
//!
//! Two independent loops:
//! - failover: within one attempt, trackers are tried in configured order; a tracker
//!   that cannot be reached is marked dead and the next one is tried.
//! - retry: an attempt whose response cannot be parsed is repeated, up to
//!   `retries` times after the first.
//!
//! `ERR` responses and idle timeouts end the command at once.

use std::sync::Arc;

use mogile_core::{decode_response, encode_command, Command, Fields, Response, TrackerRegistry};
use tracing::{debug, warn};

use crate::channel::{ChannelError, CommandChannel};
use crate::error::ClientError;

pub struct RetryDispatcher {
    registry: Arc<TrackerRegistry>,
    channel: CommandChannel,
    retries: u32,
}

impl RetryDispatcher {
    pub fn new(registry: Arc<TrackerRegistry>, channel: CommandChannel, retries: u32) -> Self {
        Self {
            registry,
            channel,
            retries,
        }
    }

    pub fn registry(&self) -> &TrackerRegistry {
        &self.registry
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Send `command` and return the `OK` fields.
    pub async fn dispatch(&self, command: &Command) -> Result<Fields, ClientError> {
        let line = encode_command(command).map_err(ClientError::InvalidCommand)?;
        let request = self
            .channel
            .encoding()
            .encode(&line)
            .map_err(ClientError::InvalidCommand)?;

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            debug!(%command, attempt = attempts, "dispatching tracker command");
            match self.attempt(&request).await {
                Ok(fields) => return Ok(fields),
                Err(ClientError::Communication(msg)) => {
                    if attempts > self.retries {
                        return Err(ClientError::RetryExhausted {
                            attempts,
                            last: Box::new(ClientError::Communication(msg)),
                        });
                    }
                    warn!(%command, attempt = attempts, error = %msg, "bad tracker response, retrying");
                }
                // Dead trackers never revive, so after AllTrackersDown a retry
                // would find no live tracker: it is returned as is.
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass over the live trackers.
    async fn attempt(&self, request: &[u8]) -> Result<Fields, ClientError> {
        let live = self.registry.list_live();
        if live.is_empty() {
            return Err(ClientError::NoLiveTrackers);
        }
        let tried = live.len();
        let mut last_error: Option<ChannelError> = None;
        for tracker in live {
            match self.channel.send(tracker.addr(), request).await {
                Ok(raw) => {
                    self.registry.mark_alive(tracker);
                    return match decode_response(&raw) {
                        Ok(Response::Ok(fields)) => Ok(fields),
                        Ok(Response::Err(code)) => Err(ClientError::Application { code }),
                        Err(e) => Err(ClientError::Communication(e.to_string())),
                    };
                }
                Err(e) if e.is_connection_error() => {
                    warn!(tracker = %tracker.addr(), error = %e, "tracker unreachable, marking dead");
                    self.registry.mark_dead(tracker);
                    last_error = Some(e);
                }
                Err(ChannelError::Timeout { tracker, after }) => {
                    return Err(ClientError::Timeout { tracker, after });
                }
                Err(e) => return Err(ClientError::Communication(e.to_string())),
            }
        }
        match last_error {
            Some(last) => Err(ClientError::AllTrackersDown { tried, last }),
            None => Err(ClientError::NoLiveTrackers),
        }
    }
}
