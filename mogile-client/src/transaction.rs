//! Transaction manager: records mutating commands while a transaction is open and
//! replays their inverses on rollback.
//!
//! The state lives behind an async mutex. While a transaction is active the lock is
//! held across log-append-and-dispatch, so concurrent sends cannot reorder the log.
//! Idle sends do not hold it during dispatch and read-only verbs never take it.
//!
//! A `DELETE` inside a transaction first downloads the key's current bytes into the
//! scratch directory; rollback stores that copy again.

use std::path::{Path, PathBuf};

use mogile_core::fields::{counted_values, required};
use mogile_core::{
    compensation, verb, Command, Compensation, FieldError, Fields, LogEntry, TransactionLog,
    TransactionState,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatcher::RetryDispatcher;
use crate::error::ClientError;
use crate::transfer::TransferEngine;

/// Whether a store goes through the transaction log or straight to the dispatcher.
/// Rollback stores directly so its own commands are never logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Logged,
    Direct,
}

pub struct TransactionManager {
    state: Mutex<TransactionState>,
    dispatcher: RetryDispatcher,
    transfer: TransferEngine,
    scratch_dir: PathBuf,
}

impl TransactionManager {
    pub fn new(dispatcher: RetryDispatcher, transfer: TransferEngine, scratch_dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(TransactionState::Idle),
            dispatcher,
            transfer,
            scratch_dir,
        }
    }

    pub fn dispatcher(&self) -> &RetryDispatcher {
        &self.dispatcher
    }

    pub fn transfer(&self) -> &TransferEngine {
        &self.transfer
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_active()
    }

    /// Number of commands recorded in the open transaction (0 when idle).
    pub async fn logged(&self) -> usize {
        self.state.lock().await.log().map_or(0, TransactionLog::len)
    }

    pub async fn begin(&self) -> Result<(), ClientError> {
        self.state.lock().await.begin()?;
        info!("transaction started");
        Ok(())
    }

    /// Send a command, logging it first if a transaction is open and the verb mutates.
    pub async fn send(&self, command: &Command) -> Result<Fields, ClientError> {
        if verb::is_read_only(command.verb()) {
            return self.dispatcher.dispatch(command).await;
        }
        let mut state = self.state.lock().await;
        state.check(command)?;
        if !state.should_record(command) {
            drop(state);
            return self.dispatcher.dispatch(command).await;
        }
        let entry = if command.is(verb::DELETE) {
            let copy = self.capture(command).await?;
            LogEntry::with_retained(command.clone(), copy)
        } else {
            LogEntry::new(command.clone())
        };
        state.record(entry);
        debug!(%command, "recorded in transaction log");
        self.dispatcher.dispatch(command).await
    }

    /// Close the transaction, keeping every effect.
    pub async fn commit(&self) -> Result<(), ClientError> {
        let log = self.state.lock().await.finish()?;
        remove_files(&log.retained_files()).await;
        info!(entries = log.len(), "transaction committed");
        Ok(())
    }

    /// Close the transaction and undo its commands newest first.
    /// Stops at the first compensation that fails; the manager is idle either way.
    pub async fn rollback(&self) -> Result<(), ClientError> {
        let log = self.state.lock().await.finish()?;
        let retained = log.retained_files();
        info!(entries = log.len(), "rolling back transaction");
        let result = self.replay(log).await;
        remove_files(&retained).await;
        result
    }

    async fn replay(&self, log: TransactionLog) -> Result<(), ClientError> {
        for entry in log.into_reversed() {
            let verb = entry.command().verb().to_string();
            let undo = match compensation(&entry) {
                Ok(Some(undo)) => undo,
                Ok(None) => continue,
                Err(e) => {
                    return Err(ClientError::Rollback {
                        verb,
                        key: entry.command().get("key").unwrap_or_default().to_string(),
                        source: Box::new(e.into()),
                    })
                }
            };
            debug!(%verb, key = undo.key(), "undoing");
            if let Err(e) = self.undo(&undo).await {
                warn!(%verb, key = undo.key(), error = %e, "rollback stopped");
                return Err(ClientError::Rollback {
                    verb,
                    key: undo.key().to_string(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }

    async fn undo(&self, undo: &Compensation) -> Result<(), ClientError> {
        match undo {
            Compensation::Restore {
                domain,
                key,
                class,
                local_copy,
            } => {
                self.store_via(Route::Direct, domain, key, class, local_copy)
                    .await?;
            }
            other => {
                if let Some(cmd) = other.command() {
                    self.dispatcher.dispatch(&cmd).await?;
                }
            }
        }
        Ok(())
    }

    /// Download the file a `DELETE` is about to remove. Runs under the state lock,
    /// so it talks to the dispatcher directly.
    async fn capture(&self, delete: &Command) -> Result<PathBuf, ClientError> {
        let domain = delete.domain().unwrap_or_default();
        let key = delete.get("key").unwrap_or_default();
        let fields = self
            .dispatcher
            .dispatch(&paths_command(domain, key, false))
            .await?;
        let local = self
            .scratch_dir
            .join(format!("mogile-{}.retained", Uuid::new_v4()));
        let bytes = self.download_any(&fields, key, &local).await?;
        debug!(key, bytes, path = %local.display(), "retained copy before delete");
        Ok(local)
    }

    /// Storage URLs for `key`, in tracker order.
    pub(crate) async fn paths(
        &self,
        domain: &str,
        key: &str,
        noverify: bool,
    ) -> Result<Vec<String>, ClientError> {
        let fields = self.send(&paths_command(domain, key, noverify)).await?;
        Ok(decode_paths(&fields)?)
    }

    /// Download `key` to `local`. Returns the byte count.
    pub(crate) async fn fetch(&self, domain: &str, key: &str, local: &Path) -> Result<u64, ClientError> {
        let fields = self.send(&paths_command(domain, key, false)).await?;
        self.download_any(&fields, key, local).await
    }

    /// Download from the listed storage paths in order until one succeeds.
    /// Fails with the last transfer error, or `NoPaths` when none are listed.
    async fn download_any(&self, fields: &Fields, key: &str, local: &Path) -> Result<u64, ClientError> {
        let mut last = None;
        for url in decode_paths(fields)? {
            match self.transfer.download(&url, local).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(key, %url, error = %e, "storage path failed, trying next");
                    last = Some(e);
                }
            }
        }
        Err(match last {
            Some(e) => e.into(),
            None => ClientError::NoPaths(key.to_string()),
        })
    }

    /// `CREATE_OPEN`, upload `local`, `CREATE_CLOSE`. Returns the byte count.
    pub(crate) async fn store(
        &self,
        domain: &str,
        key: &str,
        class: &str,
        local: &Path,
    ) -> Result<u64, ClientError> {
        self.store_via(Route::Logged, domain, key, class, local).await
    }

    async fn route(&self, route: Route, command: &Command) -> Result<Fields, ClientError> {
        match route {
            Route::Logged => self.send(command).await,
            Route::Direct => self.dispatcher.dispatch(command).await,
        }
    }

    async fn store_via(
        &self,
        route: Route,
        domain: &str,
        key: &str,
        class: &str,
        local: &Path,
    ) -> Result<u64, ClientError> {
        let open = Command::with_domain(domain, verb::CREATE_OPEN)
            .arg("key", key)
            .arg("class", class);
        let dest = self.route(route, &open).await?;
        let path = required(&dest, "path")?;
        let size = self.transfer.upload(local, path).await?;
        let close = Command::with_domain(domain, verb::CREATE_CLOSE)
            .arg("key", key)
            .arg("class", class)
            .arg("devid", required(&dest, "devid")?)
            .arg("fid", required(&dest, "fid")?)
            .arg("path", path)
            .arg("size", size);
        self.route(route, &close).await?;
        Ok(size)
    }
}

fn paths_command(domain: &str, key: &str, noverify: bool) -> Command {
    Command::with_domain(domain, verb::GET_PATHS)
        .arg("key", key)
        .arg("noverify", u8::from(noverify))
}

fn decode_paths(fields: &Fields) -> Result<Vec<String>, FieldError> {
    counted_values(fields, "paths", |i| format!("path{i}"))
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "could not remove retained copy");
        }
    }
}
