//! Client-local transaction log and the verb -> compensating action table.
//!
//! Nothing here performs I/O: the host records commands while a transaction is
//! open and, on rollback, asks for each entry's [`Compensation`] in reverse order.

use std::path::{Path, PathBuf};

use crate::protocol::{verb, Command};

/// One command sent while a transaction was open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    command: Command,
    /// Local copy of the file's bytes, captured before a `DELETE`.
    retained: Option<PathBuf>,
}

impl LogEntry {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            retained: None,
        }
    }

    pub fn with_retained(command: Command, copy: PathBuf) -> Self {
        Self {
            command,
            retained: Some(copy),
        }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn retained(&self) -> Option<&Path> {
        self.retained.as_deref()
    }
}

/// Action that undoes one logged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Store `local_copy` again under `key` in `class`.
    Restore {
        domain: String,
        key: String,
        class: String,
        local_copy: PathBuf,
    },
    /// Rename `from` -> `to` (the reverse of the logged rename).
    Rename {
        domain: String,
        from: String,
        to: String,
    },
    /// Delete a key that the transaction created.
    Delete { domain: String, key: String },
}

impl Compensation {
    /// Single tracker command for this action. `Restore` needs a transfer and
    /// returns `None`; the host drives it as open + upload + close.
    pub fn command(&self) -> Option<Command> {
        match self {
            Compensation::Restore { .. } => None,
            Compensation::Rename { domain, from, to } => Some(
                Command::with_domain(domain.as_str(), verb::RENAME)
                    .arg("from_key", from)
                    .arg("to_key", to),
            ),
            Compensation::Delete { domain, key } => {
                Some(Command::with_domain(domain.as_str(), verb::DELETE).arg("key", key))
            }
        }
    }

    /// Key this action operates on, for error reporting.
    pub fn key(&self) -> &str {
        match self {
            Compensation::Restore { key, .. } | Compensation::Delete { key, .. } => key,
            Compensation::Rename { from, .. } => from,
        }
    }
}

/// Inverse of a logged command. `Ok(None)` for verbs with nothing to undo.
pub fn compensation(entry: &LogEntry) -> Result<Option<Compensation>, TransactionError> {
    let cmd = entry.command();
    let domain = cmd.domain().unwrap_or_default().to_string();
    let arg = |name: &'static str| {
        cmd.get(name)
            .map(str::to_string)
            .ok_or_else(|| TransactionError::MissingArgument {
                verb: cmd.verb().to_string(),
                arg: name,
            })
    };
    if cmd.is(verb::DELETE) {
        let key = arg("key")?;
        let class = arg("class")?;
        let local_copy = entry
            .retained()
            .ok_or_else(|| TransactionError::MissingCopy(key.clone()))?
            .to_path_buf();
        return Ok(Some(Compensation::Restore {
            domain,
            key,
            class,
            local_copy,
        }));
    }
    if cmd.is(verb::RENAME) {
        return Ok(Some(Compensation::Rename {
            domain,
            from: arg("to_key")?,
            to: arg("from_key")?,
        }));
    }
    if cmd.is(verb::CREATE_CLOSE) {
        return Ok(Some(Compensation::Delete {
            domain,
            key: arg("key")?,
        }));
    }
    Ok(None)
}

/// Append-only record of an open transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransactionLog {
    entries: Vec<LogEntry>,
}

impl TransactionLog {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries newest first, the order rollback replays them in.
    pub fn into_reversed(self) -> impl Iterator<Item = LogEntry> {
        self.entries.into_iter().rev()
    }

    /// Temporary local copies held by this log.
    pub fn retained_files(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter_map(|e| e.retained().map(Path::to_path_buf))
            .collect()
    }
}

/// Transaction state machine: `Idle -> Active -> Idle`.
#[derive(Debug, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Active(TransactionLog),
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active(_))
    }

    pub fn begin(&mut self) -> Result<(), TransactionError> {
        if self.is_active() {
            return Err(TransactionError::AlreadyActive);
        }
        *self = TransactionState::Active(TransactionLog::default());
        Ok(())
    }

    /// Leave the transaction and hand back its log.
    pub fn finish(&mut self) -> Result<TransactionLog, TransactionError> {
        match std::mem::take(self) {
            TransactionState::Active(log) => Ok(log),
            TransactionState::Idle => Err(TransactionError::NotActive),
        }
    }

    /// Whether `command` would be logged right now.
    pub fn should_record(&self, command: &Command) -> bool {
        self.is_active() && !verb::is_read_only(command.verb())
    }

    /// Reject commands that could not be undone. A `DELETE` must name its class.
    pub fn check(&self, command: &Command) -> Result<(), TransactionError> {
        if self.is_active() && command.is(verb::DELETE) && command.get("class").is_none() {
            return Err(TransactionError::DeleteWithoutClass(
                command.get("key").unwrap_or_default().to_string(),
            ));
        }
        Ok(())
    }

    /// Append to the log if active and the verb mutates. Returns whether it was recorded.
    pub fn record(&mut self, entry: LogEntry) -> bool {
        if !self.should_record(entry.command()) {
            return false;
        }
        if let TransactionState::Active(log) = self {
            log.push(entry);
            return true;
        }
        false
    }

    pub fn log(&self) -> Option<&TransactionLog> {
        match self {
            TransactionState::Active(log) => Some(log),
            TransactionState::Idle => None,
        }
    }
}

/// Transaction misuse or an entry that cannot be compensated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("a transaction is already active; commit or roll back first")]
    AlreadyActive,
    #[error("no active transaction")]
    NotActive,
    #[error("DELETE of {0:?} inside a transaction needs a class")]
    DeleteWithoutClass(String),
    #[error("{verb} entry has no {arg:?} argument")]
    MissingArgument { verb: String, arg: &'static str },
    #[error("no retained copy of deleted key {0:?}")]
    MissingCopy(String),
}
