//! Per-domain file and class operations. Each call builds one command (or an
//! open/upload/close sequence) and goes through the client's `send`, so all of
//! them take part in an open transaction.

use std::path::Path;

use mogile_core::fields::counted_values;
use mogile_core::{verb, Command, Fields};
use rand::seq::SliceRandom;

use crate::client::Client;
use crate::error::ClientError;

/// Class every domain has; it cannot be created, changed or removed.
const DEFAULT_CLASS: &str = "default";
const DEFAULT_MINDEVCOUNT: u32 = 2;

/// Handle on one domain of the cluster. Cheap to clone.
#[derive(Clone)]
pub struct Domain {
    client: Client,
    name: String,
}

impl Domain {
    pub(crate) fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn command(&self, verb: &str) -> Command {
        Command::with_domain(self.name.as_str(), verb)
    }

    /// Storage URLs holding `key`. With `noverify` the tracker skips checking them.
    pub async fn get_paths(&self, key: &str, noverify: bool) -> Result<Vec<String>, ClientError> {
        self.client
            .transactions()
            .paths(&self.name, key, noverify)
            .await
    }

    /// One storage URL for `key`, picked at random.
    pub async fn get(&self, key: &str, noverify: bool) -> Result<String, ClientError> {
        let paths = self.get_paths(key, noverify).await?;
        paths
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| ClientError::NoPaths(key.to_string()))
    }

    /// Delete `key`. Inside a transaction `class` is required so the file can be restored.
    pub async fn delete(&self, key: &str, class: Option<&str>) -> Result<(), ClientError> {
        let mut cmd = self.command(verb::DELETE).arg("key", key);
        if let Some(class) = class {
            cmd = cmd.arg("class", class);
        }
        self.client.send(&cmd).await?;
        Ok(())
    }

    pub async fn rename(&self, from_key: &str, to_key: &str) -> Result<(), ClientError> {
        let cmd = self
            .command(verb::RENAME)
            .arg("from_key", from_key)
            .arg("to_key", to_key);
        self.client.send(&cmd).await?;
        Ok(())
    }

    /// Download `key` into `local` (created or truncated). Returns the byte count.
    pub async fn get_file(&self, key: &str, local: impl AsRef<Path>) -> Result<u64, ClientError> {
        self.client
            .transactions()
            .fetch(&self.name, key, local.as_ref())
            .await
    }

    /// Store `local` under `key` in `class`. Returns the byte count.
    pub async fn store_file(
        &self,
        key: &str,
        class: &str,
        local: impl AsRef<Path>,
    ) -> Result<u64, ClientError> {
        self.client
            .transactions()
            .store(&self.name, key, class, local.as_ref())
            .await
    }

    /// Create a storage class. `mindevcount` defaults to 2.
    pub async fn create_class(&self, class: &str, mindevcount: Option<u32>) -> Result<Fields, ClientError> {
        check_class(class, "create")?;
        let cmd = self
            .command(verb::CREATE_CLASS)
            .arg("class", class)
            .arg("mindevcount", mindevcount.unwrap_or(DEFAULT_MINDEVCOUNT));
        self.client.send(&cmd).await
    }

    pub async fn update_class(&self, class: &str, mindevcount: Option<u32>) -> Result<Fields, ClientError> {
        check_class(class, "update")?;
        let cmd = self
            .command(verb::UPDATE_CLASS)
            .arg("class", class)
            .arg("mindevcount", mindevcount.unwrap_or(DEFAULT_MINDEVCOUNT))
            .arg("update", 1);
        self.client.send(&cmd).await
    }

    pub async fn delete_class(&self, class: &str) -> Result<Fields, ClientError> {
        check_class(class, "delete")?;
        let cmd = self.command(verb::DELETE_CLASS).arg("class", class);
        self.client.send(&cmd).await
    }

    /// Tracker metadata for `key` (fid, class, length, devcount, ..).
    pub async fn file_info(&self, key: &str) -> Result<Fields, ClientError> {
        self.client
            .send(&self.command(verb::FILE_INFO).arg("key", key))
            .await
    }

    /// Keys starting with `prefix`, optionally after `after`, at most `limit`.
    pub async fn list_keys(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<String>, ClientError> {
        let mut cmd = self.command(verb::LIST_KEYS).arg("prefix", prefix);
        if let Some(after) = after {
            cmd = cmd.arg("after", after);
        }
        if let Some(limit) = limit {
            cmd = cmd.arg("limit", limit);
        }
        let fields = self.client.send(&cmd).await?;
        Ok(counted_values(&fields, "key_count", |i| format!("key_{i}"))?)
    }
}

fn check_class(class: &str, action: &str) -> Result<(), ClientError> {
    if class == DEFAULT_CLASS {
        return Err(ClientError::InvalidArgument(format!(
            "can't {action} the {DEFAULT_CLASS} class"
        )));
    }
    Ok(())
}
