//! Client facade: owns the tracker registry and transaction state for one cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use mogile_core::fields::{count, required};
use mogile_core::{verb, Command, FieldError, Fields, TrackerAddr, TrackerRegistry};
use tracing::info;

use crate::channel::CommandChannel;
use crate::config::{self, Config};
use crate::dispatcher::RetryDispatcher;
use crate::domain::Domain;
use crate::error::ClientError;
use crate::transaction::TransactionManager;
use crate::transfer::TransferEngine;

/// Domain used for cluster-wide commands such as `GET_DOMAINS`.
const ADMIN_DOMAIN: &str = "default";

/// One domain and its classes with their `mindevcount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    pub name: String,
    pub classes: BTreeMap<String, u32>,
}

/// Handle on a cluster. Clones share trackers and transaction state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<TransactionManager>,
}

impl Client {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        config.validate()?;
        let registry = Arc::new(TrackerRegistry::new(config.trackers.iter().cloned()));
        let channel = CommandChannel::new(config.encoding, config.connect_timeout(), config.timeout());
        let dispatcher = RetryDispatcher::new(registry, channel, config.retries);
        let transfer = TransferEngine::new(
            config.connect_timeout(),
            config.timeout(),
            config.write_buffer,
        )?;
        info!(
            trackers = config.trackers.len(),
            retries = config.retries,
            "mogile client ready"
        );
        Ok(Self {
            inner: Arc::new(TransactionManager::new(
                dispatcher,
                transfer,
                config.scratch_dir(),
            )),
        })
    }

    /// Defaults with the given `host[:port]` trackers.
    pub fn with_trackers<S: AsRef<str>>(trackers: &[S]) -> Result<Self, ClientError> {
        Self::new(&Config::with_trackers(trackers)?)
    }

    /// Config from the usual files plus `MOGILE_*` environment overrides.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(&config::load()?)
    }

    pub(crate) fn transactions(&self) -> &TransactionManager {
        &self.inner
    }

    pub fn domain(&self, name: impl Into<String>) -> Domain {
        Domain::new(self.clone(), name)
    }

    /// Send one command and return the `OK` fields.
    pub async fn send(&self, command: &Command) -> Result<Fields, ClientError> {
        self.inner.send(command).await
    }

    pub async fn begin(&self) -> Result<(), ClientError> {
        self.inner.begin().await
    }

    pub async fn commit(&self) -> Result<(), ClientError> {
        self.inner.commit().await
    }

    pub async fn rollback(&self) -> Result<(), ClientError> {
        self.inner.rollback().await
    }

    pub async fn in_transaction(&self) -> bool {
        self.inner.is_active().await
    }

    /// Trackers still considered reachable, in configured order.
    pub fn live_trackers(&self) -> Vec<TrackerAddr> {
        self.inner
            .dispatcher()
            .registry()
            .list_live()
            .into_iter()
            .map(|t| t.addr().clone())
            .collect()
    }

    /// Direct access to storage-node transfers.
    pub fn transfer(&self) -> &TransferEngine {
        self.inner.transfer()
    }

    pub async fn get_domains(&self) -> Result<Vec<DomainInfo>, ClientError> {
        let fields = self
            .send(&Command::with_domain(ADMIN_DOMAIN, verb::GET_DOMAINS))
            .await?;
        Ok(decode_domains(&fields)?)
    }

    pub async fn create_domain(&self, name: &str) -> Result<Fields, ClientError> {
        self.send(&Command::with_domain(name, verb::CREATE_DOMAIN))
            .await
    }

    pub async fn delete_domain(&self, name: &str) -> Result<Fields, ClientError> {
        self.send(&Command::with_domain(name, verb::DELETE_DOMAIN))
            .await
    }
}

/// `domains=N&domain<i>=..&domain<i>classes=M&domain<i>class<j>name=..&domain<i>class<j>mindevcount=..`
fn decode_domains(fields: &Fields) -> Result<Vec<DomainInfo>, FieldError> {
    let n = count(fields, "domains", |i| format!("domain{i}"))?;
    (1..=n)
        .map(|i| {
            let dom = format!("domain{i}");
            let name = required(fields, &dom)?.to_string();
            let m = count(fields, &format!("{dom}classes"), |j| {
                format!("{dom}class{j}name")
            })?;
            let mut classes = BTreeMap::new();
            for j in 1..=m {
                let class = required(fields, &format!("{dom}class{j}name"))?;
                let key = format!("{dom}class{j}mindevcount");
                let raw = required(fields, &key)?;
                let mindevcount = raw.trim().parse::<u32>().map_err(|_| FieldError::BadCount {
                    key: key.clone(),
                    value: raw.to_string(),
                })?;
                classes.insert(class.to_string(), mindevcount);
            }
            Ok(DomainInfo { name, classes })
        })
        .collect()
}
