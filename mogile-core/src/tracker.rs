//! Tracker registry: configured tracker endpoints and their liveness flags.
//!
//! Trackers are tried in configured order. A tracker that fails to accept a
//! connection is marked dead and stays dead for the lifetime of the registry;
//! there is no revival policy.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

/// Port used when an endpoint omits one.
pub const DEFAULT_TRACKER_PORT: u16 = 7001;

/// Endpoint used when no tracker is configured at all.
pub const DEFAULT_TRACKER: &str = "127.0.0.1:7001";

/// Tracker endpoint (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct TrackerAddr {
    host: String,
    port: u16,
}

impl TrackerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for TrackerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for TrackerAddr {
    type Err = AddrParseError;

    /// Parse `host:port` or bare `host` (port defaults to 7001).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddrParseError::Empty);
        }
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(AddrParseError::Empty);
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| AddrParseError::BadPort(s.to_string()))?;
                Ok(Self::new(host, port))
            }
            None => Ok(Self::new(s, DEFAULT_TRACKER_PORT)),
        }
    }
}

impl TryFrom<String> for TrackerAddr {
    type Error = AddrParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Error parsing a tracker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrParseError {
    #[error("empty tracker address")]
    Empty,
    #[error("invalid port in tracker address {0:?}")]
    BadPort(String),
}

/// One configured tracker and its liveness flag.
#[derive(Debug)]
pub struct Tracker {
    addr: TrackerAddr,
    alive: AtomicBool,
}

impl Tracker {
    fn new(addr: TrackerAddr) -> Self {
        Self {
            addr,
            alive: AtomicBool::new(true),
        }
    }

    pub fn addr(&self) -> &TrackerAddr {
        &self.addr
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Ordered set of trackers. Only the `alive` flags mutate after construction.
#[derive(Debug)]
pub struct TrackerRegistry {
    trackers: Vec<Tracker>,
}

impl TrackerRegistry {
    /// Build from endpoints in priority order. Every tracker starts alive.
    /// An empty list falls back to [`DEFAULT_TRACKER`].
    pub fn new(addrs: impl IntoIterator<Item = TrackerAddr>) -> Self {
        let mut trackers: Vec<Tracker> = addrs.into_iter().map(Tracker::new).collect();
        if trackers.is_empty() {
            trackers.push(Tracker::new(TrackerAddr::new("127.0.0.1", DEFAULT_TRACKER_PORT)));
        }
        Self { trackers }
    }

    /// Parse `host:port` strings and build the registry.
    pub fn parse<S: AsRef<str>>(addrs: &[S]) -> Result<Self, AddrParseError> {
        let parsed = addrs
            .iter()
            .map(|a| a.as_ref().parse::<TrackerAddr>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(parsed))
    }

    /// Live trackers in configured order.
    pub fn list_live(&self) -> Vec<&Tracker> {
        self.trackers.iter().filter(|t| t.is_alive()).collect()
    }

    pub fn mark_dead(&self, tracker: &Tracker) {
        tracker.alive.store(false, Ordering::Release);
    }

    pub fn mark_alive(&self, tracker: &Tracker) {
        tracker.alive.store(true, Ordering::Release);
    }

    /// All trackers, dead or alive.
    pub fn all(&self) -> &[Tracker] {
        &self.trackers
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}
