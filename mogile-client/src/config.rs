//! Load client config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mogile_core::tracker::DEFAULT_TRACKER_PORT;
use mogile_core::{LineEncoding, TrackerAddr};
use serde::Deserialize;

/// Client configuration. File: ~/.config/mogile/config.toml or /etc/mogile/config.toml.
/// Env overrides: MOGILE_TRACKERS (comma separated), MOGILE_RETRIES, MOGILE_ENCODING,
/// MOGILE_TIMEOUT_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Trackers in priority order (default 127.0.0.1:7001).
    #[serde(default = "default_trackers")]
    pub trackers: Vec<TrackerAddr>,
    /// Retries after the first attempt (default 1).
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Socket text encoding (default ascii).
    #[serde(default)]
    pub encoding: LineEncoding,
    /// Idle timeout for tracker connections and storage-node transfers, seconds
    /// (default 900). Must be non-zero.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Connect timeout for trackers and storage nodes, seconds (default 30). Must be non-zero.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Local write buffer for downloads, bytes (default 64 KiB).
    #[serde(default = "default_write_buffer")]
    pub write_buffer: usize,
    /// Where deleted files are kept until a transaction ends (default: system temp dir).
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_trackers() -> Vec<TrackerAddr> {
    vec![TrackerAddr::new("127.0.0.1", DEFAULT_TRACKER_PORT)]
}
fn default_retries() -> u32 {
    1
}
fn default_timeout_secs() -> u64 {
    900
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_write_buffer() -> usize {
    64 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trackers: default_trackers(),
            retries: default_retries(),
            encoding: LineEncoding::default(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            write_buffer: default_write_buffer(),
            scratch_dir: None,
        }
    }
}

impl Config {
    /// Defaults with the given trackers.
    pub fn with_trackers<S: AsRef<str>>(trackers: &[S]) -> Result<Self, ConfigError> {
        let trackers = parse_trackers(trackers.iter().map(AsRef::as_ref))?;
        Ok(Self {
            trackers,
            ..Self::default()
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let c: Self = toml::from_str(s).map_err(ConfigError::Parse)?;
        c.validate()?;
        Ok(c)
    }

    /// Reject settings that parse but cannot work, such as a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Zero("timeout_secs"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::Zero("connect_timeout_secs"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Apply `MOGILE_*` overrides; `lookup` returns the variable's value if set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(s) = lookup("MOGILE_TRACKERS") {
            self.trackers = parse_trackers(s.split(',').filter(|t| !t.trim().is_empty()))?;
        }
        if let Some(s) = lookup("MOGILE_RETRIES") {
            self.retries = s.trim().parse().map_err(|_| ConfigError::Env {
                var: "MOGILE_RETRIES",
                value: s.clone(),
            })?;
        }
        if let Some(s) = lookup("MOGILE_ENCODING") {
            self.encoding = s.parse().map_err(|_| ConfigError::Env {
                var: "MOGILE_ENCODING",
                value: s.clone(),
            })?;
        }
        if let Some(s) = lookup("MOGILE_TIMEOUT_SECS") {
            self.timeout_secs = s.trim().parse().map_err(|_| ConfigError::Env {
                var: "MOGILE_TIMEOUT_SECS",
                value: s.clone(),
            })?;
        }
        self.validate()
    }
}

fn parse_trackers<'a>(
    addrs: impl Iterator<Item = &'a str>,
) -> Result<Vec<TrackerAddr>, ConfigError> {
    addrs
        .map(|a| {
            a.parse::<TrackerAddr>().map_err(|e| ConfigError::Tracker {
                addr: a.to_string(),
                source: e,
            })
        })
        .collect()
}

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bad tracker {addr:?}: {source}")]
    Tracker {
        addr: String,
        #[source]
        source: mogile_core::AddrParseError,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    Env { var: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Load config: defaults, then the first config file found (if any), then env vars.
pub fn load() -> Result<Config, ConfigError> {
    let mut c = match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => load_file(&p)?,
        None => Config::default(),
    };
    c.apply_env(|k| std::env::var(k).ok())?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/mogile/config.toml"));
    }
    out.push(PathBuf::from("/etc/mogile/config.toml"));
    out
}

pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    Config::from_toml_str(&s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.trackers.len(), 1);
        assert_eq!(c.trackers[0].to_string(), "127.0.0.1:7001");
        assert_eq!(c.retries, 1);
        assert_eq!(c.encoding, LineEncoding::Ascii);
        assert_eq!(c.timeout(), Duration::from_secs(900));
    }

    #[test]
    fn parse_file() {
        let c = Config::from_toml_str(
            r#"
            trackers = ["10.0.0.1:7001", "10.0.0.2"]
            retries = 3
            encoding = "utf8"
            scratch_dir = "/var/tmp/mogile"
            "#,
        )
        .unwrap();
        assert_eq!(c.trackers[1].port(), 7001);
        assert_eq!(c.retries, 3);
        assert_eq!(c.encoding, LineEncoding::Utf8);
        assert_eq!(c.scratch_dir(), PathBuf::from("/var/tmp/mogile"));
        assert_eq!(c.write_buffer, 64 * 1024);
    }

    #[test]
    fn unknown_keys_and_bad_trackers_rejected() {
        assert!(Config::from_toml_str("tracker = []").is_err());
        assert!(Config::from_toml_str(r#"trackers = ["h:x"]"#).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("MOGILE_TRACKERS", "a:1, b:2"),
            ("MOGILE_RETRIES", "0"),
            ("MOGILE_ENCODING", "UTF-8"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::from_toml_str("retries = 5").unwrap();
        c.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        let hosts: Vec<String> = c.trackers.iter().map(|t| t.to_string()).collect();
        assert_eq!(hosts, vec!["a:1", "b:2"]);
        assert_eq!(c.retries, 0);
        assert_eq!(c.encoding, LineEncoding::Utf8);
    }

    #[test]
    fn bad_env_value_is_error() {
        let mut c = Config::default();
        let err = c
            .apply_env(|k| (k == "MOGILE_RETRIES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "MOGILE_RETRIES", .. }));
    }

    #[test]
    fn zero_timeouts_rejected() {
        assert!(matches!(
            Config::from_toml_str("timeout_secs = 0"),
            Err(ConfigError::Zero("timeout_secs"))
        ));
        assert!(matches!(
            Config::from_toml_str("connect_timeout_secs = 0"),
            Err(ConfigError::Zero("connect_timeout_secs"))
        ));

        let mut c = Config::default();
        let err = c
            .apply_env(|k| (k == "MOGILE_TIMEOUT_SECS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero("timeout_secs")));

        let c = Config {
            connect_timeout_secs: 0,
            ..Config::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_file_reports_missing_path() {
        let err = load_file(Path::new("/nonexistent/mogile.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
