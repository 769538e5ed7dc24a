//! Load config from file, then apply environment and command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use nfctun_core::protocol::DEFAULT_CHUNK_SIZE;
use nfctun_core::{FetchFailurePolicy, TunnelConfig};
use serde::Deserialize;
use tracing::warn;

/// Daemon configuration. File: ~/.config/nfctun/config.toml or /etc/nfctun/config.toml.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Link connection string (default pn532_uart:/dev/ttyUSB0:115200).
    #[serde(default = "default_connstring")]
    pub connstring: String,
    /// Payload bytes per data command (default 250).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Timeout for one exchange with the target, in ms (default 1000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub fetch_failure: FetchFailurePolicy,
    /// Whole-request timeout of the HTTP client. None leaves it unbounded.
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Pause between detection polls, in ms (default 100).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_connstring() -> String {
    "pn532_uart:/dev/ttyUSB0:115200".to_string()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_timeout_ms() -> u64 {
    1000
}
fn default_user_agent() -> String {
    concat!("nfctun/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connstring: default_connstring(),
            chunk_size: default_chunk_size(),
            timeout_ms: default_timeout_ms(),
            fetch_failure: FetchFailurePolicy::default(),
            fetch_timeout_secs: None,
            user_agent: default_user_agent(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Values given on the command line or through env vars; `None` keeps the file value.
#[derive(Debug, Default)]
pub struct Overrides {
    pub connstring: Option<String>,
    pub chunk_size: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub notify_fetch_failure: bool,
}

impl Config {
    pub fn apply(&mut self, o: Overrides) {
        if let Some(c) = o.connstring {
            self.connstring = c;
        }
        if let Some(n) = o.chunk_size {
            self.chunk_size = n;
        }
        if let Some(t) = o.timeout_ms {
            self.timeout_ms = t;
        }
        if o.notify_fetch_failure {
            self.fetch_failure = FetchFailurePolicy::Notify;
        }
    }

    pub fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig {
            chunk_size: self.chunk_size,
            exchange_timeout: Duration::from_millis(self.timeout_ms),
            fetch_failure: self.fetch_failure,
        }
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load config: an explicit path must exist and parse; otherwise the first default
/// path that exists is used, falling back to defaults if it does not parse.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(p) = explicit {
        let s = std::fs::read_to_string(p)
            .with_context(|| format!("reading config {}", p.display()))?;
        return toml::from_str(&s).with_context(|| format!("parsing config {}", p.display()));
    }
    Ok(load_file().unwrap_or_default())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/nfctun/config.toml"));
    }
    out.push(PathBuf::from("/etc/nfctun/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let p = config_paths().into_iter().find(|p| p.exists())?;
    let s = match std::fs::read_to_string(&p) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %p.display(), error = %e, "unable to read config, using defaults");
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %p.display(), error = %e, "invalid config, using defaults");
            None
        }
    }
}
