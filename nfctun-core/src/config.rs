//! Process-wide tunnel settings, fixed at startup and passed into the session loop.

use std::time::Duration;

use crate::protocol::{FetchFailurePolicy, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

/// Default timeout for one exchange with the target.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Payload bytes per data command (1..=MAX_CHUNK_SIZE).
    pub chunk_size: usize,
    /// Timeout handed to the transceiver for every exchange.
    pub exchange_timeout: Duration,
    pub fetch_failure: FetchFailurePolicy,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            fetch_failure: FetchFailurePolicy::default(),
        }
    }
}

impl TunnelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkSize(self.chunk_size));
        }
        if self.exchange_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size {0} out of range (1..={})", MAX_CHUNK_SIZE)]
    ChunkSize(usize),
    #[error("exchange timeout must be non-zero")]
    ZeroTimeout,
}
