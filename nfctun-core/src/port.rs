//! Contracts the host implements: the link to the proximity target and the network fetch.

use std::time::Duration;

use crate::wire::{Frame, Locator};

/// Half-duplex link to a proximity target.
pub trait Transceiver {
    /// Handle to a detected target, valid until `deselect`.
    type Target;

    /// Poll once for a target. `Ok(None)` when nothing is in the field.
    fn detect_target(&mut self) -> Result<Option<Self::Target>, TransportError>;

    /// One blocking command/response exchange bounded by `timeout`.
    fn transceive(
        &mut self,
        target: &Self::Target,
        command: &Frame,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Release the target. Best effort.
    fn deselect(&mut self, target: &Self::Target) -> Result<(), TransportError>;
}

/// Fetches the resource named by a locator, buffered whole in memory.
pub trait Fetcher {
    fn fetch(&mut self, locator: &Locator) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("exchange timed out")]
    Timeout,
    #[error("link failure: {0}")]
    Link(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
}
