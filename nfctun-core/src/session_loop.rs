//! Session loop: wait for a target, run one tunnel session to its link reset, repeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ConfigError, TunnelConfig};
use crate::port::{Fetcher, Transceiver};
use crate::session::{Action, Outcome, TunnelSession};

/// Pause between detection polls that found nothing.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the link and the fetcher; runs one session at a time.
pub struct SessionLoop<T: Transceiver, F: Fetcher> {
    transceiver: T,
    fetcher: F,
    config: TunnelConfig,
    session: TunnelSession,
    poll_interval: Duration,
}

impl<T: Transceiver, F: Fetcher> SessionLoop<T, F> {
    pub fn new(transceiver: T, fetcher: F, config: TunnelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transceiver,
            fetcher,
            session: TunnelSession::new(config.clone()),
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Loop until `shutdown` is set. Checked between polls and between sessions only.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        info!("waiting for device...");
        while !shutdown.load(Ordering::Relaxed) {
            match self.run_once() {
                Some(_) => info!("waiting for device..."),
                None => std::thread::sleep(self.poll_interval),
            }
        }
        info!("session loop stopped");
    }

    /// Poll once. If a target is present, run a full session and return its outcome.
    pub fn run_once(&mut self) -> Option<Outcome> {
        let target = match self.transceiver.detect_target() {
            Ok(Some(t)) => t,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "target detection failed");
                return None;
            }
        };
        let outcome = self.drive(&target);
        match &outcome {
            Outcome::Completed(report) => info!(
                session = %self.session.id(),
                locator = %report.locator,
                bytes = report.payload_len,
                packets = report.chunks,
                sha256 = %hex::encode(report.digest),
                "transfer completed"
            ),
            Outcome::Failed(err) => warn!(
                session = %self.session.id(),
                error = %err,
                "transfer failed"
            ),
        }
        Some(outcome)
    }

    fn drive(&mut self, target: &T::Target) -> Outcome {
        let mut action = self.session.on_target_detected();
        loop {
            action = match action {
                Action::Transceive(frame) => {
                    debug!(session = %self.session.id(), "=> {}", hex::encode(frame.as_bytes()));
                    let response = self.transceiver.transceive(
                        target,
                        &frame,
                        self.config.exchange_timeout,
                    );
                    if let Ok(bytes) = &response {
                        debug!(session = %self.session.id(), "<= {}", hex::encode(bytes));
                    }
                    self.session.on_response(response)
                }
                Action::Fetch(locator) => {
                    let fetched = self.fetcher.fetch(&locator);
                    self.session.on_fetched(fetched)
                }
                Action::ResetLink(outcome) => {
                    info!(session = %self.session.id(), "transaction ended, cleaning up");
                    if let Err(e) = self.transceiver.deselect(target) {
                        warn!(session = %self.session.id(), error = %e, "deselect failed");
                    }
                    self.session.on_link_reset();
                    return outcome;
                }
            };
        }
    }
}
