//! NFC HTTP tunnel protocol engine.
//! Host-driven: no I/O; host passes events and receives actions, or hands its
//! link and fetcher to the session loop.

pub mod chunk;
pub mod config;
pub mod integrity;
pub mod port;
pub mod protocol;
pub mod session;
pub mod session_loop;
pub mod wire;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod proptests;

pub use chunk::{ChunkPlan, ChunkPlanError, ChunkSpan};
pub use config::{ConfigError, TunnelConfig};
pub use port::{FetchError, Fetcher, TransportError, Transceiver};
pub use protocol::{Command, FetchFailurePolicy};
pub use session::{Action, DeliveryReport, Outcome, SessionState, TunnelError, TunnelSession};
pub use session_loop::SessionLoop;
pub use wire::{Frame, FrameDecodeError, FrameEncodeError, Locator};
