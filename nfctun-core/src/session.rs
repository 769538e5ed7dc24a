//! Tunnel session state machine. Host passes events; session returns actions.
//!
//! One session covers one target presentation:
//! `AwaitingTarget -> Selecting -> LocatorRequested -> Fetching -> Delivering(seq) -> Completed`,
//! with any state able to move to `Failed`. Both terminal states hand the host an
//! `Action::ResetLink`; the host deselects the target and calls `on_link_reset`.
//! Nothing is retried inside a session.

use tracing::{debug, info};
use uuid::Uuid;

use crate::chunk::{ChunkPlan, ChunkPlanError};
use crate::config::TunnelConfig;
use crate::integrity;
use crate::port::{FetchError, TransportError};
use crate::protocol::{AbortReason, FetchFailurePolicy};
use crate::wire::{self, Frame, FrameDecodeError, FrameEncodeError, Locator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingTarget,
    /// Select command sent, waiting for its response.
    Selecting,
    /// Read-locator command sent, waiting for the locator.
    LocatorRequested,
    /// Locator handed to the host, waiting for the payload.
    Fetching,
    /// Data command `seq` sent, waiting for its ack.
    Delivering { seq: u16 },
    /// Fetch failed under `FetchFailurePolicy::Notify`; abort command sent.
    Aborting,
    Completed,
    Failed,
}

/// What the host must do next.
#[derive(Debug)]
pub enum Action {
    /// Perform one exchange with the target and report it via `on_response`.
    Transceive(Frame),
    /// Fetch the locator and report it via `on_fetched`.
    Fetch(Locator),
    /// Session concluded: deselect the target, then call `on_link_reset`.
    ResetLink(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(DeliveryReport),
    Failed(TunnelError),
}

/// Summary of a completed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub locator: Locator,
    pub payload_len: usize,
    pub chunks: u16,
    /// SHA-256 of the relayed payload.
    pub digest: [u8; 32],
}

/// Payload owned by the session while chunks are being delivered.
struct Delivery {
    locator: Locator,
    payload: Vec<u8>,
    plan: ChunkPlan,
}

pub struct TunnelSession {
    id: Uuid,
    config: TunnelConfig,
    state: SessionState,
    locator: Option<Locator>,
    delivery: Option<Delivery>,
    /// Failure reported once the abort exchange finishes.
    pending_failure: Option<TunnelError>,
}

impl TunnelSession {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            id: Uuid::nil(),
            config,
            state: SessionState::AwaitingTarget,
            locator: None,
            delivery: None,
            pending_failure: None,
        }
    }

    /// Id of the current (or last) presentation, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a fetched payload is still held by the session.
    pub fn holds_payload(&self) -> bool {
        self.delivery.is_some()
    }

    /// Target entered the field: start with the select command.
    pub fn on_target_detected(&mut self) -> Action {
        if self.state != SessionState::AwaitingTarget {
            return self.unexpected("target detected");
        }
        self.id = Uuid::new_v4();
        self.transition(SessionState::Selecting);
        Action::Transceive(wire::encode_select())
    }

    /// Result of the last `Action::Transceive`.
    pub fn on_response(&mut self, response: Result<Vec<u8>, TransportError>) -> Action {
        let state = self.state;
        match state {
            SessionState::Selecting
            | SessionState::LocatorRequested
            | SessionState::Delivering { .. } => {}
            // The abort exchange is best effort; its result does not change the outcome.
            SessionState::Aborting => return self.finish_abort(),
            _ => return self.unexpected("response"),
        }
        let response = match response {
            Ok(r) => r,
            Err(source) => return self.fail(TunnelError::Transport { state, source }),
        };
        match state {
            SessionState::Selecting => match wire::decode_select_response(&response) {
                Ok(()) => {
                    self.transition(SessionState::LocatorRequested);
                    Action::Transceive(wire::encode_read_locator())
                }
                Err(e) => self.fail(e.into()),
            },
            SessionState::LocatorRequested => match wire::decode_locator(&response) {
                Ok(locator) => {
                    info!(session = %self.id, %locator, "received locator for download");
                    self.locator = Some(locator.clone());
                    self.transition(SessionState::Fetching);
                    Action::Fetch(locator)
                }
                Err(e) => self.fail(e.into()),
            },
            SessionState::Delivering { seq } => match wire::decode_chunk_ack(&response) {
                Ok(()) => self.after_ack(seq),
                Err(FrameDecodeError::ChunkRejected { status }) => {
                    self.fail(TunnelError::ChunkRejected { seq, status })
                }
                Err(e) => self.fail(e.into()),
            },
            _ => self.unexpected("response"),
        }
    }

    /// Result of the last `Action::Fetch`.
    pub fn on_fetched(&mut self, result: Result<Vec<u8>, FetchError>) -> Action {
        if self.state != SessionState::Fetching {
            return self.unexpected("fetch result");
        }
        let payload = match result {
            Ok(p) => p,
            Err(e) => return self.on_fetch_failed(e),
        };
        let plan = match ChunkPlan::new(payload.len(), self.config.chunk_size) {
            Ok(p) => p,
            Err(e) => return self.fail(e.into()),
        };
        let Some(locator) = self.locator.take() else {
            return self.unexpected("fetch result");
        };
        info!(
            session = %self.id,
            bytes = payload.len(),
            packets = plan.total(),
            packet_size = plan.chunk_size(),
            "sending payload"
        );
        self.delivery = Some(Delivery {
            locator,
            payload,
            plan,
        });
        if plan.is_empty() {
            return self.complete();
        }
        self.send_chunk(0)
    }

    /// Host has deselected the target; ready for the next presentation.
    pub fn on_link_reset(&mut self) {
        self.locator = None;
        self.delivery = None;
        self.pending_failure = None;
        self.transition(SessionState::AwaitingTarget);
    }

    fn on_fetch_failed(&mut self, err: FetchError) -> Action {
        match self.config.fetch_failure {
            FetchFailurePolicy::Silent => self.fail(TunnelError::FetchFailed(err)),
            FetchFailurePolicy::Notify => {
                self.locator = None;
                self.pending_failure = Some(TunnelError::FetchFailed(err));
                self.transition(SessionState::Aborting);
                Action::Transceive(wire::encode_abort(AbortReason::FetchFailed))
            }
        }
    }

    fn finish_abort(&mut self) -> Action {
        let err = self
            .pending_failure
            .take()
            .unwrap_or(TunnelError::UnexpectedEvent {
                state: SessionState::Aborting,
                event: "abort without failure",
            });
        self.fail(err)
    }

    fn after_ack(&mut self, seq: u16) -> Action {
        let total = match &self.delivery {
            Some(d) => d.plan.total(),
            None => return self.unexpected("ack without payload"),
        };
        // seq < total <= u16::MAX, so seq + 1 cannot overflow.
        if seq + 1 >= total {
            self.complete()
        } else {
            self.send_chunk(seq + 1)
        }
    }

    fn send_chunk(&mut self, seq: u16) -> Action {
        let encoded = match &self.delivery {
            Some(d) => match d.plan.chunk(seq) {
                Some(span) => {
                    wire::encode_data_chunk(seq, d.plan.total(), &d.payload[span.range()])
                }
                None => return self.unexpected("chunk out of plan"),
            },
            None => return self.unexpected("chunk without payload"),
        };
        match encoded {
            Ok(frame) => {
                self.transition(SessionState::Delivering { seq });
                Action::Transceive(frame)
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn complete(&mut self) -> Action {
        let Some(delivery) = self.delivery.take() else {
            return self.unexpected("completion without payload");
        };
        let report = DeliveryReport {
            digest: integrity::payload_digest(&delivery.payload),
            payload_len: delivery.payload.len(),
            chunks: delivery.plan.total(),
            locator: delivery.locator,
        };
        self.transition(SessionState::Completed);
        Action::ResetLink(Outcome::Completed(report))
    }

    fn fail(&mut self, err: TunnelError) -> Action {
        self.locator = None;
        self.delivery = None;
        self.transition(SessionState::Failed);
        Action::ResetLink(Outcome::Failed(err))
    }

    fn unexpected(&mut self, event: &'static str) -> Action {
        let state = self.state;
        self.fail(TunnelError::UnexpectedEvent { state, event })
    }

    fn transition(&mut self, to: SessionState) {
        debug!(session = %self.id, from = ?self.state, ?to, "transition");
        self.state = to;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TunnelError {
    #[error("transport error in {state:?}: {source}")]
    Transport {
        state: SessionState,
        source: TransportError,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
    #[error("selection rejected (status word {0:02x?})")]
    SelectionRejected(Option<[u8; 2]>),
    #[error("fetch failed: {0}")]
    FetchFailed(FetchError),
    #[error("chunk {seq} rejected (status {status:02x?})")]
    ChunkRejected { seq: u16, status: Option<u8> },
    #[error("sequence space exceeded: {0} chunks")]
    SequenceSpaceExceeded(usize),
    #[error("chunk too large: {len} bytes (max {max})")]
    ChunkTooLarge { len: usize, max: usize },
    #[error("invalid chunk size")]
    ZeroChunkSize,
    #[error("unexpected {event} in {state:?}")]
    UnexpectedEvent {
        state: SessionState,
        event: &'static str,
    },
}

impl From<FrameDecodeError> for TunnelError {
    fn from(e: FrameDecodeError) -> Self {
        match e {
            FrameDecodeError::Malformed(what) => TunnelError::MalformedResponse(what),
            FrameDecodeError::SelectionRejected { status_word } => {
                TunnelError::SelectionRejected(status_word)
            }
            // Acks are decoded with their seq in hand; see `on_response`.
            FrameDecodeError::ChunkRejected { .. } => {
                TunnelError::MalformedResponse("chunk rejection outside delivery")
            }
        }
    }
}

impl From<FrameEncodeError> for TunnelError {
    fn from(e: FrameEncodeError) -> Self {
        match e {
            FrameEncodeError::ChunkTooLarge { len, max } => TunnelError::ChunkTooLarge { len, max },
        }
    }
}

impl From<ChunkPlanError> for TunnelError {
    fn from(e: ChunkPlanError) -> Self {
        match e {
            ChunkPlanError::SequenceSpaceExceeded { total } => {
                TunnelError::SequenceSpaceExceeded(total)
            }
            ChunkPlanError::ZeroChunkSize => TunnelError::ZeroChunkSize,
        }
    }
}
