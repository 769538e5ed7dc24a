//! Tunnel wire protocol: command opcodes, status codes and frame limits.

use serde::Deserialize;

/// Maximum size of any command or response frame on the link.
pub const MAX_FRAME_LEN: usize = 512;

/// SELECT AID APDU for the tunnel application (F0 AB CD EF 00 00).
pub const SELECT_APDU: [u8; 11] = [
    0x00, 0xA4, 0x04, 0x00, 0x06, 0xF0, 0xAB, 0xCD, 0xEF, 0x00, 0x00,
];

/// Status word trailing a successful SELECT response.
pub const SW_SUCCESS: [u8; 2] = [0x90, 0x00];

/// Leading status byte of a successful locator or ack response.
pub const STATUS_OK: u8 = 0x00;

/// Opcode: ask the target for the locator to fetch.
pub const OP_READ_LOCATOR: u8 = 0x01;
/// Opcode: one chunk of the fetched payload.
pub const OP_DATA: u8 = 0x02;
/// Opcode: session aborted by the reader (only sent under `FetchFailurePolicy::Notify`).
pub const OP_ABORT: u8 = 0x03;

/// Opcode + seq (u16 BE) + total (u16 BE).
pub const DATA_HEADER_LEN: usize = 5;

/// Largest chunk that still fits a data command in one frame.
pub const MAX_CHUNK_SIZE: usize = MAX_FRAME_LEN - DATA_HEADER_LEN;

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 250;

/// Reason carried by an abort command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    FetchFailed = 0x01,
}

impl AbortReason {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::FetchFailed),
            _ => None,
        }
    }
}

/// What to tell the target when the fetch fails after the locator was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchFailurePolicy {
    /// Send nothing; the target times out on its own.
    #[default]
    Silent,
    /// Send an abort command with `AbortReason::FetchFailed` before resetting the link.
    Notify,
}

/// A command as seen from the target side of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Select,
    ReadLocator,
    Data {
        seq: u16,
        total: u16,
        payload: Vec<u8>,
    },
    Abort {
        reason: AbortReason,
    },
}
