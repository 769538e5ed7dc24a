//! Framing: fixed byte layouts for select, read-locator and data exchanges.
//!
//! Two success conventions coexist on the link and are not interchangeable:
//! the SELECT response ends with the status word `90 00`, every other
//! response starts with a status byte `00`.

use std::fmt;

use crate::protocol::{
    AbortReason, Command, DATA_HEADER_LEN, MAX_FRAME_LEN, OP_ABORT, OP_DATA, OP_READ_LOCATOR,
    SELECT_APDU, STATUS_OK, SW_SUCCESS,
};

/// One command or response frame. Never longer than `MAX_FRAME_LEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Resource locator read from the target. ASCII, NUL-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator(String);

impl Locator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn encode_select() -> Frame {
    Frame(SELECT_APDU.to_vec())
}

pub fn encode_read_locator() -> Frame {
    Frame(vec![OP_READ_LOCATOR])
}

/// Data command: `02 seqHi seqLo totalHi totalLo bytes...`.
pub fn encode_data_chunk(seq: u16, total: u16, bytes: &[u8]) -> Result<Frame, FrameEncodeError> {
    let len = DATA_HEADER_LEN + bytes.len();
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::ChunkTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut out = Vec::with_capacity(len);
    out.push(OP_DATA);
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(Frame(out))
}

pub fn encode_abort(reason: AbortReason) -> Frame {
    Frame(vec![OP_ABORT, reason as u8])
}

/// Accept any response ending in `90 00`.
pub fn decode_select_response(response: &[u8]) -> Result<(), FrameDecodeError> {
    if response.len() > MAX_FRAME_LEN {
        return Err(FrameDecodeError::Malformed("select response exceeds frame size"));
    }
    match response {
        [.., sw1, sw2] if [*sw1, *sw2] == SW_SUCCESS => Ok(()),
        [.., sw1, sw2] => Err(FrameDecodeError::SelectionRejected {
            status_word: Some([*sw1, *sw2]),
        }),
        _ => Err(FrameDecodeError::SelectionRejected { status_word: None }),
    }
}

/// Locator response: `00 <ascii>`. Bytes after an embedded NUL are dropped.
pub fn decode_locator(response: &[u8]) -> Result<Locator, FrameDecodeError> {
    if response.len() > MAX_FRAME_LEN {
        return Err(FrameDecodeError::Malformed("locator response exceeds frame size"));
    }
    let (status, rest) = response
        .split_first()
        .ok_or(FrameDecodeError::Malformed("empty locator response"))?;
    if *status != STATUS_OK {
        return Err(FrameDecodeError::Malformed("locator response status not ok"));
    }
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let bytes = &rest[..end];
    if !bytes.is_ascii() {
        return Err(FrameDecodeError::Malformed("locator is not ascii"));
    }
    String::from_utf8(bytes.to_vec())
        .map(Locator)
        .map_err(|_| FrameDecodeError::Malformed("locator is not ascii"))
}

pub fn decode_chunk_ack(response: &[u8]) -> Result<(), FrameDecodeError> {
    match response.first() {
        Some(&STATUS_OK) if response.len() <= MAX_FRAME_LEN => Ok(()),
        Some(&STATUS_OK) => Err(FrameDecodeError::Malformed("ack exceeds frame size")),
        Some(&status) => Err(FrameDecodeError::ChunkRejected {
            status: Some(status),
        }),
        None => Err(FrameDecodeError::ChunkRejected { status: None }),
    }
}

/// Parse a command on the target side of the link.
pub fn decode_command(bytes: &[u8]) -> Result<Command, FrameDecodeError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameDecodeError::Malformed("command exceeds frame size"));
    }
    if bytes == SELECT_APDU {
        return Ok(Command::Select);
    }
    match bytes {
        [OP_READ_LOCATOR] => Ok(Command::ReadLocator),
        [OP_DATA, s0, s1, t0, t1, payload @ ..] => Ok(Command::Data {
            seq: u16::from_be_bytes([*s0, *s1]),
            total: u16::from_be_bytes([*t0, *t1]),
            payload: payload.to_vec(),
        }),
        [OP_ABORT, reason] => AbortReason::from_byte(*reason)
            .map(|reason| Command::Abort { reason })
            .ok_or(FrameDecodeError::Malformed("unknown abort reason")),
        [] => Err(FrameDecodeError::Malformed("empty command")),
        _ => Err(FrameDecodeError::Malformed("unknown command")),
    }
}

/// Target-side SELECT success response (bare status word).
pub fn encode_select_ok() -> Vec<u8> {
    SW_SUCCESS.to_vec()
}

pub fn encode_locator_response(locator: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + locator.len());
    out.push(STATUS_OK);
    out.extend_from_slice(locator.as_bytes());
    out
}

/// Single status byte response (ack when `STATUS_OK`).
pub fn encode_status(status: u8) -> Vec<u8> {
    vec![status]
}

/// Error encoding a command frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("chunk too large: frame would be {len} bytes (max {max})")]
    ChunkTooLarge { len: usize, max: usize },
}

/// Error decoding a response (or, target side, a command).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("malformed response: {0}")]
    Malformed(&'static str),
    #[error("selection rejected (status word {status_word:02x?})")]
    SelectionRejected { status_word: Option<[u8; 2]> },
    #[error("chunk rejected (status {status:02x?})")]
    ChunkRejected { status: Option<u8> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_CHUNK_SIZE;

    #[test]
    fn select_layout() {
        assert_eq!(
            encode_select().as_bytes(),
            &[0x00, 0xA4, 0x04, 0x00, 0x06, 0xF0, 0xAB, 0xCD, 0xEF, 0x00, 0x00]
        );
        assert_eq!(encode_read_locator().as_bytes(), &[0x01]);
    }

    #[test]
    fn data_chunk_layout() {
        let frame = encode_data_chunk(0x0102, 0x0304, b"xy").unwrap();
        assert_eq!(frame.as_bytes(), &[0x02, 0x01, 0x02, 0x03, 0x04, b'x', b'y']);
    }

    #[test]
    fn data_chunk_max_size() {
        let max = vec![0xAA; MAX_CHUNK_SIZE];
        let frame = encode_data_chunk(0, 1, &max).unwrap();
        assert_eq!(frame.as_bytes().len(), MAX_FRAME_LEN);

        let over = vec![0xAA; MAX_CHUNK_SIZE + 1];
        assert_eq!(
            encode_data_chunk(0, 1, &over),
            Err(FrameEncodeError::ChunkTooLarge {
                len: MAX_FRAME_LEN + 1,
                max: MAX_FRAME_LEN
            })
        );
    }

    #[test]
    fn select_response_status_word() {
        assert!(decode_select_response(&[0x90, 0x00]).is_ok());
        assert!(decode_select_response(&[0x01, 0x02, 0x90, 0x00]).is_ok());
        assert_eq!(
            decode_select_response(&[0x6A, 0x82]),
            Err(FrameDecodeError::SelectionRejected {
                status_word: Some([0x6A, 0x82])
            })
        );
        assert_eq!(
            decode_select_response(&[0x90]),
            Err(FrameDecodeError::SelectionRejected { status_word: None })
        );
        // Leading-byte convention does not apply to SELECT.
        assert!(decode_select_response(&[0x00]).is_err());
    }

    #[test]
    fn locator_decoding() {
        let loc = decode_locator(b"\x00https://example.com/").unwrap();
        assert_eq!(loc.as_str(), "https://example.com/");

        assert!(matches!(
            decode_locator(&[]),
            Err(FrameDecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_locator(b"\x01https://example.com/"),
            Err(FrameDecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_locator(&[0x00, 0xC3, 0xA9]),
            Err(FrameDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn locator_truncated_at_nul() {
        let loc = decode_locator(b"\x00http://a/\x00garbage").unwrap();
        assert_eq!(loc.as_str(), "http://a/");
    }

    #[test]
    fn locator_status_only_is_empty() {
        let loc = decode_locator(&[0x00]).unwrap();
        assert_eq!(loc.as_str(), "");
    }

    #[test]
    fn chunk_ack() {
        assert!(decode_chunk_ack(&[0x00]).is_ok());
        assert!(decode_chunk_ack(&[0x00, 0x55]).is_ok());
        assert_eq!(
            decode_chunk_ack(&[0x01]),
            Err(FrameDecodeError::ChunkRejected { status: Some(0x01) })
        );
        assert_eq!(
            decode_chunk_ack(&[]),
            Err(FrameDecodeError::ChunkRejected { status: None })
        );
        // The status-word convention does not apply to acks.
        assert!(decode_chunk_ack(&[0x90, 0x00]).is_err());
    }

    #[test]
    fn oversized_responses_rejected() {
        let mut big = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(decode_chunk_ack(&big).is_err());
        assert!(decode_locator(&big).is_err());
        let n = big.len();
        big[n - 2..].copy_from_slice(&SW_SUCCESS);
        assert!(decode_select_response(&big).is_err());
    }

    #[test]
    fn decode_commands() {
        assert_eq!(decode_command(encode_select().as_bytes()), Ok(Command::Select));
        assert_eq!(
            decode_command(encode_read_locator().as_bytes()),
            Ok(Command::ReadLocator)
        );
        let frame = encode_data_chunk(7, 9, &[1, 2, 3]).unwrap();
        assert_eq!(
            decode_command(frame.as_bytes()),
            Ok(Command::Data {
                seq: 7,
                total: 9,
                payload: vec![1, 2, 3]
            })
        );
        assert_eq!(
            decode_command(encode_abort(AbortReason::FetchFailed).as_bytes()),
            Ok(Command::Abort {
                reason: AbortReason::FetchFailed
            })
        );
        assert!(decode_command(&[]).is_err());
        assert!(decode_command(&[0x02, 0x00]).is_err());
        assert!(decode_command(&[0x03, 0x7F]).is_err());
    }

    #[test]
    fn target_responses_decode() {
        assert!(decode_select_response(&encode_select_ok()).is_ok());
        assert_eq!(
            decode_locator(&encode_locator_response("http://x/")).unwrap(),
            Locator("http://x/".into())
        );
        assert!(decode_chunk_ack(&encode_status(STATUS_OK)).is_ok());
    }
}
