//! PN532 reader over UART (HSU) as the tunnel's transceiver.
//!
//! Frame format: `00 00 FF LEN LCS TFI CMD DATA.. DCS 00`, with the extended form
//! `00 00 FF FF FF LENm LENl LCS ...` for bodies over 255 bytes.
//! `LEN + LCS == 0` and `TFI + CMD + DATA + DCS == 0` (mod 256).
//! Every host command is answered by an ACK frame, then a response frame whose
//! command code is the request code + 1.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use nfctun_core::protocol::{DATA_HEADER_LEN, MAX_FRAME_LEN};
use nfctun_core::{Frame, Transceiver, TransportError};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

const DRIVER_UART: &str = "pn532_uart";
const DEFAULT_BAUD: u32 = 115_200;

const TFI_HOST: u8 = 0xD4;
const TFI_PN532: u8 = 0xD5;

const CMD_SAM_CONFIGURATION: u8 = 0x14;
const CMD_RF_CONFIGURATION: u8 = 0x32;
const CMD_IN_DATA_EXCHANGE: u8 = 0x40;
const CMD_IN_DESELECT: u8 = 0x44;
const CMD_IN_LIST_PASSIVE_TARGET: u8 = 0x4A;

/// ISO14443 type A at 106 kbps.
const BRTY_106_TYPE_A: u8 = 0x00;
/// RFConfiguration item: MaxRetries (ATR, PSL, passive activation).
const RF_ITEM_MAX_RETRIES: u8 = 0x05;
/// Passive activation retries per InListPassiveTarget, so detection returns instead of blocking.
const PASSIVE_ACTIVATION_RETRIES: u8 = 0x10;

/// Host-to-PN532 ACK, also used to cancel a pending command.
const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
/// Long preamble wakes the chip from power-down on HSU.
const WAKEUP: [u8; 16] = [
    0x55, 0x55, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
/// Application-level error frame body.
const ERROR_FRAME_BODY: u8 = 0x7F;
/// Status flag: the target's answer is chained, more follows on the next InDataExchange.
const STATUS_MORE_INFORMATION: u8 = 0x40;

/// TFI + command + parameters, as accepted by the PN532.
const MAX_FRAME_BODY: usize = 265;
/// Largest DataOut of InDataExchange (after the target number).
pub const MAX_EXCHANGE_LEN: usize = 262;

const READ_SLICE: Duration = Duration::from_millis(10);
const ACK_TIMEOUT: Duration = Duration::from_millis(100);
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);
const DETECT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Slack on top of the exchange timeout for UART transfer of a full frame.
const HOST_MARGIN: Duration = Duration::from_millis(50);

/// Parsed `pn532_uart:<device>[:<baud>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnString {
    pub path: String,
    pub baud: u32,
}

impl ConnString {
    pub fn parse(s: &str) -> Result<Self, Pn532Error> {
        let mut parts = s.split(':');
        let driver = parts.next().unwrap_or_default();
        if driver != DRIVER_UART {
            return Err(Pn532Error::UnsupportedDriver(driver.to_string()));
        }
        let path = match parts.next() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => return Err(Pn532Error::InvalidConnString(s.to_string())),
        };
        let baud = match parts.next() {
            Some(b) => b
                .parse()
                .map_err(|_| Pn532Error::InvalidConnString(s.to_string()))?,
            None => DEFAULT_BAUD,
        };
        if parts.next().is_some() {
            return Err(Pn532Error::InvalidConnString(s.to_string()));
        }
        Ok(Self { path, baud })
    }
}

/// Target listed by InListPassiveTarget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pn532Target {
    /// Logical target number assigned by the PN532.
    pub tg: u8,
    pub uid: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    Ack,
    Nack,
    /// Response body after the TFI: command code + data.
    Info(Vec<u8>),
}

/// Byte link to the chip. Reads time out after a short slice with `ErrorKind::TimedOut`.
pub trait HsuPort: Read + Write + Send {
    /// Drop whatever the chip sent that has not been read yet.
    fn clear_input(&mut self) -> io::Result<()>;
}

impl HsuPort for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

pub struct Pn532 {
    port: Box<dyn HsuPort>,
    rx: Vec<u8>,
}

impl Pn532 {
    /// Open the port, wake the chip and configure it as initiator.
    pub fn open(conn: &ConnString) -> Result<Self, Pn532Error> {
        let port = serialport::new(&conn.path, conn.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_SLICE)
            .open()?;
        let mut dev = Self::with_port(Box::new(port));
        dev.wake_up()?;
        // Normal mode, 1 s virtual card timeout, use IRQ.
        dev.command(CMD_SAM_CONFIGURATION, &[0x01, 0x14, 0x01], CONTROL_TIMEOUT)?;
        dev.command(
            CMD_RF_CONFIGURATION,
            &[RF_ITEM_MAX_RETRIES, 0xFF, 0x01, PASSIVE_ACTIVATION_RETRIES],
            CONTROL_TIMEOUT,
        )?;
        info!(path = %conn.path, baud = conn.baud, "NFC device opened");
        Ok(dev)
    }

    fn with_port(port: Box<dyn HsuPort>) -> Self {
        Self {
            port,
            rx: Vec::new(),
        }
    }

    fn wake_up(&mut self) -> Result<(), Pn532Error> {
        self.port.write_all(&WAKEUP)?;
        self.port.flush()?;
        std::thread::sleep(Duration::from_millis(10));
        self.port.clear_input()?;
        Ok(())
    }

    /// Send one command and return the response data after the response code.
    fn command(
        &mut self,
        cmd: u8,
        params: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, Pn532Error> {
        let frame = encode_frame(cmd, params)?;
        self.rx.clear();
        self.port.clear_input()?;
        self.port.write_all(&frame)?;
        self.port.flush()?;

        match self.read_frame(ACK_TIMEOUT)? {
            Parsed::Ack => {}
            Parsed::Nack => return Err(Pn532Error::Nack),
            Parsed::Info(_) => return Err(Pn532Error::MissingAck),
        }
        let body = match self.read_frame(timeout) {
            Ok(Parsed::Info(body)) => body,
            Ok(_) => return Err(Pn532Error::MissingAck),
            Err(Pn532Error::Timeout) => {
                self.cancel();
                return Err(Pn532Error::Timeout);
            }
            Err(e) => return Err(e),
        };
        let expected = cmd.wrapping_add(1);
        match body.split_first() {
            Some((&code, data)) if code == expected => Ok(data.to_vec()),
            Some((&code, _)) => Err(Pn532Error::UnexpectedResponse {
                expected,
                got: code,
            }),
            None => Err(Pn532Error::ShortResponse),
        }
    }

    /// Abort the pending command; the chip drops it on receiving an ACK.
    fn cancel(&mut self) {
        if let Err(e) = self.port.write_all(&ACK_FRAME) {
            debug!(error = %e, "cancel failed");
        }
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Parsed, Pn532Error> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 64];
        loop {
            let (consumed, parsed) = match parse_frame(&self.rx) {
                Ok(r) => r,
                Err(e) => {
                    self.rx.clear();
                    return Err(e);
                }
            };
            self.rx.drain(..consumed);
            if let Some(p) = parsed {
                return Ok(p);
            }
            if Instant::now() >= deadline {
                return Err(Pn532Error::Timeout);
            }
            match self.port.read(&mut chunk) {
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Transceiver for Pn532 {
    type Target = Pn532Target;

    fn detect_target(&mut self) -> Result<Option<Pn532Target>, TransportError> {
        match self.command(
            CMD_IN_LIST_PASSIVE_TARGET,
            &[0x01, BRTY_106_TYPE_A],
            DETECT_TIMEOUT,
        ) {
            Ok(resp) => {
                let target = parse_passive_target(&resp)?;
                if let Some(t) = &target {
                    info!(uid = %hex::encode(&t.uid), "target detected");
                }
                Ok(target)
            }
            Err(Pn532Error::Timeout) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn transceive(
        &mut self,
        target: &Pn532Target,
        command: &Frame,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let command = command.as_bytes();
        if command.len() > MAX_EXCHANGE_LEN {
            return Err(Pn532Error::FrameTooLarge(command.len()).into());
        }
        let mut params = Vec::with_capacity(1 + command.len());
        params.push(target.tg);
        params.extend_from_slice(command);
        let timeout = timeout + HOST_MARGIN;
        let mut resp = self.command(CMD_IN_DATA_EXCHANGE, &params, timeout)?;
        let mut out = Vec::new();
        loop {
            let (status, data) = resp.split_first().ok_or(Pn532Error::ShortResponse)?;
            let more = check_status(*status)?;
            if out.len() + data.len() > MAX_FRAME_LEN {
                return Err(Pn532Error::ResponseTooLarge(out.len() + data.len()).into());
            }
            out.extend_from_slice(data);
            if !more {
                return Ok(out);
            }
            // Chained answer: an exchange with no data fetches the next part.
            resp = self.command(CMD_IN_DATA_EXCHANGE, &[target.tg], timeout)?;
        }
    }

    fn deselect(&mut self, target: &Pn532Target) -> Result<(), TransportError> {
        let resp = self.command(CMD_IN_DESELECT, &[target.tg], CONTROL_TIMEOUT)?;
        let status = resp.first().ok_or(Pn532Error::ShortResponse)?;
        check_status(*status)?;
        Ok(())
    }
}

fn encode_frame(cmd: u8, params: &[u8]) -> Result<Vec<u8>, Pn532Error> {
    let mut body = Vec::with_capacity(2 + params.len());
    body.push(TFI_HOST);
    body.push(cmd);
    body.extend_from_slice(params);
    build_frame(&body)
}

/// Wrap `body` (TFI onward) with preamble, length, checksums and postamble.
fn build_frame(body: &[u8]) -> Result<Vec<u8>, Pn532Error> {
    let len = body.len();
    if len > MAX_FRAME_BODY {
        return Err(Pn532Error::FrameTooLarge(len));
    }
    let mut out = Vec::with_capacity(len + 10);
    out.extend_from_slice(&[0x00, 0x00, 0xFF]);
    if len <= 0xFF {
        out.push(len as u8);
        out.push((len as u8).wrapping_neg());
    } else {
        let [hi, lo] = (len as u16).to_be_bytes();
        out.extend_from_slice(&[0xFF, 0xFF, hi, lo, hi.wrapping_add(lo).wrapping_neg()]);
    }
    out.extend_from_slice(body);
    out.push(checksum(body));
    out.push(0x00);
    Ok(out)
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// Parse one frame from the front of `buf`. Returns bytes to drop and the frame, if complete.
/// Bytes before the start code are dropped.
fn parse_frame(buf: &[u8]) -> Result<(usize, Option<Parsed>), Pn532Error> {
    let Some(start) = buf.windows(2).position(|w| w == [0x00, 0xFF]) else {
        // Keep a trailing 0x00, it may begin the next start code.
        return Ok((buf.len().saturating_sub(1), None));
    };
    let p = start + 2;
    if buf.len() < p + 2 {
        return Ok((start, None));
    }
    let (len, data_start) = match (buf[p], buf[p + 1]) {
        (0x00, 0xFF) => return Ok((p + 2, Some(Parsed::Ack))),
        (0xFF, 0x00) => return Ok((p + 2, Some(Parsed::Nack))),
        (0xFF, 0xFF) => {
            if buf.len() < p + 5 {
                return Ok((start, None));
            }
            let (hi, lo, lcs) = (buf[p + 2], buf[p + 3], buf[p + 4]);
            if hi.wrapping_add(lo).wrapping_add(lcs) != 0 {
                return Err(Pn532Error::Checksum("length"));
            }
            (u16::from_be_bytes([hi, lo]) as usize, p + 5)
        }
        (len, lcs) => {
            if len.wrapping_add(lcs) != 0 {
                return Err(Pn532Error::Checksum("length"));
            }
            (len as usize, p + 2)
        }
    };
    if buf.len() < data_start + len + 1 {
        return Ok((start, None));
    }
    let body = &buf[data_start..data_start + len];
    if checksum(body) != buf[data_start + len] {
        return Err(Pn532Error::Checksum("data"));
    }
    let consumed = data_start + len + 1;
    match body {
        [ERROR_FRAME_BODY] => Err(Pn532Error::ApplicationError),
        [TFI_PN532, rest @ ..] => Ok((consumed, Some(Parsed::Info(rest.to_vec())))),
        _ => Err(Pn532Error::UnexpectedTfi),
    }
}

/// InListPassiveTarget response: `NbTg [Tg SENS_RES(2) SEL_RES NFCIDLen NFCID..]`.
fn parse_passive_target(resp: &[u8]) -> Result<Option<Pn532Target>, Pn532Error> {
    match resp {
        [] => Err(Pn532Error::ShortResponse),
        [0, ..] => Ok(None),
        [_, tg, _, _, _, uid_len, rest @ ..] if rest.len() >= *uid_len as usize => {
            Ok(Some(Pn532Target {
                tg: *tg,
                uid: rest[..*uid_len as usize].to_vec(),
            }))
        }
        _ => Err(Pn532Error::ShortResponse),
    }
}

/// Low six bits of the InDataExchange/InDeselect status byte carry the error code.
/// Returns whether the MI flag announces more data.
fn check_status(status: u8) -> Result<bool, Pn532Error> {
    match status & 0x3F {
        0x00 => Ok(status & STATUS_MORE_INFORMATION != 0),
        0x01 => Err(Pn532Error::Timeout),
        code => Err(Pn532Error::Status(code)),
    }
}

/// Reject chunk sizes whose data command cannot fit one InDataExchange.
pub fn check_chunk_size(chunk_size: usize) -> Result<(), Pn532Error> {
    let len = DATA_HEADER_LEN + chunk_size;
    if len > MAX_EXCHANGE_LEN {
        return Err(Pn532Error::ChunkSizeTooLarge {
            chunk_size,
            max: MAX_EXCHANGE_LEN - DATA_HEADER_LEN,
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum Pn532Error {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported driver {0:?} (expected {})", DRIVER_UART)]
    UnsupportedDriver(String),
    #[error("invalid connection string {0:?}")]
    InvalidConnString(String),
    #[error("timed out waiting for PN532")]
    Timeout,
    #[error("PN532 sent NACK")]
    Nack,
    #[error("PN532 did not acknowledge command")]
    MissingAck,
    #[error("{0} checksum mismatch")]
    Checksum(&'static str),
    #[error("PN532 application error frame")]
    ApplicationError,
    #[error("unexpected frame identifier")]
    UnexpectedTfi,
    #[error("unexpected response code {got:#04x} (expected {expected:#04x})")]
    UnexpectedResponse { expected: u8, got: u8 },
    #[error("response too short")]
    ShortResponse,
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("chained response too large: {0} bytes")]
    ResponseTooLarge(usize),
    #[error("chunk size {chunk_size} does not fit a PN532 exchange (max {max})")]
    ChunkSizeTooLarge { chunk_size: usize, max: usize },
    #[error("PN532 status {0:#04x}")]
    Status(u8),
}

impl From<Pn532Error> for TransportError {
    fn from(e: Pn532Error) -> Self {
        match e {
            Pn532Error::Timeout => TransportError::Timeout,
            other => TransportError::Link(other.to_string()),
        }
    }
}
