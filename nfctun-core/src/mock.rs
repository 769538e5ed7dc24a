//! Scripted target and fetcher for driving the session loop in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::port::{FetchError, Fetcher, TransportError, Transceiver};
use crate::protocol::{Command, STATUS_OK};
use crate::wire::{self, Frame, Locator};

/// Simulated phone-side tunnel application.
#[derive(Clone)]
pub struct MockTarget {
    inner: Arc<Mutex<MockTargetInner>>,
}

struct MockTargetInner {
    /// Detection results, front first. Empty queue means no target.
    presentations: VecDeque<Result<bool, TransportError>>,
    select_response: Vec<u8>,
    locator: String,
    /// Reply `status` to the data command with this seq.
    reject_seq: Option<(u16, u8)>,
    /// Fail the n-th exchange (0-based, counted across the whole test) with this error.
    fail_exchange: Option<(usize, TransportError)>,
    exchanges: usize,
    commands: Vec<Command>,
    timeouts: Vec<Duration>,
    deselects: usize,
    fail_deselect: bool,
    /// Raised on every deselect, to stop a running loop after one session.
    shutdown_on_deselect: Option<Arc<AtomicBool>>,
}

impl MockTarget {
    pub fn new(locator: &str) -> Self {
        MockTarget {
            inner: Arc::new(Mutex::new(MockTargetInner {
                presentations: VecDeque::new(),
                select_response: wire::encode_select_ok(),
                locator: locator.to_string(),
                reject_seq: None,
                fail_exchange: None,
                exchanges: 0,
                commands: Vec::new(),
                timeouts: Vec::new(),
                deselects: 0,
                fail_deselect: false,
                shutdown_on_deselect: None,
            })),
        }
    }

    /// Queue one detection poll result.
    pub fn present(&self, found: bool) {
        self.inner.lock().unwrap().presentations.push_back(Ok(found));
    }

    /// Queue one failing detection poll.
    pub fn fail_detection(&self, err: TransportError) {
        self.inner.lock().unwrap().presentations.push_back(Err(err));
    }

    pub fn shutdown_on_deselect(&self, flag: Arc<AtomicBool>) {
        self.inner.lock().unwrap().shutdown_on_deselect = Some(flag);
    }

    pub fn set_select_response(&self, response: &[u8]) {
        self.inner.lock().unwrap().select_response = response.to_vec();
    }

    pub fn reject_chunk(&self, seq: u16, status: u8) {
        self.inner.lock().unwrap().reject_seq = Some((seq, status));
    }

    pub fn fail_exchange(&self, index: usize, err: TransportError) {
        self.inner.lock().unwrap().fail_exchange = Some((index, err));
    }

    pub fn fail_deselect(&self) {
        self.inner.lock().unwrap().fail_deselect = true;
    }

    /// Every command received so far, decoded.
    pub fn commands(&self) -> Vec<Command> {
        self.inner.lock().unwrap().commands.clone()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().timeouts.clone()
    }

    pub fn deselects(&self) -> usize {
        self.inner.lock().unwrap().deselects
    }

    /// Data chunks received, in arrival order, as (seq, total, payload).
    pub fn data_chunks(&self) -> Vec<(u16, u16, Vec<u8>)> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Data {
                    seq,
                    total,
                    payload,
                } => Some((seq, total, payload)),
                _ => None,
            })
            .collect()
    }
}

impl Transceiver for MockTarget {
    type Target = u8;

    fn detect_target(&mut self) -> Result<Option<u8>, TransportError> {
        let found = self
            .inner
            .lock()
            .unwrap()
            .presentations
            .pop_front()
            .unwrap_or(Ok(false))?;
        Ok(found.then_some(1))
    }

    fn transceive(
        &mut self,
        _target: &u8,
        command: &Frame,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.exchanges;
        inner.exchanges += 1;
        inner.timeouts.push(timeout);
        let cmd = wire::decode_command(command.as_bytes())
            .map_err(|e| TransportError::Link(e.to_string()))?;
        inner.commands.push(cmd.clone());
        if let Some((n, err)) = &inner.fail_exchange {
            if *n == index {
                return Err(err.clone());
            }
        }
        let response = match cmd {
            Command::Select => inner.select_response.clone(),
            Command::ReadLocator => wire::encode_locator_response(&inner.locator),
            Command::Data { seq, .. } => match inner.reject_seq {
                Some((s, status)) if s == seq => wire::encode_status(status),
                _ => wire::encode_status(STATUS_OK),
            },
            Command::Abort { .. } => wire::encode_status(STATUS_OK),
        };
        Ok(response)
    }

    fn deselect(&mut self, _target: &u8) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.deselects += 1;
        if let Some(flag) = &inner.shutdown_on_deselect {
            flag.store(true, Ordering::Relaxed);
        }
        if inner.fail_deselect {
            return Err(TransportError::Link("deselect failed".into()));
        }
        Ok(())
    }
}

/// Fetcher answering every locator with the same result.
#[derive(Clone)]
pub struct MockFetcher {
    inner: Arc<Mutex<MockFetcherInner>>,
}

struct MockFetcherInner {
    result: Result<Vec<u8>, FetchError>,
    requested: Vec<String>,
}

impl MockFetcher {
    pub fn ok(payload: Vec<u8>) -> Self {
        Self::with_result(Ok(payload))
    }

    pub fn err(err: FetchError) -> Self {
        Self::with_result(Err(err))
    }

    fn with_result(result: Result<Vec<u8>, FetchError>) -> Self {
        MockFetcher {
            inner: Arc::new(Mutex::new(MockFetcherInner {
                result,
                requested: Vec::new(),
            })),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.inner.lock().unwrap().requested.clone()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&mut self, locator: &Locator) -> Result<Vec<u8>, FetchError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requested.push(locator.as_str().to_string());
        inner.result.clone()
    }
}
