//! Chunk planning: split a payload into sequenced fixed-size spans.
//!
//! An empty payload plans zero chunks; delivery of an empty payload sends no
//! data commands at all.

use std::ops::Range;

/// Chunk identifier: sequence number + byte range within the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkSpan {
    pub seq: u16,
    pub offset: usize,
    pub len: usize,
}

impl ChunkSpan {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Plan for delivering `payload_len` bytes in chunks of `chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    payload_len: usize,
    chunk_size: usize,
    total: u16,
}

impl ChunkPlan {
    /// `total = ceil(payload_len / chunk_size)`, bounded by the 16-bit sequence space.
    pub fn new(payload_len: usize, chunk_size: usize) -> Result<Self, ChunkPlanError> {
        if chunk_size == 0 {
            return Err(ChunkPlanError::ZeroChunkSize);
        }
        let total = payload_len.div_ceil(chunk_size);
        let total = u16::try_from(total).map_err(|_| ChunkPlanError::SequenceSpaceExceeded {
            total,
        })?;
        Ok(Self {
            payload_len,
            chunk_size,
            total,
        })
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Span for `seq`, or `None` when `seq >= total`.
    pub fn chunk(&self, seq: u16) -> Option<ChunkSpan> {
        if seq >= self.total {
            return None;
        }
        let offset = seq as usize * self.chunk_size;
        let len = (self.payload_len - offset).min(self.chunk_size);
        Some(ChunkSpan { seq, offset, len })
    }

    /// Spans in order 0..total. Each call starts a fresh iteration.
    pub fn iter(&self) -> Chunks {
        Chunks {
            plan: *self,
            next: 0,
        }
    }
}

impl IntoIterator for &ChunkPlan {
    type Item = ChunkSpan;
    type IntoIter = Chunks;

    fn into_iter(self) -> Chunks {
        self.iter()
    }
}

/// Iterator over the spans of a `ChunkPlan`.
#[derive(Debug, Clone)]
pub struct Chunks {
    plan: ChunkPlan,
    next: u32,
}

impl Iterator for Chunks {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        let seq = u16::try_from(self.next).ok()?;
        let span = self.plan.chunk(seq)?;
        self.next += 1;
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.plan.total as u32).saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkPlanError {
    #[error("chunk size must be at least 1 byte")]
    ZeroChunkSize,
    #[error("sequence space exceeded: {total} chunks (max {})", u16::MAX)]
    SequenceSpaceExceeded { total: usize },
}
