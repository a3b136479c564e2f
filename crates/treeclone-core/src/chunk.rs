//! Chunk body codec: `"<index>/<total>:<base64 payload>"`.
//!
//! A file of `S` bytes is cut into `ceil(S / chunk_size)` chunks numbered
//! from 0. Every chunk carries the total so the receiver knows when it
//! has seen the last one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Default chunk payload size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Decoded Cloning body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkBody {
    /// 0-based position of this chunk in the file.
    pub index: u64,
    /// Number of data chunks the sender will emit. 0 for an empty file.
    pub total: u64,
    pub payload: Vec<u8>,
}

impl ChunkBody {
    pub fn new(index: u64, total: u64, payload: Vec<u8>) -> Self {
        Self {
            index,
            total,
            payload,
        }
    }

    /// Marker emitted for a 0-byte file so the receiver still creates it.
    pub fn empty_file() -> Self {
        Self::new(0, 0, Vec::new())
    }

    /// True when nothing follows this chunk.
    pub fn is_last(&self) -> bool {
        self.total == 0 || self.index + 1 == self.total
    }

    pub fn encode(&self) -> String {
        format!("{}/{}:{}", self.index, self.total, STANDARD.encode(&self.payload))
    }

    pub fn parse(body: &str) -> Result<Self, ChunkError> {
        let (header, payload) = body
            .split_once(':')
            .ok_or(ChunkError::MalformedHeader("missing ':' separator"))?;
        let (index, total) = header
            .split_once('/')
            .ok_or(ChunkError::MalformedHeader("missing '/' separator"))?;
        let index: u64 = index
            .trim()
            .parse()
            .map_err(|_| ChunkError::MalformedHeader("chunk index is not a number"))?;
        let total: u64 = total
            .trim()
            .parse()
            .map_err(|_| ChunkError::MalformedHeader("chunk total is not a number"))?;

        if total == 0 && index != 0 {
            return Err(ChunkError::MalformedHeader("non-zero index for empty file"));
        }
        if total > 0 && index >= total {
            return Err(ChunkError::MalformedHeader("chunk index beyond total"));
        }

        let payload = STANDARD.decode(payload.trim())?;
        Ok(Self::new(index, total, payload))
    }
}

/// `ceil(size / chunk_size)`. A `chunk_size` of 0 falls back to the default.
pub fn total_chunks(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(effective_chunk_size(chunk_size) as u64)
}

/// Split an in-memory buffer into numbered chunks.
pub fn split(data: &[u8], chunk_size: usize) -> Vec<ChunkBody> {
    let size = effective_chunk_size(chunk_size);
    let total = total_chunks(data.len() as u64, size);
    data.chunks(size)
        .enumerate()
        .map(|(i, piece)| ChunkBody::new(i as u64, total, piece.to_vec()))
        .collect()
}

pub fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("malformed chunk header: {0}")]
    MalformedHeader(&'static str),
    #[error("malformed chunk payload: {0}")]
    MalformedPayload(#[from] base64::DecodeError),
}
