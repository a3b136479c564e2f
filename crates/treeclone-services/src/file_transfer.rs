//! File transfer: chunked sending and sequential reassembly.
//!
//! The sender reads a file front to back and fires one Cloning message per
//! chunk without waiting for acknowledgement. The receiver appends each
//! chunk to the destination file, so chunks for one (sender, destination)
//! pair must arrive in index order with no gaps. Anything else is rejected
//! with [`ReassemblyError::OutOfOrder`] instead of being written.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Mutex;

use treeclone_core::chunk::{effective_chunk_size, total_chunks};
use treeclone_core::{ChunkBody, ChunkError, Message, MessageError, Selection};

use crate::transport::{Transport, TransportError};

// ── Sender ────────────────────────────────────────────────────────────────────

/// Addressing for one outbound file.
#[derive(Debug, Clone)]
pub struct FileSend {
    /// Local peer address, used as `From`.
    pub from: String,
    /// Requester receiving the file.
    pub to: String,
    /// Epoch echoed from the Summary.
    pub request_id: u64,
    pub selection: Selection,
    pub chunk_size: usize,
}

/// Outcome of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub destination: String,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
}

/// Stream one file as Cloning messages. Blocking; run it off the async
/// executor.
///
/// Stops at the first read or transport failure. The receiver is not told.
pub fn stream_file(transport: &dyn Transport, job: &FileSend) -> Result<TransferReport, TransferError> {
    let source = PathBuf::from(&job.selection.source);
    let mut file = File::open(&source).map_err(|e| TransferError::Open {
        path: source.clone(),
        source: e,
    })?;
    let size = file
        .metadata()
        .map_err(|e| TransferError::Open {
            path: source.clone(),
            source: e,
        })?
        .len();

    let chunk_size = effective_chunk_size(job.chunk_size);
    let total = total_chunks(size, chunk_size);

    if total == 0 {
        send_chunk(transport, job, ChunkBody::empty_file(), 0)?;
        tracing::info!(
            source = %source.display(),
            destination = %job.selection.destination,
            to = %job.to,
            "empty file sent"
        );
        return Ok(TransferReport {
            destination: job.selection.destination.clone(),
            chunks_sent: 1,
            bytes_sent: 0,
        });
    }

    let mut buf = vec![0u8; chunk_size];
    let mut index = 0u64;
    let mut bytes_sent = 0u64;

    // Never emit more than the declared total, even if the file grew.
    while index < total {
        let n = read_up_to(&mut file, &mut buf).map_err(|e| TransferError::Read {
            path: source.clone(),
            chunks_sent: index,
            source: e,
        })?;
        if n == 0 {
            break;
        }
        send_chunk(transport, job, ChunkBody::new(index, total, buf[..n].to_vec()), index)?;
        tracing::debug!(
            destination = %job.selection.destination,
            chunk = index,
            total,
            "chunk sent"
        );
        index += 1;
        bytes_sent += n as u64;
    }

    if index < total {
        tracing::warn!(
            source = %source.display(),
            sent = index,
            total,
            "file shrank during transfer"
        );
    }

    tracing::info!(
        source = %source.display(),
        destination = %job.selection.destination,
        to = %job.to,
        chunks = index,
        bytes = bytes_sent,
        "file sent"
    );
    Ok(TransferReport {
        destination: job.selection.destination.clone(),
        chunks_sent: index,
        bytes_sent,
    })
}

fn send_chunk(
    transport: &dyn Transport,
    job: &FileSend,
    chunk: ChunkBody,
    chunks_sent: u64,
) -> Result<(), TransferError> {
    let message = Message::cloning(
        job.from.clone(),
        job.to.clone(),
        job.request_id,
        chunk.encode(),
        job.selection.destination.clone(),
    );
    let frame = message.to_bytes()?;
    transport
        .send(Bytes::from(frame))
        .map_err(|source| TransferError::Transport {
            chunks_sent,
            source,
        })
}

/// Fill `buf` unless EOF comes first. Returns bytes read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("read of {path} failed after {chunks_sent} chunks: {source}")]
    Read {
        path: PathBuf,
        chunks_sent: u64,
        source: std::io::Error,
    },
    #[error("transport lost after {chunks_sent} chunks: {source}")]
    Transport {
        chunks_sent: u64,
        source: TransportError,
    },
    #[error(transparent)]
    Encode(#[from] MessageError),
}

// ── Reassembler ───────────────────────────────────────────────────────────────

/// Result of accepting one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk appended; more are expected.
    Written { index: u64, total: u64 },
    /// Final chunk appended; the file is complete.
    Completed { path: PathBuf, chunks: u64, bytes: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    Header(#[from] ChunkError),
    #[error("cloning message from {0} carries no destination path")]
    MissingDestination(String),
    #[error("out-of-order chunk for {destination}: expected {expected:?}, got {got}")]
    OutOfOrder {
        destination: PathBuf,
        expected: Option<u64>,
        got: u64,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

struct FileAssembly {
    next_index: u64,
    total: u64,
    bytes_written: u64,
    started_at: Instant,
}

type AssemblyKey = (String, PathBuf);

/// Tracks files being rebuilt from incoming chunks, keyed by
/// (sender address, destination path).
#[derive(Default)]
pub struct FileReassembler {
    active: Mutex<HashMap<AssemblyKey, FileAssembly>>,
}

impl FileReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one Cloning message.
    pub async fn accept(&self, message: &Message) -> Result<ChunkOutcome, ReassemblyError> {
        let destination = message
            .meta_data
            .as_deref()
            .ok_or_else(|| ReassemblyError::MissingDestination(message.from.clone()))?;
        self.add_chunk(&message.from, Path::new(destination), &message.body)
            .await
    }

    /// Parse `body` and append it to `destination`.
    pub async fn add_chunk(
        &self,
        sender: &str,
        destination: &Path,
        body: &str,
    ) -> Result<ChunkOutcome, ReassemblyError> {
        let chunk = ChunkBody::parse(body)?;
        let key = (sender.to_string(), destination.to_path_buf());
        let mut active = self.active.lock().await;

        if chunk.index == 0 {
            if let Some(stale) = active.remove(&key) {
                tracing::warn!(
                    sender,
                    destination = %destination.display(),
                    received = stale.next_index,
                    total = stale.total,
                    "transfer restarted before completion"
                );
            }
        } else {
            let expected = active.get(&key).map(|a| (a.next_index, a.total));
            match expected {
                Some((next, total)) if next == chunk.index && total == chunk.total => {}
                _ => {
                    return Err(ReassemblyError::OutOfOrder {
                        destination: destination.to_path_buf(),
                        expected: expected.map(|(next, _)| next),
                        got: chunk.index,
                    });
                }
            }
        }

        if let Err(source) = write_chunk(destination, &chunk) {
            active.remove(&key);
            return Err(ReassemblyError::Io {
                path: destination.to_path_buf(),
                source,
            });
        }

        let assembly = active.entry(key).or_insert_with(|| FileAssembly {
            next_index: 0,
            total: chunk.total,
            bytes_written: 0,
            started_at: Instant::now(),
        });
        assembly.next_index = chunk.index + 1;
        assembly.bytes_written += chunk.payload.len() as u64;

        tracing::debug!(
            sender,
            destination = %destination.display(),
            chunk = chunk.index,
            total = chunk.total,
            "chunk written"
        );

        if chunk.is_last() {
            let chunks = assembly.next_index.min(chunk.total);
            let bytes = assembly.bytes_written;
            let elapsed_ms = assembly.started_at.elapsed().as_millis() as u64;
            active.remove(&(sender.to_string(), destination.to_path_buf()));
            tracing::info!(
                sender,
                path = %destination.display(),
                chunks,
                bytes,
                elapsed_ms,
                "file received and reassembled"
            );
            return Ok(ChunkOutcome::Completed {
                path: destination.to_path_buf(),
                chunks,
                bytes,
            });
        }

        Ok(ChunkOutcome::Written {
            index: chunk.index,
            total: chunk.total,
        })
    }

    /// (sender, destination) pairs still waiting for chunks.
    pub async fn in_progress(&self) -> Vec<(String, PathBuf)> {
        self.active.lock().await.keys().cloned().collect()
    }

    /// Drop all partial state. Called on engine shutdown.
    pub async fn clear(&self) {
        let mut active = self.active.lock().await;
        for ((sender, destination), assembly) in active.drain() {
            tracing::warn!(
                sender,
                destination = %destination.display(),
                received = assembly.next_index,
                total = assembly.total,
                "discarding incomplete transfer"
            );
        }
    }
}

/// Overwrite on chunk 0, append otherwise.
fn write_chunk(destination: &Path, chunk: &ChunkBody) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = if chunk.index == 0 {
        File::create(destination)?
    } else {
        OpenOptions::new().append(true).open(destination)?
    };
    file.write_all(&chunk.payload)
}
