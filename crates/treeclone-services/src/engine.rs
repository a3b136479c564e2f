//! Client protocol engine: the four-phase exchange seen from one peer.
//!
//! A peer plays both roles at once: requester (sends Request and Summary,
//! collects Responses, reassembles Cloning chunks) and responder (answers
//! Requests, streams files named in a Summary).
//!
//! Phases, requester side:
//!
//! ```text
//! Idle ──send_request──▶ AwaitingResponses ──Response──▶ ReadyToSummarize
//!   ▲                                                        │
//!   └──────────cancel_cloning──── CloningInProgress ◀──send_summary
//! ```
//!
//! Nothing here is timeout-driven.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use treeclone_core::chunk::DEFAULT_CHUNK_SIZE;
use treeclone_core::summary::{self, parse_lines};
use treeclone_core::{Message, MessageError, Selection, Subject};

use crate::file_transfer::{
    stream_file, ChunkOutcome, FileReassembler, FileSend, ReassemblyError, TransferError,
    TransferReport,
};
use crate::scanner::FileScanner;
use crate::snapshot::SnapshotStore;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingResponses,
    ReadyToSummarize,
    CloningInProgress,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::AwaitingResponses => "awaiting-responses",
            Phase::ReadyToSummarize => "ready-to-summarize",
            Phase::CloningInProgress => "cloning-in-progress",
        })
    }
}

pub type TransferHandle = JoinHandle<Result<TransferReport, TransferError>>;

/// What `on_data_received` did with one inbound message.
#[derive(Debug)]
pub enum Dispatched {
    /// Our own broadcast for the current epoch; not dispatched.
    SelfEcho,
    /// Answered a Request with our listing.
    Responded { to: String },
    /// Stored a responder's listing.
    ResponseRecorded { from: String, snapshot: PathBuf },
    /// Started one send per valid Summary line.
    TransfersStarted {
        to: String,
        transfers: Vec<TransferHandle>,
        skipped: usize,
    },
    /// Handed a Cloning chunk to the reassembler.
    Chunk(ChunkOutcome),
}

/// Per-responder result of `send_summary`.
#[derive(Debug, Default)]
pub struct SummaryReport {
    pub sent: Vec<String>,
    pub failed: Vec<(String, EngineError)>,
}

struct EngineState {
    phase: Phase,
    /// Arrival order, no duplicates.
    responders: Vec<String>,
}

pub struct ClientEngine {
    address: String,
    epoch: AtomicU64,
    state: Mutex<EngineState>,
    snapshots: SnapshotStore,
    scanner: Arc<dyn FileScanner>,
    transport: Arc<dyn Transport>,
    reassembler: FileReassembler,
    chunk_size: usize,
}

impl ClientEngine {
    pub fn new(
        address: impl Into<String>,
        transport: Arc<dyn Transport>,
        scanner: Arc<dyn FileScanner>,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            address: address.into(),
            epoch: AtomicU64::new(0),
            state: Mutex::new(EngineState {
                phase: Phase::Idle,
                responders: Vec::new(),
            }),
            snapshots,
            scanner,
            transport,
            reassembler: FileReassembler::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Peers that answered the current request, in arrival order.
    pub async fn responders(&self) -> Vec<String> {
        self.state.lock().await.responders.clone()
    }

    pub fn snapshot_path(&self, peer: &str) -> PathBuf {
        self.snapshots.path_for(peer)
    }

    /// Latest listing `peer` sent, if any.
    pub fn snapshot(&self, peer: &str) -> Result<Option<String>, EngineError> {
        self.snapshots.load(peer).map_err(EngineError::Snapshot)
    }

    /// Files still being reassembled.
    pub async fn incoming(&self) -> Vec<(String, PathBuf)> {
        self.reassembler.in_progress().await
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Decode one frame and dispatch it by subject.
    pub async fn on_data_received(&self, data: &[u8]) -> Result<Dispatched, EngineError> {
        let message = Message::from_bytes(data)?;

        // Broadcast delivery includes the sender.
        if message.from == self.address && message.request_id == self.epoch() {
            tracing::trace!(subject = %message.subject, "dropping own broadcast");
            return Ok(Dispatched::SelfEcho);
        }

        match message.subject {
            Subject::Request => self.on_request(message).await,
            Subject::Response => self.on_response(message).await,
            Subject::Summary => Ok(self.on_summary(message)),
            Subject::Cloning => self.on_cloning(message).await,
        }
    }

    async fn on_request(&self, message: Message) -> Result<Dispatched, EngineError> {
        let scanner = self.scanner.clone();
        let snapshot = tokio::task::spawn_blocking(move || scanner.snapshot())
            .await
            .map_err(|e| EngineError::Scan(e.into()))?
            .map_err(EngineError::Scan)?;

        let reply = Message::response(
            self.address.clone(),
            message.from.clone(),
            message.request_id,
            snapshot,
        );
        self.transport.send(Bytes::from(reply.to_bytes()?))?;
        tracing::info!(
            to = %message.from,
            request_id = message.request_id,
            "answered request"
        );
        Ok(Dispatched::Responded { to: message.from })
    }

    async fn on_response(&self, message: Message) -> Result<Dispatched, EngineError> {
        let snapshot = self
            .snapshots
            .store(&message.from, &message.body)
            .map_err(EngineError::Snapshot)?;

        let mut state = self.state.lock().await;
        if !state.responders.contains(&message.from) {
            state.responders.push(message.from.clone());
        }
        if state.phase == Phase::AwaitingResponses {
            state.phase = Phase::ReadyToSummarize;
        }
        tracing::info!(
            from = %message.from,
            request_id = message.request_id,
            responders = state.responders.len(),
            path = %snapshot.display(),
            "response recorded"
        );
        Ok(Dispatched::ResponseRecorded {
            from: message.from,
            snapshot,
        })
    }

    fn on_summary(&self, message: Message) -> Dispatched {
        let mut transfers = Vec::new();
        let mut skipped = 0;

        for line in parse_lines(&message.body) {
            let selection = match line {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(from = %message.from, error = %e, "skipping summary line");
                    skipped += 1;
                    continue;
                }
            };
            let job = FileSend {
                from: self.address.clone(),
                to: message.from.clone(),
                request_id: message.request_id,
                selection,
                chunk_size: self.chunk_size,
            };
            let transport = self.transport.clone();
            transfers.push(tokio::task::spawn_blocking(move || {
                let result = stream_file(transport.as_ref(), &job);
                if let Err(e) = &result {
                    tracing::error!(
                        source = %job.selection.source,
                        to = %job.to,
                        error = %e,
                        "file send failed"
                    );
                }
                result
            }));
        }

        tracing::info!(
            from = %message.from,
            request_id = message.request_id,
            files = transfers.len(),
            skipped,
            "summary accepted"
        );
        Dispatched::TransfersStarted {
            to: message.from,
            transfers,
            skipped,
        }
    }

    async fn on_cloning(&self, message: Message) -> Result<Dispatched, EngineError> {
        let outcome = self.reassembler.accept(&message).await?;
        let mut state = self.state.lock().await;
        if state.phase != Phase::CloningInProgress {
            state.phase = Phase::CloningInProgress;
        }
        Ok(Dispatched::Chunk(outcome))
    }

    // ── Local actions ────────────────────────────────────────────────────────

    /// Broadcast a Request for the current epoch. Clears the responder set.
    pub async fn send_request(&self) -> Result<u64, EngineError> {
        let epoch = self.epoch();
        {
            let mut state = self.state.lock().await;
            state.responders.clear();
            state.phase = Phase::AwaitingResponses;
        }
        let request = Message::request(self.address.clone(), epoch);
        self.transport.send(Bytes::from(request.to_bytes()?))?;
        tracing::info!(epoch, "request broadcast");
        Ok(epoch)
    }

    /// Send one Summary per responder with a non-empty selection.
    pub async fn send_summary(&self, selections: &BTreeMap<String, Vec<Selection>>) -> SummaryReport {
        let epoch = self.epoch();
        let mut report = SummaryReport::default();

        for (peer, list) in selections {
            if list.is_empty() {
                continue;
            }
            let message = Message::summary(
                self.address.clone(),
                peer.clone(),
                epoch,
                summary::to_body(list),
            );
            let sent = message
                .to_bytes()
                .map_err(EngineError::from)
                .and_then(|frame| {
                    self.transport
                        .send(Bytes::from(frame))
                        .map_err(EngineError::from)
                });
            match sent {
                Ok(()) => {
                    tracing::info!(to = %peer, files = list.len(), epoch, "summary sent");
                    report.sent.push(peer.clone());
                }
                Err(e) => {
                    tracing::warn!(to = %peer, error = %e, "summary send failed");
                    report.failed.push((peer.clone(), e));
                }
            }
        }

        if !report.sent.is_empty() {
            self.state.lock().await.phase = Phase::CloningInProgress;
        }
        report
    }

    /// Move to the next epoch. Transfers already running keep going.
    pub async fn cancel_cloning(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().await.phase = Phase::Idle;
        tracing::info!(epoch, "cloning cancelled");
        epoch
    }

    /// Drop partial reassembly state.
    pub async fn shutdown(&self) {
        self.reassembler.clear().await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("transport unavailable: {0}")]
    Transport(#[from] TransportError),
    #[error("scan failed: {0:#}")]
    Scan(anyhow::Error),
    #[error("snapshot store failed: {0:#}")]
    Snapshot(anyhow::Error),
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
}
