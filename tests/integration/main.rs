//! treeclone integration test harness.
//!
//! Peers here are real `ClientEngine`s wired through a real `Router`, the
//! same routing code the relay runs. Only the TCP hop is replaced: each
//! peer's outbound frames go straight into `Router::route`, and each
//! peer's inbound queue is drained by a task that feeds its engine.
//!
//!   cargo test --test integration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::mpsc;

use treeclone_services::{
    ClientEngine, ConnectionHandle, Dispatched, DirectoryScanner, EngineError, FileScanner,
    PeerRegistry, Router, SnapshotStore, Transport, TransportError,
};

mod cloning;
mod relay;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Outbound side of an in-process peer.
struct RoutedTransport {
    router: Arc<Router>,
}

impl Transport for RoutedTransport {
    fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        // The relay drops unroutable frames; the sender is never told.
        let _ = self.router.route(&frame);
        Ok(())
    }
}

pub struct Network {
    router: Arc<Router>,
    next_id: u64,
}

impl Network {
    pub fn new() -> Self {
        Self {
            router: Arc::new(Router::new(PeerRegistry::new())),
            next_id: 1,
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        self.router.registry()
    }

    /// Join a peer whose root directory is scanned by `DirectoryScanner`.
    pub fn peer(&mut self, address: &str) -> TestPeer {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("share");
        std::fs::create_dir_all(&root).unwrap();
        let scanner = Arc::new(DirectoryScanner::new(&root, address));
        self.peer_with_scanner(address, dir, root, scanner)
    }

    fn peer_with_scanner(
        &mut self,
        address: &str,
        dir: TempDir,
        root: PathBuf,
        scanner: Arc<dyn FileScanner>,
    ) -> TestPeer {
        let transport = Arc::new(RoutedTransport {
            router: self.router.clone(),
        });
        let snapshots = SnapshotStore::new(dir.path().join("snapshots")).unwrap();
        let engine = Arc::new(ClientEngine::new(address, transport, scanner, snapshots));

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        self.registry()
            .join(address, ConnectionHandle::new(self.next_id, tx))
            .unwrap();
        self.next_id += 1;

        let (events_tx, events) = mpsc::unbounded_channel();
        let inbound = engine.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let outcome = inbound.on_data_received(&frame).await;
                if events_tx.send(outcome).is_err() {
                    break;
                }
            }
        });

        TestPeer {
            address: address.to_string(),
            engine,
            events,
            root,
            _dir: dir,
        }
    }
}

pub struct TestPeer {
    pub address: String,
    pub engine: Arc<ClientEngine>,
    events: mpsc::UnboundedReceiver<Result<Dispatched, EngineError>>,
    pub root: PathBuf,
    _dir: TempDir,
}

impl TestPeer {
    /// Next dispatch result from this peer's inbound queue.
    pub async fn next_event(&mut self) -> Dispatched {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for inbound message")
            .expect("inbound task ended")
            .expect("dispatch failed")
    }

    /// Assert nothing arrives within a short window.
    pub async fn assert_quiet(&mut self) {
        let got = tokio::time::timeout(Duration::from_millis(200), self.events.recv()).await;
        assert!(got.is_err(), "unexpected inbound message: {got:?}");
    }

    pub fn write_file(&self, relative: &str, data: &[u8]) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        path
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
