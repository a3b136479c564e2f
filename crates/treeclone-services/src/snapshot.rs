//! Snapshot store: the latest listing each responder sent us.
//!
//! One file per responder: `{root}/{address}.json`. A newer Response from
//! the same peer overwrites the older one.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create snapshot dir: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Where the snapshot for `peer` lives.
    pub fn path_for(&self, peer: &str) -> PathBuf {
        let name: String = peer
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        self.root.join(format!("{name}.json"))
    }

    /// Replace the stored snapshot for `peer`.
    pub fn store(&self, peer: &str, snapshot: &str) -> Result<PathBuf> {
        let path = self.path_for(peer);
        fs::write(&path, snapshot)
            .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, peer: &str) -> Result<Option<String>> {
        let path = self.path_for(peer);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read snapshot: {}", path.display()))?;
        Ok(Some(text))
    }
}
