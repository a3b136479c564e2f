//! File-scan collaborator: turns a directory tree into the listing
//! snapshot carried in a Response body.
//!
//! Snapshot shape, recursively:
//!
//! ```text
//! { "<name>": { "FULL_PATH", "RELATIVE_PATH", "SIZE" (files),
//!               "ADDRESS", "COLOR", "CHILDREN" (directories) } }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

/// Produces the local listing snapshot on demand.
pub trait FileScanner: Send + Sync {
    fn snapshot(&self) -> Result<String>;
}

impl<F> FileScanner for F
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn snapshot(&self) -> Result<String> {
        self()
    }
}

/// Colour tag for entries in a fresh local scan.
const DEFAULT_COLOR: &str = "WHITE";

/// Walks `root` on every call.
pub struct DirectoryScanner {
    root: PathBuf,
    address: String,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>, address: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            address: address.into(),
        }
    }

    fn directory_entry(&self, dir: &Path) -> Result<Value> {
        let mut children = Map::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read directory: {}", dir.display()))?;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping entry");
                    continue;
                }
            };

            let value = if file_type.is_dir() {
                match self.directory_entry(&path) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping directory");
                        continue;
                    }
                }
            } else if file_type.is_file() {
                let size = match entry.metadata() {
                    Ok(m) => m.len(),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping file");
                        continue;
                    }
                };
                self.file_entry(&path, size)
            } else {
                continue;
            };
            children.insert(name, value);
        }

        let mut node = self.common_fields(dir);
        node.insert("CHILDREN".into(), Value::Object(children));
        Ok(Value::Object(node))
    }

    fn file_entry(&self, path: &Path, size: u64) -> Value {
        let mut node = self.common_fields(path);
        node.insert("SIZE".into(), json!(size));
        Value::Object(node)
    }

    fn common_fields(&self, path: &Path) -> Map<String, Value> {
        let relative = path
            .strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut node = Map::new();
        node.insert("FULL_PATH".into(), json!(path.to_string_lossy()));
        node.insert("RELATIVE_PATH".into(), json!(relative));
        node.insert("ADDRESS".into(), json!(self.address));
        node.insert("COLOR".into(), json!(DEFAULT_COLOR));
        node
    }
}

impl FileScanner for DirectoryScanner {
    fn snapshot(&self) -> Result<String> {
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.to_string_lossy().into_owned());
        let mut top = Map::new();
        top.insert(name, self.directory_entry(&self.root)?);
        Ok(serde_json::to_string(&Value::Object(top))?)
    }
}
