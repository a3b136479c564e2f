//! Selection summary format.
//!
//! One `"<source on responder>, <destination on requester>"` pair per line.
//! The same format is used for the Summary body and for manifest files
//! kept on the requester's disk.

use std::fmt;
use std::path::Path;

const SEPARATOR: &str = ", ";

/// One requested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Path of the file on the responder.
    pub source: String,
    /// Where the requester wants it written.
    pub destination: String,
}

impl Selection {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Parse a single line. Exactly two non-empty fields are required.
    pub fn parse_line(line: &str) -> Result<Self, SummaryError> {
        let fields: Vec<&str> = line
            .split(SEPARATOR)
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        match fields.as_slice() {
            [source, destination] => Ok(Self::new(*source, *destination)),
            _ => Err(SummaryError::MalformedLine(line.to_string())),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.source, SEPARATOR, self.destination)
    }
}

/// Parse every non-blank line of a summary body.
///
/// Each line is returned independently so one bad line never hides the rest.
pub fn parse_lines(body: &str) -> impl Iterator<Item = Result<Selection, SummaryError>> + '_ {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(Selection::parse_line)
}

/// Serialize a selection list into the summary body.
pub fn to_body(selections: &[Selection]) -> String {
    selections
        .iter()
        .map(Selection::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Load a manifest file. Fails on the first malformed line.
pub fn read_manifest(path: &Path) -> Result<Vec<Selection>, SummaryError> {
    let text = std::fs::read_to_string(path)?;
    parse_lines(&text).collect()
}

/// Write a manifest file, one selection per line.
pub fn write_manifest(path: &Path, selections: &[Selection]) -> Result<(), SummaryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = to_body(selections);
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("malformed summary line: {0:?}")]
    MalformedLine(String),
    #[error("manifest I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
