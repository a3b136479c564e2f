//! treeclone-core: message model, chunk codec, summary format and config.
//! All other treeclone crates depend on this one.

pub mod chunk;
pub mod config;
pub mod message;
pub mod summary;

pub use chunk::{ChunkBody, ChunkError, DEFAULT_CHUNK_SIZE};
pub use message::{Message, MessageError, Recipient, Subject, BROADCAST_MARKER};
pub use summary::{Selection, SummaryError};
