//! treeclone-services: relay routing, frame I/O and the client protocol
//! engine. Both binaries are thin shells over this crate.

pub mod engine;
pub mod file_transfer;
pub mod frame;
pub mod registry;
pub mod router;
pub mod scanner;
pub mod snapshot;
pub mod transport;

pub use engine::{ClientEngine, Dispatched, EngineError, Phase, SummaryReport};
pub use file_transfer::{
    stream_file, ChunkOutcome, FileReassembler, FileSend, ReassemblyError, TransferError,
    TransferReport,
};
pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_LEN};
pub use registry::{PeerRegistry, RegistryError};
pub use router::{Delivery, RouteError, Router};
pub use scanner::{DirectoryScanner, FileScanner};
pub use snapshot::SnapshotStore;
pub use transport::{ConnectionHandle, Transport, TransportError};
