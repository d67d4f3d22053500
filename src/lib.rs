// Module naming follows project convention (Core = shared memory primitives,
// Buffer = the sample ring living inside a region).
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Structs;
#[allow(non_snake_case)]
pub mod Buffer;
#[allow(non_snake_case)]
pub mod Ingest;
#[allow(non_snake_case)]
pub mod Admission;
#[allow(non_snake_case)]
mod Debug;

pub mod error;
pub mod logging;

pub use logging::init_logging;

pub use error::{AdmissionError, IngestError, Result};

pub use Core::{MonotonicGate, OpenMode, RegionKey, SharedRegion};
pub use Structs::{BitMode, BufferDescriptor, Packet, PacketHeader, SampleClock, StationConfig};
pub use Buffer::{BufferBuilder, SampleBuffer, WriteOutcome};
pub use Ingest::{
    IngestCounters, IngestStats, IterSource, PacketIngester, PacketOutcome, PacketSource,
    SourceEvent, StopHandle, StreamSource,
};
pub use Admission::{
    AdmissionController, ClaimOutcome, Footprint, JobGuard, JobId, JobSnapshot, JobState,
    StationFootprint,
};
