mod ingester;
mod source;

pub use ingester::{IngestCounters, IngestStats, PacketIngester, PacketOutcome, StopHandle};
pub use source::{IterSource, PacketSource, SourceEvent, StreamSource, MAX_PAYLOAD};
