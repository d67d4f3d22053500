//! Error types for the ingestion layer.
//!
//! Outcomes that are part of normal operation (a stale write, a duplicate
//! packet, a claim that ended because its job was cancelled) are returned as
//! values, not errors. The variants below are the cases a caller has to act
//! on. [`IngestError::is_transient`] separates the ones worth retrying from
//! the ones that point at a configuration or system problem.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::Admission::JobId;
use crate::Core::RegionKey;
use crate::Structs::BufferDescriptor;

/// Convenience alias for results using the ingestion error type.
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(
        "shared region {key} not found within {waited:?}: the producer has not started yet \
         or has already exited (the two cannot be told apart from here)"
    )]
    RegionNotFound { key: RegionKey, waited: Duration },

    #[error("shared region {0} already exists")]
    RegionExists(RegionKey),

    #[error("shared region {key} is still owned by live process {pid}")]
    RegionBusy { key: RegionKey, pid: u32 },

    #[error("key {key} already bound to an incompatible shape: expected {expected:?}, found {found:?}")]
    IncompatibleShape {
        key: RegionKey,
        expected: Box<BufferDescriptor>,
        found: Box<BufferDescriptor>,
    },

    #[error("shared region {key} holds {actual} bytes, expected at least {expected}")]
    SizeMismatch {
        key: RegionKey,
        expected: usize,
        actual: usize,
    },

    #[error("shared region {0} does not hold a sample buffer (bad magic or layout version)")]
    CorruptRegion(RegionKey),

    #[error("{context}: {source}")]
    Os {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("shared region {0} is attached read-only")]
    ReadOnly(RegionKey),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("malformed packet stream: {0}")]
    Format(String),

    #[error("producer of shared region {0} has shut down")]
    ProducerGone(RegionKey),

    #[error("board {board} out of range (buffer has {nr_boards} boards)")]
    UnknownBoard { board: usize, nr_boards: usize },

    #[error("channel {channel} out of range (buffer has {nr_channels} channels)")]
    UnknownChannel { channel: usize, nr_channels: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl IngestError {
    pub(crate) fn os(context: impl Into<String>, source: io::Error) -> Self {
        IngestError::Os {
            context: context.into(),
            source,
        }
    }

    /// True for outcomes that are expected while the system runs and are
    /// handled locally (retry the attach, drop the packet). Everything else
    /// is a configuration or system fault that retrying cannot fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::RegionNotFound { .. }
                | IngestError::InvalidPacket(_)
                | IngestError::Format(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("job {0} is not registered (it may already have finished)")]
    UnknownJob(JobId),

    #[error("job {0} was cancelled before it could claim its resources")]
    Cancelled(JobId),
}
