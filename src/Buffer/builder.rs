use std::time::Duration;

use tracing::warn;

use super::Buffer::SampleBuffer;
use crate::error::Result;
use crate::Core::{OpenMode, SharedRegion};
use crate::Structs::{BufferDescriptor, StationConfig};

/// Ring capacity per board in samples (time indices).
pub const DEFAULT_CAPACITY: u64 = 1 << 16;
/// Availability ranges tracked per board.
pub const DEFAULT_AVAILABILITY_RANGES: u32 = 64;
/// How long consumers wait for the producer's region to show up.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BufferBuilder {
    station: StationConfig,
    capacity: u64,
    nr_ranges: u32,
    attach_timeout: Duration,
}

impl BufferBuilder {
    pub fn new(station: StationConfig) -> Self {
        Self {
            station,
            capacity: DEFAULT_CAPACITY,
            nr_ranges: DEFAULT_AVAILABILITY_RANGES,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
        }
    }

    pub fn with_capacity(mut self, samples: u64) -> Self {
        self.capacity = samples;
        self
    }

    pub fn with_availability_ranges(mut self, ranges: u32) -> Self {
        self.nr_ranges = ranges;
        self
    }

    pub fn with_attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    /// The descriptor every process derives from the same configuration.
    pub fn descriptor(&self) -> Result<BufferDescriptor> {
        BufferDescriptor::new(&self.station, self.capacity, self.nr_ranges)
    }

    /// Create the station's buffer, taking over a compatible leftover region.
    pub fn create(self) -> Result<SampleBuffer> {
        self.create_with(OpenMode::Create)
    }

    /// Create the station's buffer; fails if the region already exists.
    pub fn create_exclusive(self) -> Result<SampleBuffer> {
        self.create_with(OpenMode::CreateExclusive)
    }

    pub fn attach_read(self) -> Result<SampleBuffer> {
        SampleBuffer::attach(self.descriptor()?, OpenMode::Read, self.attach_timeout)
    }

    pub fn attach_read_write(self) -> Result<SampleBuffer> {
        SampleBuffer::attach(self.descriptor()?, OpenMode::ReadWrite, self.attach_timeout)
    }

    /// Same buffer in process-private memory.
    pub fn anonymous(self) -> Result<SampleBuffer> {
        SampleBuffer::anonymous(self.descriptor()?)
    }

    fn create_with(self, mode: OpenMode) -> Result<SampleBuffer> {
        let descriptor = self.descriptor()?;
        let size = super::layout::BufferLayout::new(&descriptor)?.total_size();
        let limit = SharedRegion::max_size();
        if limit != 0 && size > limit {
            warn!(
                station = %self.station.name,
                size,
                limit,
                "sample buffer is larger than the space left on /dev/shm"
            );
        }
        SampleBuffer::create(descriptor, mode)
    }
}
