// Station configuration and the buffer descriptor derived from it.
//
// The descriptor is stored verbatim in the region header, so every field is
// a fixed-width integer and the struct is #[repr(C)] with explicit padding.

use sha2::{Digest, Sha256};

use crate::error::{IngestError, Result};
use crate::Core::RegionKey;

/// Structural version of [`BufferDescriptor`]. Bump on any field change.
pub const DESCRIPTOR_VERSION: u32 = 1;

/// Bytes reserved for the station name inside the descriptor.
pub const STATION_NAME_LEN: usize = 16;

/// Sample bit depth delivered by the station boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitMode {
    Four = 4,
    Eight = 8,
    Sixteen = 16,
}

impl BitMode {
    pub fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            4 => Ok(BitMode::Four),
            8 => Ok(BitMode::Eight),
            16 => Ok(BitMode::Sixteen),
            other => Err(IngestError::InvalidConfig(format!(
                "unsupported bit mode {other} (expected 4, 8 or 16)"
            ))),
        }
    }

    /// Bytes per sample per channel: complex values for two polarisations.
    pub fn sample_bytes(self) -> usize {
        self.bits() as usize / 2
    }
}

/// Station settings handed over by the configuration loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    pub name: String,
    pub station_id: u16,
    pub antenna_set: String,
    pub bit_mode: BitMode,
    pub nr_boards: u32,
    pub channels_per_board: u32,
}

impl StationConfig {
    pub fn new(name: impl Into<String>, station_id: u16) -> Self {
        Self {
            name: name.into(),
            station_id,
            antenna_set: "HBA_DUAL".to_owned(),
            bit_mode: BitMode::Eight,
            nr_boards: 4,
            channels_per_board: 61,
        }
    }

    pub fn with_antenna_set(mut self, antenna_set: impl Into<String>) -> Self {
        self.antenna_set = antenna_set.into();
        self
    }

    pub fn with_bit_mode(mut self, bit_mode: BitMode) -> Self {
        self.bit_mode = bit_mode;
        self
    }

    pub fn with_boards(mut self, nr_boards: u32, channels_per_board: u32) -> Self {
        self.nr_boards = nr_boards;
        self.channels_per_board = channels_per_board;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > STATION_NAME_LEN {
            return Err(IngestError::InvalidConfig(format!(
                "station name {:?} must be 1..={STATION_NAME_LEN} bytes",
                self.name
            )));
        }
        if !(1..=255).contains(&self.nr_boards) {
            return Err(IngestError::InvalidConfig(format!(
                "station {} has {} boards (expected 1..=255)",
                self.name, self.nr_boards
            )));
        }
        if !(1..=255).contains(&self.channels_per_board) {
            return Err(IngestError::InvalidConfig(format!(
                "station {} has {} channels per board (expected 1..=255)",
                self.name, self.channels_per_board
            )));
        }
        Ok(())
    }

    /// Key naming this station's shared region. Pure: every process computes
    /// the same key from the same station identity.
    pub fn region_key(&self) -> RegionKey {
        derive_key(&self.name, &self.antenna_set, self.bit_mode)
    }
}

/// Hash the station identity into a region key (first four bytes of SHA-256).
pub fn derive_key(station: &str, antenna_set: &str, bit_mode: BitMode) -> RegionKey {
    let mut hasher = Sha256::new();
    hasher.update(station.as_bytes());
    hasher.update(b"|");
    hasher.update(antenna_set.as_bytes());
    hasher.update(b"|");
    hasher.update(bit_mode.bits().to_string().as_bytes());
    let digest = hasher.finalize();

    let key = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    // 0 is reserved for anonymous regions
    RegionKey(if key == 0 { 1 } else { key })
}

/// Shape of a sample buffer. Immutable once built, compared on every attach.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub version: u32,
    pub key: u32,
    pub station: [u8; STATION_NAME_LEN],
    pub station_id: u32,
    pub bit_mode: u32,
    pub channels_per_board: u32,
    pub nr_boards: u32,
    /// Number of availability ranges tracked per board.
    pub nr_ranges: u32,
    pub _reserved: u32,
    /// Ring capacity in samples (time indices) per board.
    pub capacity: u64,
}

impl BufferDescriptor {
    pub fn new(station: &StationConfig, capacity: u64, nr_ranges: u32) -> Result<Self> {
        station.validate()?;
        if capacity == 0 {
            return Err(IngestError::InvalidConfig(
                "buffer capacity must be at least one sample".into(),
            ));
        }
        if nr_ranges == 0 {
            return Err(IngestError::InvalidConfig(
                "at least one availability range must be tracked".into(),
            ));
        }

        let mut name = [0u8; STATION_NAME_LEN];
        name[..station.name.len()].copy_from_slice(station.name.as_bytes());

        Ok(Self {
            version: DESCRIPTOR_VERSION,
            key: station.region_key().0,
            station: name,
            station_id: station.station_id as u32,
            bit_mode: station.bit_mode.bits(),
            channels_per_board: station.channels_per_board,
            nr_boards: station.nr_boards,
            nr_ranges,
            _reserved: 0,
            capacity,
        })
    }

    pub fn station_name(&self) -> &str {
        let end = self
            .station
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(STATION_NAME_LEN);
        std::str::from_utf8(&self.station[..end]).unwrap_or("<invalid>")
    }

    pub fn region_key(&self) -> RegionKey {
        RegionKey(self.key)
    }

    pub fn bit_mode(&self) -> Result<BitMode> {
        BitMode::from_bits(self.bit_mode)
    }

    pub fn sample_bytes(&self) -> usize {
        self.bit_mode as usize / 2
    }

    /// Bytes one time index occupies on one board.
    pub fn slot_bytes(&self) -> usize {
        self.channels_per_board as usize * self.sample_bytes()
    }

    pub fn nr_boards(&self) -> usize {
        self.nr_boards as usize
    }

    pub fn total_channels(&self) -> usize {
        self.nr_boards as usize * self.channels_per_board as usize
    }

    /// Board that carries logical `channel`.
    pub fn board_index(&self, channel: usize) -> Result<usize> {
        if channel >= self.total_channels() {
            return Err(IngestError::UnknownChannel {
                channel,
                nr_channels: self.total_channels(),
            });
        }
        Ok(channel / self.channels_per_board as usize)
    }

    /// Same shape: every field except the key matches, and both carry the
    /// current structural version.
    pub fn is_compatible(&self, other: &BufferDescriptor) -> bool {
        self.version == DESCRIPTOR_VERSION
            && other.version == DESCRIPTOR_VERSION
            && self.station == other.station
            && self.station_id == other.station_id
            && self.bit_mode == other.bit_mode
            && self.channels_per_board == other.channels_per_board
            && self.nr_boards == other.nr_boards
            && self.nr_ranges == other.nr_ranges
            && self.capacity == other.capacity
    }
}
