use crossbeam_utils::CachePadded;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::error::{IngestError, Result};
use crate::Core::RegionSafe;
use crate::Structs::BufferDescriptor;

/// Identifies a region as a station sample buffer ("STNBUF01").
pub const MAGIC_NUMBER: u64 = 0x5354_4E42_5546_3031;

/// Version of the byte layout below. Bump on any change to the blocks.
pub const LAYOUT_VERSION: u32 = 1;

/// Every block starts on a 128-byte boundary (two cache lines).
pub const BLOCK_ALIGN: usize = 128;

/// Header written, not yet usable.
pub const STATE_INITIALISING: u32 = 0;
/// Header and control blocks valid; consumers may attach.
pub const STATE_READY: u32 = 1;
/// The owning producer has shut down.
pub const STATE_RETIRED: u32 = 2;

#[inline]
pub(crate) const fn align_up(x: usize) -> usize {
    (x + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1)
}

/// The header located at the very beginning of the region.
///
/// Any process attaching reads this first: magic and layout version tell it
/// the bytes are a sample buffer, the descriptor tells it the shape.
#[repr(C, align(128))]
pub struct RegionHeader {
    pub magic: u64,
    pub layout_version: u32,
    /// One of the `STATE_*` constants. Stored last (release) on creation.
    pub state: AtomicU32,
    pub creator_pid: u32,
    pub _reserved: u32,
    pub descriptor: BufferDescriptor,
}

unsafe impl RegionSafe for RegionHeader {}

/// Per-board control block.
///
/// `sequence` and `range_count` guard the board's range table (a seqlock:
/// odd while the writer rewrites it). `head` and `progress` are written on
/// every packet, so each gets its own cache line.
#[repr(C, align(128))]
pub struct BoardControl {
    pub sequence: AtomicU64,
    pub range_count: AtomicU64,
    /// One past the highest time index ever written on this board.
    pub head: CachePadded<AtomicU64>,
    /// Gate value published for consumers in other processes.
    pub progress: CachePadded<AtomicU64>,
}

unsafe impl RegionSafe for BoardControl {}

impl BoardControl {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            range_count: AtomicU64::new(0),
            head: CachePadded::new(AtomicU64::new(0)),
            progress: CachePadded::new(AtomicU64::new(0)),
        }
    }
}

impl Default for BoardControl {
    fn default() -> Self {
        Self::new()
    }
}

/// One `[start, end)` entry of a board's published range table.
#[repr(C)]
pub struct RangeEntry {
    pub start: AtomicU64,
    pub end: AtomicU64,
}

unsafe impl RegionSafe for RangeEntry {}

impl RangeEntry {
    pub fn empty() -> Self {
        Self {
            start: AtomicU64::new(0),
            end: AtomicU64::new(0),
        }
    }
}

/// Byte offsets of every block for one descriptor.
///
/// ```text
/// [RegionHeader][BoardControl x boards][RangeEntry x boards x ranges][samples x boards]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    nr_boards: usize,
    nr_ranges: usize,
    capacity: u64,
    slot_bytes: usize,
    boards_offset: usize,
    ranges_offset: usize,
    data_offset: usize,
    board_data_bytes: usize,
    total_size: usize,
}

impl BufferLayout {
    pub fn new(descriptor: &BufferDescriptor) -> Result<Self> {
        let too_large = || {
            IngestError::InvalidConfig(format!(
                "buffer for station {} does not fit in the address space",
                descriptor.station_name()
            ))
        };

        let nr_boards = descriptor.nr_boards();
        let nr_ranges = descriptor.nr_ranges as usize;
        let slot_bytes = descriptor.slot_bytes();
        if nr_boards == 0 || nr_ranges == 0 || slot_bytes == 0 || descriptor.capacity == 0 {
            return Err(IngestError::InvalidConfig(format!(
                "degenerate buffer shape {descriptor:?}"
            )));
        }

        let boards_offset = align_up(size_of::<RegionHeader>());
        let ranges_offset = align_up(
            nr_boards
                .checked_mul(size_of::<BoardControl>())
                .and_then(|b| b.checked_add(boards_offset))
                .ok_or_else(too_large)?,
        );
        let data_offset = align_up(
            nr_boards
                .checked_mul(nr_ranges)
                .and_then(|n| n.checked_mul(size_of::<RangeEntry>()))
                .and_then(|b| b.checked_add(ranges_offset))
                .ok_or_else(too_large)?,
        );
        let board_data_bytes = usize::try_from(descriptor.capacity)
            .ok()
            .and_then(|c| c.checked_mul(slot_bytes))
            .map(align_up)
            .ok_or_else(too_large)?;
        let total_size = board_data_bytes
            .checked_mul(nr_boards)
            .and_then(|b| b.checked_add(data_offset))
            .ok_or_else(too_large)?;

        Ok(Self {
            nr_boards,
            nr_ranges,
            capacity: descriptor.capacity,
            slot_bytes,
            boards_offset,
            ranges_offset,
            data_offset,
            board_data_bytes,
            total_size,
        })
    }

    pub const fn header_offset() -> usize {
        0
    }

    pub fn board_offset(&self, board: usize) -> usize {
        self.boards_offset + board * size_of::<BoardControl>()
    }

    pub fn range_offset(&self, board: usize, index: usize) -> usize {
        self.ranges_offset + (board * self.nr_ranges + index) * size_of::<RangeEntry>()
    }

    pub fn board_data_offset(&self, board: usize) -> usize {
        self.data_offset + board * self.board_data_bytes
    }

    pub fn nr_boards(&self) -> usize {
        self.nr_boards
    }

    pub fn nr_ranges(&self) -> usize {
        self.nr_ranges
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    /// Bytes the region must hold.
    pub fn total_size(&self) -> usize {
        self.total_size
    }
}
