// The station sample ring, one per board, laid out inside a SharedRegion.

use parking_lot::Mutex;

use super::intervals::IntervalSet;
use super::layout::BufferLayout;
use crate::Core::{MonotonicGate, SharedRegion};
use crate::Structs::BufferDescriptor;

/// Result of a write that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New samples were stored and marked available.
    Written,
    /// Every time index was already available; the bytes were rewritten
    /// (newest wins) and availability is unchanged.
    Duplicate,
    /// The time index lies more than one capacity behind the board's head.
    /// Nothing was touched; the producer has fallen behind and must skip ahead.
    Stale,
    /// The board's range table is full and every range it holds is newer.
    /// Nothing was touched, since the samples could not be marked available.
    TableFull,
}

/// A byte span of one board's sample area.
///
/// Only [`BoardRing::spans`] creates these, and it never produces a span
/// outside the board's area, so region accesses through a span stay in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpan {
    offset: usize,
    len: usize,
}

impl SlotSpan {
    /// Byte offset from the start of the region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Maps absolute time indices of one board onto its sample area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardRing {
    data_offset: usize,
    capacity: u64,
    slot_bytes: usize,
}

impl BoardRing {
    pub(crate) fn new(layout: &BufferLayout, board: usize) -> Self {
        Self {
            data_offset: layout.board_data_offset(board),
            capacity: layout.capacity(),
            slot_bytes: layout.slot_bytes(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Physical slot of `time_index`.
    pub fn slot(&self, time_index: u64) -> u64 {
        time_index % self.capacity
    }

    /// Byte spans holding `samples` time indices starting at `time_index`.
    /// The second span is present when the run wraps past the end of the ring.
    /// At most one capacity worth of samples is mapped.
    pub fn spans(&self, time_index: u64, samples: u64) -> (SlotSpan, Option<SlotSpan>) {
        let samples = samples.min(self.capacity);
        let slot = self.slot(time_index);
        let first = samples.min(self.capacity - slot);

        let head = SlotSpan {
            offset: self.data_offset + slot as usize * self.slot_bytes,
            len: first as usize * self.slot_bytes,
        };
        let tail = (first < samples).then(|| SlotSpan {
            offset: self.data_offset,
            len: (samples - first) as usize * self.slot_bytes,
        });
        (head, tail)
    }
}

/// Per-board state kept by the process that has the buffer mapped.
pub(crate) struct BoardState {
    pub(crate) ring: BoardRing,
    /// Local progress marker. Threads of the producer process wait on it.
    pub(crate) gate: MonotonicGate<u64>,
    /// Writer-side copy of the published range table. Holding this lock is
    /// what makes a process the board's writer for the duration of a write.
    pub(crate) available: Mutex<IntervalSet>,
}

/// Fixed-capacity circular buffer of station samples inside a shared region.
///
/// Addressed by absolute time index; the physical slot is the time index
/// modulo the capacity. Each board has its own ring, published availability
/// table and progress gate. The availability table is the only record of
/// which time indices hold valid data; the gate is a lower bound on
/// contiguous progress, useful for waiting but never for validity.
///
/// The creating process owns the region; other processes attach with
/// [`SampleBuffer::attach`] and read availability and progress from shared memory.
pub struct SampleBuffer {
    pub(crate) region: SharedRegion,
    pub(crate) descriptor: BufferDescriptor,
    pub(crate) layout: BufferLayout,
    pub(crate) boards: Vec<BoardState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Structs::StationConfig;

    fn ring(capacity: u64) -> BoardRing {
        let station = StationConfig::new("CS001", 1).with_boards(2, 4);
        let desc = BufferDescriptor::new(&station, capacity, 4).unwrap();
        let layout = BufferLayout::new(&desc).unwrap();
        BoardRing::new(&layout, 1)
    }

    #[test]
    fn spans_stay_inside_the_board() {
        let ring = ring(10);
        let slot_bytes = 16; // 4 channels x 4 bytes
        let (head, tail) = ring.spans(3, 4);
        assert_eq!(head.len(), 4 * slot_bytes);
        assert!(tail.is_none());

        let (head, tail) = ring.spans(27, 6);
        assert_eq!(head.offset(), ring.data_offset + 7 * slot_bytes);
        assert_eq!(head.len(), 3 * slot_bytes);
        let tail = tail.unwrap();
        assert_eq!(tail.offset(), ring.data_offset);
        assert_eq!(tail.len(), 3 * slot_bytes);
    }

    #[test]
    fn spans_never_exceed_capacity() {
        let ring = ring(10);
        let (head, tail) = ring.spans(5, 1000);
        assert_eq!(head.len() + tail.map_or(0, |t| t.len()), 10 * 16);
    }
}
