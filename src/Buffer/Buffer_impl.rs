use std::mem::size_of;
use std::ops::Range;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::intervals::IntervalSet;
use super::layout::{
    BoardControl, BufferLayout, RangeEntry, RegionHeader, LAYOUT_VERSION, MAGIC_NUMBER,
    STATE_INITIALISING, STATE_READY, STATE_RETIRED,
};
use super::Buffer::{BoardRing, BoardState, SampleBuffer, WriteOutcome};
use crate::error::{IngestError, Result};
use crate::Core::SharedMemory::{process_alive, PollBackoff};
use crate::Core::{MonotonicGate, OpenMode, SharedRegion};
use crate::Structs::BufferDescriptor;

impl SampleBuffer {
    /// Create the buffer for `descriptor` in a named region and become its owner.
    ///
    /// With [`OpenMode::Create`] an existing region at the key is reused,
    /// unless it holds a live buffer of a different shape. With
    /// [`OpenMode::CreateExclusive`] any existing region is an error.
    pub fn create(descriptor: BufferDescriptor, mode: OpenMode) -> Result<Self> {
        if !mode.creates() {
            return Err(IngestError::InvalidConfig(format!(
                "SampleBuffer::create() needs a create mode, got {mode:?}"
            )));
        }
        let layout = BufferLayout::new(&descriptor)?;
        let key = descriptor.region_key();

        if mode == OpenMode::Create {
            Self::check_existing(&descriptor)?;
        }

        let region = SharedRegion::open(key, layout.total_size(), mode, Duration::ZERO)?;
        Self::initialise(&region, &descriptor, &layout)?;
        info!(
            %key,
            station = descriptor.station_name(),
            boards = layout.nr_boards(),
            capacity = layout.capacity(),
            bytes = layout.total_size(),
            "sample buffer created"
        );
        Ok(Self::from_parts(region, descriptor, layout))
    }

    /// Create the buffer in an anonymous region, for use within one process.
    pub fn anonymous(descriptor: BufferDescriptor) -> Result<Self> {
        let layout = BufferLayout::new(&descriptor)?;
        let region = SharedRegion::anonymous(layout.total_size())?;
        Self::initialise(&region, &descriptor, &layout)?;
        Ok(Self::from_parts(region, descriptor, layout))
    }

    /// Attach to the buffer another process created for `descriptor`.
    ///
    /// Waits up to `timeout` for the region to exist and be initialised.
    /// A region of a different shape at the same key is a hard error.
    pub fn attach(descriptor: BufferDescriptor, mode: OpenMode, timeout: Duration) -> Result<Self> {
        if mode.creates() {
            return Err(IngestError::InvalidConfig(format!(
                "SampleBuffer::attach() needs Read or ReadWrite, got {mode:?}"
            )));
        }
        let layout = BufferLayout::new(&descriptor)?;
        let key = descriptor.region_key();
        let mut backoff = PollBackoff::new(timeout);

        loop {
            if let Some(region) = SharedRegion::try_attach(key, size_of::<RegionHeader>(), mode)? {
                let header = region
                    .get::<RegionHeader>(BufferLayout::header_offset())
                    .ok_or(IngestError::CorruptRegion(key))?;

                match header.state.load(Ordering::Acquire) {
                    STATE_READY => {
                        if header.magic != MAGIC_NUMBER || header.layout_version != LAYOUT_VERSION {
                            return Err(IngestError::CorruptRegion(key));
                        }
                        if !header.descriptor.is_compatible(&descriptor) {
                            return Err(IngestError::IncompatibleShape {
                                key,
                                expected: Box::new(descriptor),
                                found: Box::new(header.descriptor),
                            });
                        }
                        if region.size() >= layout.total_size() {
                            debug!(%key, ?mode, waited = ?backoff.elapsed(), "attached to sample buffer");
                            return Ok(Self::from_parts(region, descriptor, layout));
                        }
                        // Mapped while the creator was still resizing; map again.
                        if !backoff.snooze() {
                            return Err(IngestError::SizeMismatch {
                                key,
                                expected: layout.total_size(),
                                actual: region.size(),
                            });
                        }
                        continue;
                    }
                    // Not initialised yet, or left behind by a producer that
                    // shut down; a new producer may still take it over.
                    STATE_INITIALISING | STATE_RETIRED => {}
                    _ => return Err(IngestError::CorruptRegion(key)),
                }
            }

            if !backoff.snooze() {
                return Err(IngestError::RegionNotFound {
                    key,
                    waited: backoff.elapsed(),
                });
            }
        }
    }

    /// Refuse to reinitialise a live buffer of another shape, or one whose
    /// creator is still running. Two owners would both unlink the key.
    fn check_existing(descriptor: &BufferDescriptor) -> Result<()> {
        let key = descriptor.region_key();
        let region = match SharedRegion::try_attach(key, size_of::<RegionHeader>(), OpenMode::Read) {
            Ok(Some(region)) => region,
            Ok(None) | Err(IngestError::SizeMismatch { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        let Some(header) = region.get::<RegionHeader>(BufferLayout::header_offset()) else {
            return Ok(());
        };
        let live = header.magic == MAGIC_NUMBER
            && header.state.load(Ordering::Acquire) == STATE_READY;
        if live && !header.descriptor.is_compatible(descriptor) {
            return Err(IngestError::IncompatibleShape {
                key,
                expected: Box::new(*descriptor),
                found: Box::new(header.descriptor),
            });
        }
        if live && process_alive(header.creator_pid) {
            return Err(IngestError::RegionBusy {
                key,
                pid: header.creator_pid,
            });
        }
        if live {
            warn!(
                %key,
                creator_pid = header.creator_pid,
                "taking over a sample buffer left by an exited producer"
            );
        }
        Ok(())
    }

    fn initialise(region: &SharedRegion, descriptor: &BufferDescriptor, layout: &BufferLayout) -> Result<()> {
        region.init(
            BufferLayout::header_offset(),
            RegionHeader {
                magic: MAGIC_NUMBER,
                layout_version: LAYOUT_VERSION,
                state: AtomicU32::new(STATE_INITIALISING),
                creator_pid: std::process::id(),
                _reserved: 0,
                descriptor: *descriptor,
            },
        )?;
        for board in 0..layout.nr_boards() {
            region.init(layout.board_offset(board), BoardControl::new())?;
            for index in 0..layout.nr_ranges() {
                region.init(layout.range_offset(board, index), RangeEntry::empty())?;
            }
        }

        let header = region
            .get::<RegionHeader>(BufferLayout::header_offset())
            .ok_or(IngestError::CorruptRegion(region.key()))?;
        header.state.store(STATE_READY, Ordering::Release);
        Ok(())
    }

    fn from_parts(region: SharedRegion, descriptor: BufferDescriptor, layout: BufferLayout) -> Self {
        let mut buffer = Self {
            region,
            descriptor,
            layout,
            boards: Vec::with_capacity(layout.nr_boards()),
        };
        for board in 0..layout.nr_boards() {
            // A ReadWrite attach continues from what is already published.
            let published = buffer.published_ranges(board).unwrap_or_default();
            let progress = buffer
                .control(board)
                .map(|c| c.progress.load(Ordering::Acquire))
                .unwrap_or(0);
            buffer.boards.push(BoardState {
                ring: BoardRing::new(&layout, board),
                gate: MonotonicGate::new(progress),
                available: Mutex::new(IntervalSet::from_ranges(published, layout.nr_ranges())),
            });
        }
        buffer
    }

    pub(crate) fn header(&self) -> Result<&RegionHeader> {
        self.region
            .get::<RegionHeader>(BufferLayout::header_offset())
            .ok_or(IngestError::CorruptRegion(self.region.key()))
    }

    pub(crate) fn control(&self, board: usize) -> Result<&BoardControl> {
        self.check_board(board)?;
        self.region
            .get::<BoardControl>(self.layout.board_offset(board))
            .ok_or(IngestError::CorruptRegion(self.region.key()))
    }

    pub(crate) fn check_board(&self, board: usize) -> Result<()> {
        if board < self.layout.nr_boards() {
            Ok(())
        } else {
            Err(IngestError::UnknownBoard {
                board,
                nr_boards: self.layout.nr_boards(),
            })
        }
    }

    fn state(&self, board: usize) -> Result<&BoardState> {
        self.boards.get(board).ok_or(IngestError::UnknownBoard {
            board,
            nr_boards: self.layout.nr_boards(),
        })
    }

    /// Rewrite the board's published range table from `set` (seqlock writer side).
    fn publish(&self, board: usize, set: &IntervalSet) -> Result<()> {
        let control = self.control(board)?;
        let seq = control.sequence.load(Ordering::Relaxed);
        control.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        for (index, range) in set.iter().enumerate().take(self.layout.nr_ranges()) {
            let entry = self
                .region
                .get::<RangeEntry>(self.layout.range_offset(board, index))
                .ok_or(IngestError::CorruptRegion(self.region.key()))?;
            entry.start.store(range.start, Ordering::Relaxed);
            entry.end.store(range.end, Ordering::Relaxed);
        }
        control
            .range_count
            .store(set.len().min(self.layout.nr_ranges()) as u64, Ordering::Relaxed);

        control.sequence.store(seq.wrapping_add(2), Ordering::Release);
        Ok(())
    }

    /// Store `payload` at `time_index` on `board` and mark it available.
    ///
    /// The payload must hold a whole number of slots (time indices) and at
    /// most one capacity worth. Validation failures leave the buffer untouched.
    pub fn write(&self, board: usize, time_index: u64, payload: &[u8]) -> Result<WriteOutcome> {
        if !self.region.is_writable() {
            return Err(IngestError::ReadOnly(self.region.key()));
        }
        let state = self.state(board)?;
        let control = self.control(board)?;

        let slot_bytes = self.layout.slot_bytes();
        let capacity = self.layout.capacity();
        if payload.is_empty() || payload.len() % slot_bytes != 0 {
            return Err(IngestError::InvalidPayload(format!(
                "{} bytes is not a whole number of {slot_bytes}-byte slots",
                payload.len()
            )));
        }
        let samples = (payload.len() / slot_bytes) as u64;
        if samples > capacity {
            return Err(IngestError::InvalidPayload(format!(
                "{samples} samples exceed the ring capacity of {capacity}"
            )));
        }
        let end = time_index.checked_add(samples).ok_or_else(|| {
            IngestError::InvalidPayload(format!("time index {time_index} overflows"))
        })?;

        let mut available = state.available.lock();
        let head = control.head.load(Ordering::Relaxed);
        if time_index < head.saturating_sub(capacity) {
            return Ok(WriteOutcome::Stale);
        }
        let duplicate = available.contains(time_index..end);
        if !duplicate && available.evicts(time_index..end) {
            return Ok(WriteOutcome::TableFull);
        }

        if end > head {
            // Slots about to be reused stop being available before they are overwritten.
            if available.exclude_before(end.saturating_sub(capacity)) {
                self.publish(board, &available)?;
            }
            control.head.store(end, Ordering::Release);
            fence(Ordering::Release);
        }

        let (first, second) = state.ring.spans(time_index, samples);
        self.region.write_bytes(first.offset(), &payload[..first.len()])?;
        if let Some(second) = second {
            self.region.write_bytes(second.offset(), &payload[first.len()..])?;
        }

        if available.insert(time_index..end) {
            self.publish(board, &available)?;
        }

        Ok(if duplicate {
            WriteOutcome::Duplicate
        } else {
            WriteOutcome::Written
        })
    }

    /// Where contiguous data starting at `from` ends on `board`.
    ///
    /// `from` is returned unchanged when it sits in a hole. When `from` has
    /// already dropped out of the ring window it is moved forward to the
    /// window start, since nothing older can be written any more. It is not
    /// moved further: a hole inside the window may still be filled.
    pub fn contiguous_end(&self, board: usize, from: u64) -> Result<u64> {
        let ranges = self.published_ranges(board)?;
        let head = self.control(board)?.head.load(Ordering::Acquire);
        let from = from.max(head.saturating_sub(self.layout.capacity()));
        Ok(ranges
            .iter()
            .find(|r| r.start <= from && from <= r.end)
            .map_or(from, |r| r.end))
    }

    /// Advance the board's gate to `value` and publish it to consumers.
    /// Returns false when the gate was already at or past `value`.
    pub fn advance_gate(&self, board: usize, value: u64) -> Result<bool> {
        let state = self.state(board)?;
        if self.region.is_writable() {
            self.control(board)?
                .progress
                .fetch_max(value, Ordering::AcqRel);
        }
        Ok(state.gate.advance_to(value))
    }

    /// The board's in-process gate, for threads living next to the producer.
    pub fn gate(&self, board: usize) -> Result<&MonotonicGate<u64>> {
        Ok(&self.state(board)?.gate)
    }

    pub(crate) fn published_ranges(&self, board: usize) -> Result<Vec<Range<u64>>> {
        let control = self.control(board)?;
        let mut ranges = Vec::with_capacity(self.layout.nr_ranges());
        let mut spins = 0u32;
        loop {
            let before = control.sequence.load(Ordering::Acquire);
            if before % 2 == 0 {
                ranges.clear();
                let count = (control.range_count.load(Ordering::Relaxed) as usize)
                    .min(self.layout.nr_ranges());
                for index in 0..count {
                    let entry = self
                        .region
                        .get::<RangeEntry>(self.layout.range_offset(board, index))
                        .ok_or(IngestError::CorruptRegion(self.region.key()))?;
                    let start = entry.start.load(Ordering::Relaxed);
                    let end = entry.end.load(Ordering::Relaxed);
                    ranges.push(start..end);
                }
                fence(Ordering::Acquire);
                if control.sequence.load(Ordering::Relaxed) == before {
                    return Ok(ranges);
                }
            }
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    pub fn nr_boards(&self) -> usize {
        self.layout.nr_boards()
    }

    pub fn capacity(&self) -> u64 {
        self.layout.capacity()
    }

    /// Board carrying logical `channel`.
    pub fn board_index(&self, channel: usize) -> Result<usize> {
        self.descriptor.board_index(channel)
    }

    /// One past the highest time index written on `board`.
    pub fn head(&self, board: usize) -> Result<u64> {
        Ok(self.control(board)?.head.load(Ordering::Acquire))
    }

    /// Give up ownership: the region is neither retired nor unlinked on drop.
    pub fn disown(&mut self) {
        self.region.disown();
    }
}

impl Drop for SampleBuffer {
    fn drop(&mut self) {
        if self.region.is_owner() {
            if let Ok(header) = self.header() {
                header.state.store(STATE_RETIRED, Ordering::Release);
            }
            info!(key = %self.region.key(), "sample buffer retired");
        }
    }
}
