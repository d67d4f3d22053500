// Consumer-side access to a SampleBuffer. Everything here works the same
// from the producer process and from a process that attached read-only.

use std::ops::Range;
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use super::intervals::{clip, intersect};
use super::layout::{STATE_READY, STATE_RETIRED};
use super::Buffer::SampleBuffer;
use crate::error::{IngestError, Result};
use crate::Core::SharedMemory::PollBackoff;

impl SampleBuffer {
    /// Consistent copy of the board's published availability table.
    pub fn snapshot(&self, board: usize) -> Result<Vec<Range<u64>>> {
        self.published_ranges(board)
    }

    /// Available ranges of `board` inside `[from, to)`.
    pub fn availability(&self, board: usize, from: u64, to: u64) -> Result<Vec<Range<u64>>> {
        Ok(clip(&self.published_ranges(board)?, from, to))
    }

    /// Whether every time index of `[from, to)` is available on `board`.
    pub fn is_available(&self, board: usize, from: u64, to: u64) -> Result<bool> {
        if from >= to {
            return Ok(true);
        }
        let ranges = self.published_ranges(board)?;
        Ok(ranges.iter().any(|r| r.start <= from && to <= r.end))
    }

    /// The board's published gate value.
    pub fn progress(&self, board: usize) -> Result<u64> {
        Ok(self.control(board)?.progress.load(Ordering::Acquire))
    }

    /// Whether the producer still owns the region.
    pub fn is_live(&self) -> bool {
        self.header()
            .map(|h| h.state.load(Ordering::Acquire) == STATE_READY)
            .unwrap_or(false)
    }

    /// Poll the board's published progress until it reaches `target`.
    ///
    /// Returns `Ok(false)` on timeout and [`IngestError::ProducerGone`] when
    /// the producer retires the region before the target is reached. Threads
    /// in the producer process can block on [`SampleBuffer::gate`] instead.
    pub fn wait_for(&self, board: usize, target: u64, timeout: Duration) -> Result<bool> {
        let control = self.control(board)?;
        let header = self.header()?;
        let mut backoff = PollBackoff::new(timeout);
        loop {
            if control.progress.load(Ordering::Acquire) >= target {
                return Ok(true);
            }
            if header.state.load(Ordering::Acquire) == STATE_RETIRED {
                return Err(IngestError::ProducerGone(self.region.key()));
            }
            if !backoff.snooze() {
                return Ok(false);
            }
        }
    }

    /// Copy samples `[from, to)` of `board` into `out`, time-major.
    ///
    /// Returns the sub-ranges whose bytes are valid: those available both
    /// before and after the copy. Bytes outside the returned ranges are
    /// unspecified (never written, or overwritten while copying).
    pub fn read(&self, board: usize, from: u64, to: u64, out: &mut [u8]) -> Result<Vec<Range<u64>>> {
        self.check_board(board)?;
        if from >= to {
            return Err(IngestError::InvalidPayload(format!(
                "empty read range [{from}, {to})"
            )));
        }
        let samples = to - from;
        if samples > self.capacity() {
            return Err(IngestError::InvalidPayload(format!(
                "read of {samples} samples exceeds the ring capacity of {}",
                self.capacity()
            )));
        }
        let needed = samples as usize * self.layout.slot_bytes();
        if out.len() < needed {
            return Err(IngestError::InvalidPayload(format!(
                "output holds {} bytes, {needed} needed",
                out.len()
            )));
        }

        let before = self.availability(board, from, to)?;
        if before.is_empty() {
            return Ok(before);
        }

        let (first, second) = self.boards[board].ring.spans(from, samples);
        self.region.read_bytes(first.offset(), &mut out[..first.len()])?;
        if let Some(second) = second {
            self.region
                .read_bytes(second.offset(), &mut out[first.len()..first.len() + second.len()])?;
        }
        fence(Ordering::Acquire);

        let after = self.availability(board, from, to)?;
        Ok(intersect(&before, &after))
    }
}
