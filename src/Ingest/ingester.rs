use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use tracing::{debug, info, info_span, trace, warn};

use super::source::{PacketSource, SourceEvent};
use crate::error::{IngestError, Result};
use crate::Buffer::{SampleBuffer, WriteOutcome};
use crate::Structs::{Packet, PacketHeader, PACKET_VERSION};

/// Cloneable stop flag for one ingester.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the ingester to return after the packet it is working on.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Live counters, readable from other threads while the ingester runs.
#[derive(Default)]
pub struct IngestStats {
    received: CachePadded<AtomicU64>,
    written: CachePadded<AtomicU64>,
    duplicates: CachePadded<AtomicU64>,
    dropped_invalid: CachePadded<AtomicU64>,
    dropped_stale: CachePadded<AtomicU64>,
    dropped_table_full: CachePadded<AtomicU64>,
    format_errors: CachePadded<AtomicU64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounters {
    pub received: u64,
    pub written: u64,
    pub duplicates: u64,
    pub dropped_invalid: u64,
    /// Behind the ring window or before the ingester's origin.
    pub dropped_stale: u64,
    pub dropped_table_full: u64,
    pub format_errors: u64,
}

impl IngestStats {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestCounters {
        IngestCounters {
            received: self.received.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            dropped_table_full: self.dropped_table_full.load(Ordering::Relaxed),
            format_errors: self.format_errors.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one packet handed to [`PacketIngester::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Stored(WriteOutcome),
    /// Inconsistent with the buffer's descriptor; dropped and counted.
    Rejected,
    /// Starts before the board's origin; dropped and counted as stale.
    BeforeOrigin,
}

/// Moves packets from a [`PacketSource`] into a [`SampleBuffer`].
///
/// Per packet: receive, validate against the descriptor, locate the board,
/// write, then advance the board's gate over whatever is now contiguous.
/// Holes left by lost packets are never backfilled; the gate waits at a hole
/// until the ring window moves past it.
///
/// The gate counts from each board's origin: the one set with
/// [`with_origin`](Self::with_origin), else the progress the buffer already
/// published, else 0. Packets starting before the origin are dropped, so the
/// gate never passes a hole that later data could expose.
pub struct PacketIngester {
    buffer: Arc<SampleBuffer>,
    stop: StopHandle,
    stats: Arc<IngestStats>,
    expected_station: u16,
    origin: Option<u64>,
    /// Per board: the origin, and how far data is contiguous from it.
    boards: Vec<Option<BoardProgress>>,
}

#[derive(Debug, Clone, Copy)]
struct BoardProgress {
    origin: u64,
    frontier: u64,
}

impl PacketIngester {
    pub fn new(buffer: Arc<SampleBuffer>) -> Self {
        let nr_boards = buffer.nr_boards();
        let expected_station = buffer.descriptor().station_id as u16;
        Self {
            buffer,
            stop: StopHandle::new(),
            stats: Arc::new(IngestStats::default()),
            expected_station,
            origin: None,
            boards: vec![None; nr_boards],
        }
    }

    /// Share a stop flag with the caller (signal handler, supervisor thread).
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Accept packets stamped with `station_id` instead of the descriptor's.
    pub fn expected_station(mut self, station_id: u16) -> Self {
        self.expected_station = station_id;
        self
    }

    /// Time index the stream starts at, for every board.
    pub fn with_origin(mut self, time_index: u64) -> Self {
        self.origin = Some(time_index);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub fn counters(&self) -> IngestCounters {
        self.stats.snapshot()
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// Ingest until the source ends or the stop handle is raised.
    ///
    /// Format errors from the source are counted and skipped; any other
    /// error ends the run and is returned.
    pub fn run<S: PacketSource>(&mut self, source: &mut S) -> Result<IngestCounters> {
        let span = info_span!(
            "ingest",
            station = self.buffer.descriptor().station_name(),
            key = %self.buffer.region().key()
        );
        let _enter = span.enter();
        info!(boards = self.buffer.nr_boards(), "ingest started");

        let mut packet = Packet::default();
        while !self.stop.is_stopped() {
            match source.read_packet(&mut packet) {
                Ok(SourceEvent::Packet) => {
                    self.process(&packet)?;
                }
                Ok(SourceEvent::EndOfStream) => {
                    debug!("end of stream");
                    break;
                }
                Err(e @ (IngestError::Format(_) | IngestError::InvalidPacket(_))) => {
                    IngestStats::bump(&self.stats.format_errors);
                    warn!(error = %e, "skipping malformed packet");
                }
                Err(e) => return Err(e),
            }
        }

        let counters = self.stats.snapshot();
        info!(
            received = counters.received,
            written = counters.written,
            duplicates = counters.duplicates,
            dropped_invalid = counters.dropped_invalid,
            dropped_stale = counters.dropped_stale,
            dropped_table_full = counters.dropped_table_full,
            format_errors = counters.format_errors,
            stopped = self.stop.is_stopped(),
            "ingest finished"
        );
        Ok(counters)
    }

    /// Handle one packet. Only failures of the buffer itself are errors.
    pub fn process(&mut self, packet: &Packet) -> Result<PacketOutcome> {
        IngestStats::bump(&self.stats.received);

        let board = match self.validate(packet) {
            Ok(board) => board,
            Err(reason) => {
                IngestStats::bump(&self.stats.dropped_invalid);
                debug!(
                    board = packet.header.board,
                    time_index = packet.header.time_index,
                    reason,
                    "dropping invalid packet"
                );
                return Ok(PacketOutcome::Rejected);
            }
        };

        let start = packet.header.time_index;
        let progress = self.progress(board)?;
        if start < progress.origin {
            IngestStats::bump(&self.stats.dropped_stale);
            trace!(
                board,
                time_index = start,
                origin = progress.origin,
                "dropping packet before origin"
            );
            return Ok(PacketOutcome::BeforeOrigin);
        }

        let outcome = self.buffer.write(board, start, &packet.payload)?;
        match outcome {
            WriteOutcome::Written => IngestStats::bump(&self.stats.written),
            WriteOutcome::Duplicate => IngestStats::bump(&self.stats.duplicates),
            WriteOutcome::Stale => {
                IngestStats::bump(&self.stats.dropped_stale);
                trace!(board, time_index = start, "dropping stale packet");
                return Ok(PacketOutcome::Stored(outcome));
            }
            WriteOutcome::TableFull => {
                IngestStats::bump(&self.stats.dropped_table_full);
                debug!(board, time_index = start, "range table full, dropping packet");
                return Ok(PacketOutcome::Stored(outcome));
            }
        }

        self.advance(board, progress)?;
        Ok(PacketOutcome::Stored(outcome))
    }

    /// The board's origin and frontier, fixed on its first packet.
    fn progress(&mut self, board: usize) -> Result<BoardProgress> {
        if let Some(progress) = self.boards[board] {
            return Ok(progress);
        }
        let origin = match self.origin {
            Some(origin) => origin,
            None => self.buffer.progress(board)?,
        };
        let progress = BoardProgress {
            origin,
            frontier: origin,
        };
        self.boards[board] = Some(progress);
        Ok(progress)
    }

    /// Move the board's frontier over newly contiguous data and open the gate to it.
    fn advance(&mut self, board: usize, progress: BoardProgress) -> Result<()> {
        let frontier = self
            .buffer
            .contiguous_end(board, progress.frontier)?
            .max(progress.frontier);
        self.boards[board] = Some(BoardProgress { frontier, ..progress });
        if self.buffer.advance_gate(board, frontier)? {
            trace!(board, frontier, "gate advanced");
        }
        Ok(())
    }

    /// Board index of a packet that fits the buffer, or why it does not.
    fn validate(&self, packet: &Packet) -> std::result::Result<usize, &'static str> {
        let PacketHeader {
            version,
            board,
            bit_mode,
            nr_channels,
            nr_samples,
            station_id,
            payload_len,
            flags,
            ..
        } = packet.header;
        let desc = self.buffer.descriptor();

        if version != PACKET_VERSION {
            return Err("unknown packet version");
        }
        if flags != 0 {
            return Err("reserved flags set");
        }
        if station_id != self.expected_station {
            return Err("packet from another station");
        }
        if bit_mode as u32 != desc.bit_mode {
            return Err("bit mode differs from the buffer");
        }
        if nr_channels as u32 != desc.channels_per_board {
            return Err("channel count differs from the buffer");
        }
        if board as usize >= desc.nr_boards() {
            return Err("unknown board");
        }
        if nr_samples == 0 {
            return Err("packet carries no samples");
        }
        if nr_samples as u64 > self.buffer.capacity() {
            return Err("packet larger than the ring");
        }
        let expected_len = nr_samples as usize * desc.slot_bytes();
        if payload_len as usize != expected_len || packet.payload.len() != expected_len {
            return Err("payload length does not match the header");
        }
        if packet.header.time_index.checked_add(nr_samples as u64).is_none() {
            return Err("time index overflows");
        }
        Ok(board as usize)
    }
}
