// SampleBuffer tests: availability bookkeeping, the stale-write rule, gate
// behaviour and attaching across mappings.
// Run with: cargo test --test sample_buffer -- --nocapture
use serial_test::serial;
use station_ingest::{
    BitMode, BufferBuilder, IngestError, SampleBuffer, StationConfig, WriteOutcome,
};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// 2 boards x 4 channels x 4 bytes (8-bit) = 16 bytes per slot
const SLOT: usize = 16;

fn station(name: &str) -> StationConfig {
    StationConfig::new(name, 7).with_boards(2, 4)
}

fn anonymous(capacity: u64) -> SampleBuffer {
    BufferBuilder::new(station("ANON"))
        .with_capacity(capacity)
        .with_availability_ranges(8)
        .anonymous()
        .unwrap()
}

fn payload(samples: usize, fill: u8) -> Vec<u8> {
    vec![fill; samples * SLOT]
}

fn cleanup_shared_memory(station: &StationConfig) {
    let _ = fs::remove_file(station.region_key().path());
}

#[test]
fn test_gap_then_fill_scenario() -> station_ingest::Result<()> {
    let buffer = anonymous(1000);

    assert_eq!(buffer.write(0, 0, &payload(100, 1))?, WriteOutcome::Written);
    assert_eq!(buffer.availability(0, 0, 100)?, vec![0..100]);
    assert_eq!(buffer.contiguous_end(0, 0)?, 100);
    buffer.advance_gate(0, 100)?;

    assert_eq!(buffer.write(0, 150, &payload(50, 2))?, WriteOutcome::Written);
    assert_eq!(buffer.availability(0, 0, 200)?, vec![0..100, 150..200]);
    assert_eq!(buffer.contiguous_end(0, 100)?, 100);
    assert_eq!(buffer.gate(0)?.current(), 100);

    assert_eq!(buffer.write(0, 100, &payload(50, 3))?, WriteOutcome::Written);
    assert_eq!(buffer.availability(0, 0, 200)?, vec![0..200]);
    assert_eq!(buffer.contiguous_end(0, 100)?, 200);
    assert!(buffer.advance_gate(0, 200)?);
    assert_eq!(buffer.gate(0)?.current(), 200);
    assert_eq!(buffer.progress(0)?, 200);

    // Boards are independent.
    assert!(buffer.availability(1, 0, 200)?.is_empty());
    Ok(())
}

#[test]
fn test_writes_are_idempotent() -> station_ingest::Result<()> {
    let buffer = anonymous(1000);
    assert_eq!(buffer.write(1, 10, &payload(20, 5))?, WriteOutcome::Written);
    let once = buffer.snapshot(1)?;
    assert_eq!(buffer.write(1, 10, &payload(20, 5))?, WriteOutcome::Duplicate);
    assert_eq!(buffer.write(1, 15, &payload(5, 5))?, WriteOutcome::Duplicate);
    assert_eq!(buffer.snapshot(1)?, once);
    Ok(())
}

#[test]
fn test_newest_write_wins() -> station_ingest::Result<()> {
    let buffer = anonymous(100);
    buffer.write(0, 0, &payload(10, 1))?;
    buffer.write(0, 5, &payload(2, 9))?;

    let mut out = vec![0u8; 10 * SLOT];
    assert_eq!(buffer.read(0, 0, 10, &mut out)?, vec![0..10]);
    assert!(out[..5 * SLOT].iter().all(|&b| b == 1));
    assert!(out[5 * SLOT..7 * SLOT].iter().all(|&b| b == 9));
    assert!(out[7 * SLOT..].iter().all(|&b| b == 1));
    Ok(())
}

#[test]
fn test_stale_write_is_rejected_without_effect() -> station_ingest::Result<()> {
    let buffer = anonymous(100);
    buffer.write(0, 500, &payload(10, 1))?;
    assert_eq!(buffer.head(0)?, 510);
    let before = buffer.snapshot(0)?;

    // Window is [410, 510).
    assert_eq!(buffer.write(0, 409, &payload(1, 2))?, WriteOutcome::Stale);
    assert_eq!(buffer.write(0, 0, &payload(10, 2))?, WriteOutcome::Stale);
    assert_eq!(buffer.snapshot(0)?, before);
    assert_eq!(buffer.head(0)?, 510);

    // Still inside the window: accepted.
    assert_eq!(buffer.write(0, 410, &payload(1, 2))?, WriteOutcome::Written);
    Ok(())
}

#[test]
fn test_wrap_retracts_overwritten_data() -> station_ingest::Result<()> {
    let buffer = anonymous(100);
    buffer.write(0, 0, &payload(100, 1))?;
    assert_eq!(buffer.availability(0, 0, 100)?, vec![0..100]);

    // Reuses the slots of [0, 30).
    buffer.write(0, 100, &payload(30, 2))?;
    assert_eq!(buffer.snapshot(0)?, vec![30..130]);

    let mut out = vec![0u8; 100 * SLOT];
    assert_eq!(buffer.read(0, 30, 130, &mut out)?, vec![30..130]);
    assert!(out[..70 * SLOT].iter().all(|&b| b == 1));
    assert!(out[70 * SLOT..].iter().all(|&b| b == 2));

    // Window moves past [130, 210): the contiguous end skips to the window
    // start, but not over [210, 300), which can still be written.
    buffer.write(0, 300, &payload(10, 3))?;
    assert_eq!(buffer.snapshot(0)?, vec![300..310]);
    assert_eq!(buffer.contiguous_end(0, 130)?, 210);
    assert_eq!(buffer.write(0, 210, &payload(90, 4))?, WriteOutcome::Written);
    assert_eq!(buffer.contiguous_end(0, 130)?, 310);
    Ok(())
}

#[test]
fn test_availability_never_shrinks_inside_window() -> station_ingest::Result<()> {
    let buffer = anonymous(1000);
    let mut seen: Vec<std::ops::Range<u64>> = Vec::new();
    for (start, len) in [(0u64, 10usize), (40, 10), (20, 10), (10, 10), (30, 10), (50, 50)] {
        buffer.write(0, start, &payload(len, 1))?;
        let now = buffer.availability(0, 0, 1000)?;
        for old in &seen {
            assert!(
                now.iter().any(|r| r.start <= old.start && old.end <= r.end),
                "{old:?} retracted, now {now:?}"
            );
        }
        seen = now;
    }
    assert_eq!(seen, vec![0..100]);
    Ok(())
}

#[test]
fn test_range_table_keeps_newest_when_full() -> station_ingest::Result<()> {
    let buffer = anonymous(1000);
    // 8 ranges tracked; write 10 disjoint ones.
    for i in 0..10u64 {
        buffer.write(0, i * 10, &payload(5, 1))?;
    }
    let ranges = buffer.snapshot(0)?;
    assert_eq!(ranges.len(), 8);
    assert_eq!(ranges.first(), Some(&(20..25)));
    assert_eq!(ranges.last(), Some(&(90..95)));
    Ok(())
}

#[test]
fn test_full_range_table_refuses_older_range() -> station_ingest::Result<()> {
    let buffer = anonymous(1000);
    for i in 0..8u64 {
        buffer.write(0, 20 + i * 10, &payload(5, 1))?;
    }
    let full = buffer.snapshot(0)?;
    assert_eq!(full.len(), 8);

    // Would be the oldest entry of a full table: refused, nothing changes.
    assert_eq!(buffer.write(0, 0, &payload(5, 2))?, WriteOutcome::TableFull);
    assert_eq!(buffer.snapshot(0)?, full);
    assert!(!buffer.is_available(0, 0, 5)?);

    // Merging into the oldest range needs no new entry.
    assert_eq!(buffer.write(0, 10, &payload(10, 2))?, WriteOutcome::Written);
    assert_eq!(buffer.snapshot(0)?.first(), Some(&(10..25)));
    Ok(())
}

#[test]
fn test_invalid_payloads_leave_buffer_untouched() {
    let buffer = anonymous(100);
    for bad in [Vec::new(), vec![0u8; SLOT + 1], payload(101, 0)] {
        let err = buffer.write(0, 0, &bad).unwrap_err();
        assert!(matches!(err, IngestError::InvalidPayload(_)), "{err}");
    }
    assert!(matches!(
        buffer.write(0, u64::MAX - 1, &payload(4, 0)),
        Err(IngestError::InvalidPayload(_))
    ));
    assert!(matches!(
        buffer.write(2, 0, &payload(1, 0)),
        Err(IngestError::UnknownBoard { board: 2, nr_boards: 2 })
    ));
    assert_eq!(buffer.head(0).unwrap(), 0);
    assert!(buffer.snapshot(0).unwrap().is_empty());
}

#[test]
fn test_read_reports_holes() -> station_ingest::Result<()> {
    let buffer = anonymous(100);
    buffer.write(0, 0, &payload(10, 1))?;
    buffer.write(0, 20, &payload(10, 1))?;

    let mut out = vec![0u8; 40 * SLOT];
    assert_eq!(buffer.read(0, 0, 40, &mut out)?, vec![0..10, 20..30]);

    assert!(matches!(buffer.read(0, 5, 5, &mut out), Err(IngestError::InvalidPayload(_))));
    assert!(matches!(buffer.read(0, 0, 200, &mut out), Err(IngestError::InvalidPayload(_))));
    let mut small = vec![0u8; SLOT];
    assert!(matches!(buffer.read(0, 0, 2, &mut small), Err(IngestError::InvalidPayload(_))));
    Ok(())
}

#[test]
fn test_board_index_routes_channels() -> station_ingest::Result<()> {
    let buffer = anonymous(10);
    assert_eq!(buffer.board_index(0)?, 0);
    assert_eq!(buffer.board_index(3)?, 0);
    assert_eq!(buffer.board_index(4)?, 1);
    assert!(matches!(
        buffer.board_index(8),
        Err(IngestError::UnknownChannel { channel: 8, nr_channels: 8 })
    ));
    Ok(())
}

#[test]
fn test_gate_wakes_local_waiter() -> station_ingest::Result<()> {
    let buffer = Arc::new(anonymous(1000));
    let waiter = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || buffer.gate(0).map(|g| g.wait_for_timeout(50, Duration::from_secs(5))))
    };
    thread::sleep(Duration::from_millis(20));
    buffer.write(0, 0, &payload(50, 1))?;
    let end = buffer.contiguous_end(0, 0)?;
    buffer.advance_gate(0, end)?;
    assert!(waiter.join().unwrap()?);
    Ok(())
}

#[test]
#[serial]
fn test_consumer_sees_producer_writes() -> station_ingest::Result<()> {
    let station = station("SBUF1");
    cleanup_shared_memory(&station);

    let producer = BufferBuilder::new(station.clone()).with_capacity(256).create()?;
    let consumer = BufferBuilder::new(station.clone())
        .with_capacity(256)
        .with_attach_timeout(Duration::from_millis(200))
        .attach_read()?;
    println!("Consumer: {:?}", consumer);
    assert!(consumer.is_live());

    producer.write(1, 1000, &payload(16, 0xab))?;
    producer.advance_gate(1, 1016)?;

    assert_eq!(consumer.availability(1, 0, 2000)?, vec![1000..1016]);
    assert!(consumer.wait_for(1, 1016, Duration::from_millis(100))?);
    assert!(!consumer.wait_for(1, 2000, Duration::from_millis(20))?);

    let mut out = vec![0u8; 16 * SLOT];
    assert_eq!(consumer.read(1, 1000, 1016, &mut out)?, vec![1000..1016]);
    assert!(out.iter().all(|&b| b == 0xab));

    assert!(matches!(
        consumer.write(1, 1016, &payload(1, 0)),
        Err(IngestError::ReadOnly(_))
    ));

    drop(producer);
    assert!(!consumer.is_live());
    assert!(matches!(
        consumer.wait_for(1, 5000, Duration::from_millis(100)),
        Err(IngestError::ProducerGone(_))
    ));
    Ok(())
}

#[test]
#[serial]
fn test_attach_before_producer_times_out() {
    let station = station("SBUF2");
    cleanup_shared_memory(&station);

    let err = BufferBuilder::new(station)
        .with_attach_timeout(Duration::from_millis(50))
        .attach_read()
        .unwrap_err();
    println!("Attach error: {err}");
    assert!(matches!(err, IngestError::RegionNotFound { .. }));
    assert!(err.is_transient());
}

#[test]
#[serial]
fn test_attach_waits_for_late_producer() -> station_ingest::Result<()> {
    let station = station("SBUF3");
    cleanup_shared_memory(&station);

    let producer = {
        let station = station.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            BufferBuilder::new(station).with_capacity(64).create()
        })
    };
    let consumer = BufferBuilder::new(station)
        .with_capacity(64)
        .with_attach_timeout(Duration::from_secs(2))
        .attach_read()?;
    let producer = producer.join().unwrap()?;
    assert!(consumer.is_live());
    drop(producer);
    Ok(())
}

#[test]
#[serial]
fn test_incompatible_shape_is_fatal() -> station_ingest::Result<()> {
    let station = station("SBUF4");
    cleanup_shared_memory(&station);

    let _producer = BufferBuilder::new(station.clone()).with_capacity(128).create()?;

    let err = BufferBuilder::new(station.clone())
        .with_capacity(256)
        .with_attach_timeout(Duration::from_millis(50))
        .attach_read()
        .unwrap_err();
    println!("Attach error: {err}");
    assert!(matches!(err, IngestError::IncompatibleShape { .. }));
    assert!(!err.is_transient());

    // A second producer with another shape may not take the key over.
    let err = BufferBuilder::new(station.clone())
        .with_capacity(256)
        .create()
        .unwrap_err();
    assert!(matches!(err, IngestError::IncompatibleShape { .. }));

    let err = BufferBuilder::new(station).with_capacity(128).create_exclusive().unwrap_err();
    assert!(matches!(err, IngestError::RegionExists(_)));
    Ok(())
}

#[test]
#[serial]
fn test_second_live_producer_is_refused() -> station_ingest::Result<()> {
    let station = station("SBUF7");
    cleanup_shared_memory(&station);

    let producer = BufferBuilder::new(station.clone()).with_capacity(128).create()?;
    producer.write(0, 0, &payload(10, 1))?;

    let err = BufferBuilder::new(station.clone())
        .with_capacity(128)
        .create()
        .unwrap_err();
    println!("Second producer: {err}");
    assert!(matches!(err, IngestError::RegionBusy { pid, .. } if pid == std::process::id()));
    // The first producer's data is untouched.
    assert_eq!(producer.snapshot(0)?, vec![0..10]);

    drop(producer);
    assert!(!station.region_key().path().exists());
    let again = BufferBuilder::new(station).with_capacity(128).create()?;
    assert!(again.snapshot(0)?.is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_bit_mode_changes_the_key() -> station_ingest::Result<()> {
    let eight = station("SBUF5");
    let sixteen = station("SBUF5").with_bit_mode(BitMode::Sixteen);
    cleanup_shared_memory(&eight);
    cleanup_shared_memory(&sixteen);

    let _a = BufferBuilder::new(eight.clone()).with_capacity(32).create_exclusive()?;
    let _b = BufferBuilder::new(sixteen).with_capacity(32).create_exclusive()?;
    assert!(eight.region_key().path().exists());
    Ok(())
}

#[test]
#[serial]
fn test_read_write_attach_resumes_published_state() -> station_ingest::Result<()> {
    let station = station("SBUF6");
    cleanup_shared_memory(&station);

    let producer = BufferBuilder::new(station.clone()).with_capacity(128).create()?;
    producer.write(0, 0, &payload(10, 1))?;
    producer.advance_gate(0, 10)?;

    let writer = BufferBuilder::new(station)
        .with_capacity(128)
        .with_attach_timeout(Duration::from_millis(100))
        .attach_read_write()?;
    assert_eq!(writer.gate(0)?.current(), 10);
    assert_eq!(writer.write(0, 5, &payload(5, 1))?, WriteOutcome::Duplicate);
    assert_eq!(writer.write(0, 10, &payload(5, 2))?, WriteOutcome::Written);
    assert_eq!(producer.snapshot(0)?, vec![0..15]);
    Ok(())
}
