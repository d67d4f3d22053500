// Read-only consumer: attaches to a running producer, follows board 0's
// published progress and reads whatever is valid behind it.
//
//   cargo run --example consumer -- <station> [timeout_secs]
use station_ingest::{init_logging, BufferBuilder, IngestError, StationConfig};
use std::env;
use std::time::Duration;

const READ_SAMPLES: u64 = 256;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info");

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <station> [timeout_secs]", args[0]);
        std::process::exit(1);
    }
    let timeout = Duration::from_secs(args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(5));

    println!("Consumer: Waiting for station {}...", args[1]);
    let station = StationConfig::new(args[1].clone(), 1);
    let buffer = match BufferBuilder::new(station).with_attach_timeout(timeout).attach_read() {
        Ok(buffer) => buffer,
        Err(e @ IngestError::RegionNotFound { .. }) => {
            eprintln!("Consumer: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!("Consumer: attached {:?}", buffer);

    let board = 0;
    let slot_bytes = buffer.layout().slot_bytes();
    let mut out = vec![0u8; READ_SAMPLES as usize * slot_bytes];
    let mut cursor = buffer.progress(board)?;
    let (mut valid, mut missing) = (0u64, 0u64);

    loop {
        match buffer.wait_for(board, cursor + READ_SAMPLES, Duration::from_secs(1)) {
            Ok(true) => {}
            Ok(false) => {
                println!("Consumer: no progress past {}", cursor);
                continue;
            }
            Err(IngestError::ProducerGone(key)) => {
                println!("Consumer: producer of {} shut down", key);
                break;
            }
            Err(e) => return Err(e.into()),
        }

        // Fell behind by more than the ring: skip to what is still held.
        let progress = buffer.progress(board)?;
        if progress.saturating_sub(cursor) > buffer.capacity() {
            cursor = progress - READ_SAMPLES;
        }

        let ranges = buffer.read(board, cursor, cursor + READ_SAMPLES, &mut out)?;
        let got: u64 = ranges.iter().map(|r| r.end - r.start).sum();
        valid += got;
        missing += READ_SAMPLES - got;
        if got < READ_SAMPLES {
            println!("Consumer: [{}, {}) valid {:?}", cursor, cursor + READ_SAMPLES, ranges);
        }
        cursor += READ_SAMPLES;
    }

    println!("Consumer: {} samples valid, {} missing", valid, missing);
    Ok(())
}
