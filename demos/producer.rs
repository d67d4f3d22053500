// Synthetic station producer: generates packets for every board, drops a
// fraction of them to leave holes, and ingests the rest into shared memory.
//
//   cargo run --example producer -- <station> <seconds> [loss_percent]
use station_ingest::{
    init_logging, BufferBuilder, Packet, PacketIngester, PacketSource, SampleClock, SourceEvent,
    StationConfig,
};
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

const SAMPLES_PER_PACKET: u16 = 16;

struct SyntheticStation {
    descriptor: station_ingest::BufferDescriptor,
    clock: SampleClock,
    next_time: u64,
    board: u8,
    end_time: u64,
    loss_percent: u32,
    started: Instant,
    first_time: u64,
}

impl PacketSource for SyntheticStation {
    fn read_packet(&mut self, packet: &mut Packet) -> station_ingest::Result<SourceEvent> {
        loop {
            if self.next_time >= self.end_time {
                return Ok(SourceEvent::EndOfStream);
            }

            // Pace to the station's sample rate.
            let due = self
                .clock
                .duration_of(self.next_time - self.first_time);
            if let Some(wait) = due.checked_sub(self.started.elapsed()) {
                std::thread::sleep(wait);
            }

            let board = self.board;
            let time_index = self.next_time;
            self.board += 1;
            if self.board as usize == self.descriptor.nr_boards() {
                self.board = 0;
                self.next_time += SAMPLES_PER_PACKET as u64;
            }

            if fastrand::u32(0..100) < self.loss_percent {
                continue;
            }
            *packet = Packet::filled(
                &self.descriptor,
                board,
                time_index,
                SAMPLES_PER_PACKET,
                (time_index / SAMPLES_PER_PACKET as u64) as u8,
            );
            return Ok(SourceEvent::Packet);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info");

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <station> <seconds> [loss_percent]", args[0]);
        std::process::exit(1);
    }
    let seconds: u64 = args[2].parse()?;
    let loss_percent: u32 = args.get(3).map(|s| s.parse()).transpose()?.unwrap_or(0);

    let station = StationConfig::new(args[1].clone(), 1);
    let buffer = Arc::new(BufferBuilder::new(station).create()?);
    println!("Producer: created {:?}", buffer);

    let clock = SampleClock::MHZ_200;
    let first_time = clock.time_index_at(SystemTime::now());
    let mut source = SyntheticStation {
        descriptor: *buffer.descriptor(),
        clock,
        next_time: first_time,
        board: 0,
        end_time: first_time + (seconds as f64 * clock.sample_rate()) as u64,
        loss_percent,
        started: Instant::now(),
        first_time,
    };

    let mut ingester = PacketIngester::new(Arc::clone(&buffer)).with_origin(first_time);
    let stop = ingester.stop_handle();
    ctrlc::set_handler(move || stop.stop()).expect("Error setting Ctrl+C handler");

    let counters = ingester.run(&mut source)?;
    println!("Producer: {:?}", counters);
    for board in 0..buffer.nr_boards() {
        println!(
            "Producer: board {} gate {} ranges {:?}",
            board,
            buffer.progress(board)?,
            buffer.snapshot(board)?
        );
    }

    // Give consumers a moment to notice before the region is retired.
    std::thread::sleep(Duration::from_secs(1));
    println!("Producer: Shutting down");
    Ok(())
}
