// Admission walkthrough: three observations on one station.
// A and B use disjoint channels and run together; C overlaps A and waits
// until A is removed. D is cancelled while it waits.
//
//   cargo run --example scheduler
use station_ingest::{init_logging, AdmissionController, ClaimOutcome, StationFootprint};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("station_ingest=info");

    let controller = Arc::new(AdmissionController::new());
    let a = controller.insert("observation A", StationFootprint::new("CS001", 0..10));
    let b = controller.insert("observation B", StationFootprint::new("CS001", 20..30));
    let c = controller.insert("observation C", StationFootprint::new("CS001", 5..15));
    let d = controller.insert("observation D", StationFootprint::new("CS001", 0..30));

    println!("A: {:?}", controller.claim_resources(a)?);
    println!("B: {:?}", controller.claim_resources(b)?);

    let waiter = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.claim_resources(c))
    };
    let cancelled = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.claim_resources(d))
    };

    thread::sleep(Duration::from_millis(200));
    for job in controller.list_jobs() {
        println!("  {} {:<14} {:?}", job.id, job.description, job.state);
    }

    controller.cancel(d)?;
    assert_eq!(cancelled.join().expect("claim thread panicked")?, ClaimOutcome::Cancelled);
    controller.remove(d)?;
    println!("D: cancelled while waiting");

    println!("Removing A");
    controller.remove(a)?;
    println!("C: {:?}", waiter.join().expect("claim thread panicked")?);

    controller.remove(b)?;
    controller.remove(c)?;
    controller.wait_until_all_jobs_are_finished();
    println!("All jobs finished");
    Ok(())
}
