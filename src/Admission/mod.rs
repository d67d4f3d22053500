mod footprint;
mod queue;

pub use footprint::{Footprint, StationFootprint};
pub use queue::{AdmissionController, ClaimOutcome, JobGuard, JobId, JobSnapshot, JobState};
