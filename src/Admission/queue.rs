use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::footprint::{conflicts, Footprint};
use crate::error::AdmissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Registered, footprint not claimed.
    Pending,
    /// Footprint claimed.
    Active,
    /// Asked to stop. A job cancelled while active keeps its footprint until removed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub description: String,
    pub state: JobState,
    /// Whether the job's footprint currently blocks conflicting claims.
    pub holds_resources: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// The job was cancelled before its footprint became free. Nothing is held.
    Cancelled,
    TimedOut,
}

struct Job<F> {
    description: String,
    footprint: F,
    active: bool,
    cancelled: bool,
}

impl<F> Job<F> {
    fn state(&self) -> JobState {
        match (self.cancelled, self.active) {
            (true, _) => JobState::Cancelled,
            (false, true) => JobState::Active,
            (false, false) => JobState::Pending,
        }
    }
}

struct Registry<F> {
    jobs: BTreeMap<JobId, Job<F>>,
    next_id: u64,
}

/// Admits jobs whose footprints do not conflict with any active job.
///
/// A single registry lock and one condition variable shared by every waiter;
/// each change is broadcast and each waiter re-checks its own job.
pub struct AdmissionController<F> {
    registry: Mutex<Registry<F>>,
    changed: Condvar,
}

impl<F: Footprint> Default for AdmissionController<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Footprint> AdmissionController<F> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                jobs: BTreeMap::new(),
                next_id: 1,
            }),
            changed: Condvar::new(),
        }
    }

    /// Register a job as pending. Never blocks on other jobs.
    pub fn insert(&self, description: impl Into<String>, footprint: F) -> JobId {
        let mut registry = self.registry.lock();
        let id = JobId(registry.next_id);
        registry.next_id += 1;
        let description = description.into();
        debug!(%id, description = %description, "job registered");
        registry.jobs.insert(
            id,
            Job {
                description,
                footprint,
                active: false,
                cancelled: false,
            },
        );
        id
    }

    /// Block until no active job conflicts with `id`, then mark it active.
    ///
    /// Returns [`ClaimOutcome::Cancelled`] if the job is cancelled first.
    /// Waits without bound; see [`Self::claim_resources_timeout`].
    pub fn claim_resources(&self, id: JobId) -> Result<ClaimOutcome, AdmissionError> {
        self.claim(id, None)
    }

    pub fn claim_resources_timeout(
        &self,
        id: JobId,
        timeout: Duration,
    ) -> Result<ClaimOutcome, AdmissionError> {
        self.claim(id, Some(Instant::now() + timeout))
    }

    fn claim(&self, id: JobId, deadline: Option<Instant>) -> Result<ClaimOutcome, AdmissionError> {
        let mut registry = self.registry.lock();
        loop {
            let job = registry.jobs.get(&id).ok_or(AdmissionError::UnknownJob(id))?;
            if job.cancelled {
                debug!(%id, "claim abandoned, job cancelled");
                return Ok(ClaimOutcome::Cancelled);
            }
            if job.active {
                return Ok(ClaimOutcome::Claimed);
            }

            let blocker = registry
                .jobs
                .iter()
                .find(|(other, o)| **other != id && o.active && conflicts(&job.footprint, &o.footprint))
                .map(|(other, _)| *other);

            match blocker {
                None => {
                    if let Some(job) = registry.jobs.get_mut(&id) {
                        job.active = true;
                        info!(%id, description = %job.description, "job active");
                    }
                    return Ok(ClaimOutcome::Claimed);
                }
                Some(blocker) => {
                    debug!(%id, %blocker, "claim waiting");
                    if !self.wait(&mut registry, deadline) {
                        return Ok(ClaimOutcome::TimedOut);
                    }
                }
            }
        }
    }

    /// Wait for the next registry change. False once the deadline has passed.
    fn wait(&self, registry: &mut MutexGuard<'_, Registry<F>>, deadline: Option<Instant>) -> bool {
        match deadline {
            None => {
                self.changed.wait(registry);
                true
            }
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return false;
                }
                self.changed.wait_until(registry, deadline);
                true
            }
        }
    }

    /// Drop the job, releasing its footprint if it held one.
    pub fn remove(&self, id: JobId) -> Result<(), AdmissionError> {
        let mut registry = self.registry.lock();
        let job = registry.jobs.remove(&id).ok_or(AdmissionError::UnknownJob(id))?;
        info!(%id, description = %job.description, was_active = job.active, "job removed");
        self.changed.notify_all();
        Ok(())
    }

    /// Mark the job cancelled and wake its claim if it is waiting.
    ///
    /// An unknown id is reported: the job may simply have finished already.
    pub fn cancel(&self, id: JobId) -> Result<(), AdmissionError> {
        let mut registry = self.registry.lock();
        match registry.jobs.get_mut(&id) {
            Some(job) => {
                job.cancelled = true;
                info!(%id, description = %job.description, active = job.active, "job cancelled");
                self.changed.notify_all();
                Ok(())
            }
            None => {
                warn!(%id, "cancel of unknown job");
                Err(AdmissionError::UnknownJob(id))
            }
        }
    }

    pub fn is_cancelled(&self, id: JobId) -> Result<bool, AdmissionError> {
        self.registry
            .lock()
            .jobs
            .get(&id)
            .map(|job| job.cancelled)
            .ok_or(AdmissionError::UnknownJob(id))
    }

    pub fn state(&self, id: JobId) -> Option<JobState> {
        self.registry.lock().jobs.get(&id).map(Job::state)
    }

    /// Point-in-time view of every registered job, in registration order.
    pub fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.registry
            .lock()
            .jobs
            .iter()
            .map(|(id, job)| JobSnapshot {
                id: *id,
                description: job.description.clone(),
                state: job.state(),
                holds_resources: job.active,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().jobs.is_empty()
    }

    /// Block until every job has been removed.
    pub fn wait_until_all_jobs_are_finished(&self) {
        let mut registry = self.registry.lock();
        while !registry.jobs.is_empty() {
            self.changed.wait(&mut registry);
        }
    }

    /// Returns false if jobs remain after `timeout`.
    pub fn wait_until_all_jobs_are_finished_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut registry = self.registry.lock();
        while !registry.jobs.is_empty() {
            if !self.wait(&mut registry, Some(deadline)) {
                return false;
            }
        }
        true
    }

    /// Register and claim in one step. The job is removed when the guard drops.
    ///
    /// A job cancelled before it could claim is removed again and reported
    /// as [`AdmissionError::Cancelled`].
    pub fn admit(&self, description: impl Into<String>, footprint: F) -> Result<JobGuard<'_, F>, AdmissionError> {
        let id = self.insert(description, footprint);
        match self.claim_resources(id)? {
            ClaimOutcome::Claimed => Ok(JobGuard {
                controller: self,
                id,
            }),
            ClaimOutcome::Cancelled | ClaimOutcome::TimedOut => {
                // Already gone if a third party removed it meanwhile.
                let _ = self.remove(id);
                Err(AdmissionError::Cancelled(id))
            }
        }
    }
}

/// An active job; removes itself from the controller when dropped.
pub struct JobGuard<'a, F: Footprint> {
    controller: &'a AdmissionController<F>,
    id: JobId,
}

impl<F: Footprint> JobGuard<'_, F> {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Whether someone asked this job to stop. Unknown jobs count as cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.controller.is_cancelled(self.id).unwrap_or(true)
    }
}

impl<F: Footprint> Drop for JobGuard<'_, F> {
    fn drop(&mut self) {
        let _ = self.controller.remove(self.id);
    }
}

impl<F: Footprint> fmt::Debug for JobGuard<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobGuard").field("id", &self.id).finish()
    }
}
