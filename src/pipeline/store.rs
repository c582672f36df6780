//! In-memory progress/status store.
//!
//! Maps job id to job state. Written only by the owning job's task (plus the
//! cancel path), read freely by the status API: snapshot reads clone instead
//! of aliasing mutable state. Retains the most recent N jobs; the oldest are
//! evicted first.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::pipeline::job::{JobStatus, PipelineJob};

/// Concurrent job map with bounded retention and insertion-order tracking.
pub struct JobStore {
    jobs: DashMap<String, PipelineJob>,
    /// Insertion order, oldest first, for listing and eviction.
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Insert a new job, evicting the oldest entries beyond capacity.
    pub fn insert(&self, job: PipelineJob) {
        let id = job.id.clone();
        self.jobs.insert(id.clone(), job);

        let mut order = self.order.lock();
        order.push_back(id);
        while order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }

    /// Snapshot of one job.
    pub fn get(&self, job_id: &str) -> Option<PipelineJob> {
        self.jobs.get(job_id).map(|j| j.clone())
    }

    /// Cheap status probe used by workers for cooperative cancellation.
    pub fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|j| j.status)
    }

    /// Most recent jobs, newest first.
    pub fn list_recent(&self, limit: usize) -> Vec<PipelineJob> {
        let order = self.order.lock();
        order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.jobs.get(id).map(|j| j.clone()))
            .collect()
    }

    /// Apply a mutation to a job, unless it already reached a terminal
    /// status. Returns whether the mutation was applied.
    ///
    /// Terminal immutability lives here so no caller can regress a finished
    /// job.
    pub fn mutate<F>(&self, job_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut PipelineJob),
    {
        match self.jobs.get_mut(job_id) {
            Some(mut job) => {
                if job.is_terminal() {
                    return false;
                }
                f(&mut job);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
