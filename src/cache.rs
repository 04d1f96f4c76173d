use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::job::Job;

pub const DEFAULT_MAX_JOBS: usize = 10_000;

/// Handle shared by the inbound handlers of one service.
pub type SharedJobCache = Arc<Mutex<JobCache>>;

/// Jobs a service is currently working on, keyed by job id.
///
/// Bounded and not durable: a restart rebuilds it from the repository.
#[derive(Debug)]
pub struct JobCache {
    jobs: HashMap<String, Job>,
    max_jobs: usize,
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JobCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            max_jobs,
        }
    }

    pub fn shared(max_jobs: usize) -> SharedJobCache {
        Arc::new(Mutex::new(Self::with_capacity(max_jobs)))
    }

    /// Insert or replace a job. Returns false if a new id would exceed capacity.
    pub fn add_job(&mut self, job: Job) -> bool {
        if !self.jobs.contains_key(&job.id) && self.jobs.len() >= self.max_jobs {
            return false;
        }
        self.jobs.insert(job.id.clone(), job);
        true
    }

    pub fn get_job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn remove_job(&mut self, id: &str) -> Option<Job> {
        self.jobs.remove(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.keys().cloned().collect();
        ids.sort();
        ids
    }
}
