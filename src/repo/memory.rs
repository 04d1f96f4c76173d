use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{JobRepository, RepoError};
use crate::job::{FileInfo, Job, JobPatch, Owner};
use crate::transport::TransportError;

#[derive(Default)]
struct Store {
    jobs: HashMap<String, Job>,
    updates: Vec<(String, JobPatch)>,
    unavailable: bool,
    reject_updates: bool,
}

/// Job repository held in process memory.
///
/// Enforces the owner compare-and-swap and records every applied update, so
/// it also serves as the repository double in tests.
#[derive(Default)]
pub struct InMemoryJobRepository {
    store: Mutex<Store>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        let mut store = self.store.lock().await;
        store.jobs.insert(job.id.clone(), job);
    }

    /// Store a new job under a fresh id.
    pub async fn create(&self, owner: Owner, input_file: FileInfo) -> Job {
        let mut job = Job::new(Uuid::new_v4().to_string(), owner, input_file);
        job.touch();
        self.insert(job.clone()).await;
        job
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.store.lock().await.jobs.get(id).cloned()
    }

    /// Every applied update in order, as `(job id, patch)`.
    pub async fn updates(&self) -> Vec<(String, JobPatch)> {
        self.store.lock().await.updates.clone()
    }

    pub async fn updates_for(&self, id: &str) -> Vec<JobPatch> {
        self.store
            .lock()
            .await
            .updates
            .iter()
            .filter(|(job_id, _)| job_id == id)
            .map(|(_, patch)| patch.clone())
            .collect()
    }

    /// Make every call fail as if the repository could not be reached.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.store.lock().await.unavailable = unavailable;
    }

    /// Reject updates while still answering reads.
    pub async fn set_reject_updates(&self, reject: bool) {
        self.store.lock().await.reject_updates = reject;
    }
}

fn unavailable() -> RepoError {
    RepoError::Transport(TransportError::Connect("job repository unavailable".into()))
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn retrieve_all_by_owner(&self, owner: Owner) -> Result<Vec<Job>, RepoError> {
        let store = self.store.lock().await;
        if store.unavailable {
            return Err(unavailable());
        }
        let mut jobs: Vec<Job> = store
            .jobs
            .values()
            .filter(|job| job.owner == owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    async fn retrieve_by_id(&self, id: &str) -> Result<Job, RepoError> {
        let store = self.store.lock().await;
        if store.unavailable {
            return Err(unavailable());
        }
        store
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(id.to_string()))
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job, RepoError> {
        let mut store = self.store.lock().await;
        if store.unavailable {
            return Err(unavailable());
        }
        if store.reject_updates {
            return Err(RepoError::InvalidPatch(format!("updates disabled for {}", id)));
        }

        let job = store
            .jobs
            .get_mut(id)
            .ok_or_else(|| RepoError::NotFound(id.to_string()))?;
        if let Some(expected) = patch.expected_owner() {
            if job.owner != expected {
                return Err(RepoError::OwnerConflict {
                    id: id.to_string(),
                    expected,
                });
            }
        }
        patch.apply(job);
        let updated = job.clone();
        store.updates.push((id.to_string(), patch.clone()));
        Ok(updated)
    }
}
