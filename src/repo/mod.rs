//! Typed access to the shared job repository.

mod http;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{Job, JobPatch, Owner};
use crate::transport::{FailureKind, TransportError};

pub use http::HttpJobRepository;
pub use memory::InMemoryJobRepository;

pub const ENDPOINT_JOB_ID: &str = "/api/v1/job/{jobid}";
pub const ENDPOINT_JOB_OWNER: &str = "/api/v1/job/owner/{owner}";

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {id} is no longer owned by {expected}")]
    OwnerConflict { id: String, expected: Owner },

    #[error("rejected update: {0}")]
    InvalidPatch(String),

    #[error("job repository call failed: {0}")]
    Transport(#[from] TransportError),
}

impl RepoError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RepoError::Transport(e) => e.kind(),
            _ => FailureKind::Permanent,
        }
    }
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn retrieve_all_by_owner(&self, owner: Owner) -> Result<Vec<Job>, RepoError>;

    async fn retrieve_by_id(&self, id: &str) -> Result<Job, RepoError>;

    /// Apply `patch` to job `id` and return the stored result.
    ///
    /// When the patch carries an expected owner, the update is rejected with
    /// [`RepoError::OwnerConflict`] unless the stored owner still matches.
    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job, RepoError>;
}
