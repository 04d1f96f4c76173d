//! Stage controllers: each one claims jobs addressed to its role, performs
//! that stage's action and hands the job on.

pub mod fanout;
mod gateway;
mod puller;
mod receiver;
mod sender;

use async_trait::async_trait;

use crate::error::{RelayError, Result};
use crate::job::{Job, JobPatch, JobStatus, Owner};
use crate::repo::JobRepository;
use crate::transport::FailureKind;

pub use fanout::FanOut;
pub use gateway::GatewayController;
pub use puller::PullerController;
pub use receiver::ReceiverController;
pub use sender::SenderController;

pub const ERR_TRANSMIT_JOB: &str = "failed to transmit job";
pub const ERR_TRANSMIT_FILE: &str = "failed to transmit file";
pub const ERR_NOTIFY: &str = "failed to notify next stage";
pub const ERR_ARCHIVE: &str = "failed to archive file";
pub const ERR_WRITE_FILE: &str = "failed to write file";

#[async_trait]
pub trait StageController: Send + Sync {
    /// Owner identity this controller claims jobs as.
    fn owner(&self) -> Owner;

    /// Re-drive every job currently owned by this stage.
    ///
    /// Errors from individual jobs are collected and returned together after
    /// every job has been attempted.
    async fn retry_on_startup(&self) -> Result<()>;
}

/// Take ownership of `job`, guarded by the owner it was read with.
pub(crate) async fn claim(
    repo: &dyn JobRepository,
    job: &Job,
    owner: Owner,
    patch: JobPatch,
) -> Result<Job> {
    let patch = patch.owner(owner).expect_owner(job.owner);
    let claimed = repo
        .update(&job.id, &patch)
        .await
        .map_err(|e| RelayError::update(&job.id, e))?;

    tracing::info!(
        job_id = %job.id,
        from = %job.owner,
        owner = %owner,
        "Took ownership of job"
    );
    Ok(claimed)
}

/// Record a stage failure on a job this stage still owns.
///
/// Transient failures keep the job `Incomplete` for a later retry; anything
/// else marks it `TransmissionFailed`.
pub(crate) async fn record_failure(
    repo: &dyn JobRepository,
    job_id: &str,
    owner: Owner,
    kind: FailureKind,
    message: &str,
) -> Result<Job> {
    let status = match kind {
        FailureKind::Transient => JobStatus::Incomplete,
        FailureKind::Permanent => JobStatus::TransmissionFailed,
    };
    let patch = JobPatch::new()
        .owner(owner)
        .status(status)
        .error(owner, message)
        .expect_owner(owner);

    tracing::warn!(
        job_id = %job_id,
        owner = %owner,
        status = %status,
        error = message,
        "Recording job failure"
    );
    repo.update(job_id, &patch)
        .await
        .map_err(|e| RelayError::update(job_id, e))
}
