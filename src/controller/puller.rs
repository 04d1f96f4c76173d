use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{claim, FanOut, StageController};
use crate::error::{RelayError, Result};
use crate::job::{validate, Job, JobPatch, JobStatus, Owner};
use crate::repo::JobRepository;
use crate::transport::FileSource;

/// Pulls processed output files from the gateway back to the instrument
/// host.
pub struct PullerController {
    repo: Arc<dyn JobRepository>,
    source: Arc<dyn FileSource>,
    fanout: FanOut,
}

impl PullerController {
    pub fn new(
        hostname: &str,
        output_folder: PathBuf,
        repo: Arc<dyn JobRepository>,
        source: Arc<dyn FileSource>,
    ) -> Self {
        let fanout = FanOut::new(
            Owner::FileReceiverOem,
            hostname,
            output_folder,
            repo.clone(),
            source.clone(),
        );
        Self {
            repo,
            source,
            fanout,
        }
    }

    /// Validate and claim a job announced by the gateway.
    pub async fn accept(&self, job: Job) -> Result<Job> {
        validate::job_id(&job.id)?;
        claim(
            self.repo.as_ref(),
            &job,
            self.owner(),
            JobPatch::new().status(JobStatus::Incomplete),
        )
        .await
    }

    /// Pull every pending output file of a claimed job.
    pub async fn pull(&self, job: Job) -> Result<Job> {
        self.fanout.run(job).await
    }

    pub async fn handle_job(&self, job: Job) -> Result<Job> {
        let claimed = self.accept(job).await?;
        self.pull(claimed).await
    }
}

#[async_trait]
impl StageController for PullerController {
    fn owner(&self) -> Owner {
        Owner::FileReceiverOem
    }

    async fn retry_on_startup(&self) -> Result<()> {
        let jobs = self
            .repo
            .retrieve_all_by_owner(self.owner())
            .await
            .map_err(RelayError::Retrieve)?;
        tracing::info!(count = jobs.len(), "Retrying owned jobs");
        if jobs.is_empty() {
            return Ok(());
        }

        let mut errors = Vec::new();
        // the gateway only serves files for jobs in its cache
        if let Err(e) = self.source.retry().await {
            tracing::warn!(error = %e, "Gateway retry failed, pulling anyway");
            errors.push(RelayError::transport("failed to refresh gateway jobs", e));
        }

        for job in jobs {
            if let Err(e) = self.fanout.run(job).await {
                errors.push(e);
            }
        }
        RelayError::collect(errors)
    }
}
