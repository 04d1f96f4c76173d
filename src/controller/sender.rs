use std::sync::Arc;

use async_trait::async_trait;

use super::{claim, record_failure, StageController, ERR_TRANSMIT_FILE, ERR_TRANSMIT_JOB};
use crate::error::{RelayError, Result};
use crate::job::{validate, Job, JobPatch, JobStatus, Owner};
use crate::repo::JobRepository;
use crate::transport::FileReceiver;

/// Sends new input files from the instrument host to the gateway receiver.
pub struct SenderController {
    hostname: String,
    repo: Arc<dyn JobRepository>,
    receiver: Arc<dyn FileReceiver>,
}

impl SenderController {
    pub fn new(
        hostname: &str,
        repo: Arc<dyn JobRepository>,
        receiver: Arc<dyn FileReceiver>,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            repo,
            receiver,
        }
    }

    /// Claim a new input file job and forward it to the receiver.
    ///
    /// Only precondition and claim failures are returned. A failed forward is
    /// recorded on the job and left for the next retry pass.
    pub async fn handle_job(&self, job: Job) -> Result<Job> {
        self.check(&job)?;

        let claimed = claim(
            self.repo.as_ref(),
            &job,
            self.owner(),
            JobPatch::new().status(JobStatus::Incomplete).clear_error(),
        )
        .await?;

        if let Err(e) = self.forward(&claimed).await {
            tracing::error!(job_id = %claimed.id, error = %e, "Failed to forward job");
        }
        Ok(claimed)
    }

    fn check(&self, job: &Job) -> Result<()> {
        validate::job_id(&job.id)?;
        validate::input_file_name(&job.input_file.name)?;
        validate::input_dir_name(&job.input_file.dir_name)?;
        validate::hostname(&self.hostname, &job.input_file.hostname)?;
        validate::file_exists(&job.input_file.path())
    }

    /// Post job metadata, then the file bytes.
    async fn forward(&self, job: &Job) -> Result<()> {
        if let Err(e) = self.receiver.transmit_job(job).await {
            record_failure(self.repo.as_ref(), &job.id, self.owner(), e.kind(), ERR_TRANSMIT_JOB)
                .await?;
            return Err(RelayError::transport(ERR_TRANSMIT_JOB, e));
        }

        match self.receiver.transmit_file(&job.id, &job.input_file).await {
            Ok(retries) => {
                tracing::info!(
                    job_id = %job.id,
                    file = %job.full_input_file_location(),
                    retries,
                    "Transmitted input file"
                );
                Ok(())
            }
            Err(e) => {
                record_failure(self.repo.as_ref(), &job.id, self.owner(), e.kind(), ERR_TRANSMIT_FILE)
                    .await?;
                Err(RelayError::transport(ERR_TRANSMIT_FILE, e))
            }
        }
    }
}

#[async_trait]
impl StageController for SenderController {
    fn owner(&self) -> Owner {
        Owner::FileSenderOem
    }

    async fn retry_on_startup(&self) -> Result<()> {
        let jobs = self
            .repo
            .retrieve_all_by_owner(self.owner())
            .await
            .map_err(RelayError::Retrieve)?;
        tracing::info!(count = jobs.len(), "Retrying owned jobs");

        let mut errors = Vec::new();
        for job in jobs {
            if job.status.is_terminal() {
                tracing::debug!(job_id = %job.id, status = %job.status, "Skipping settled job on retry");
                continue;
            }
            if let Err(e) = self.check(&job) {
                tracing::warn!(job_id = %job.id, error = %e, "Skipping job on retry");
                errors.push(e);
                continue;
            }
            if let Err(e) = self.forward(&job).await {
                errors.push(e);
            }
        }
        RelayError::collect(errors)
    }
}
