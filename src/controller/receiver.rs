use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{record_failure, StageController, ERR_NOTIFY};
use crate::cache::SharedJobCache;
use crate::error::{RelayError, Result};
use crate::job::{validate, Job, JobPatch, JobStatus, Owner};
use crate::repo::JobRepository;
use crate::transport::NextStage;

/// Accepts input jobs and their bytes on the gateway and hands them to
/// processing.
pub struct ReceiverController {
    hostname: String,
    base_folder: PathBuf,
    repo: Arc<dyn JobRepository>,
    next_stage: Arc<dyn NextStage>,
    cache: SharedJobCache,
}

impl ReceiverController {
    pub fn new(
        hostname: &str,
        base_folder: PathBuf,
        repo: Arc<dyn JobRepository>,
        next_stage: Arc<dyn NextStage>,
        cache: SharedJobCache,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            base_folder,
            repo,
            next_stage,
            cache,
        }
    }

    /// Cache job metadata ahead of its file bytes.
    ///
    /// A job whose input location would resolve outside the base folder is
    /// refused here, before any bytes arrive.
    pub async fn transmit_job(&self, job: Job) -> Result<()> {
        validate::job_id(&job.id)?;
        validate::input_file_name(&job.input_file.name)?;
        validate::input_dir_name(&job.input_file.dir_name)?;
        validate::mirrored_subpath(&job.input_file.dir_name)?;

        let id = job.id.clone();
        let mut cache = self.cache.lock().await;
        if !cache.add_job(job) {
            return Err(RelayError::Internal(format!(
                "job cache is full, cannot accept job {}",
                id
            )));
        }
        tracing::debug!(job_id = %id, cached = cache.len(), "Cached job metadata");
        Ok(())
    }

    /// Write the posted bytes of a cached job, claim it and notify the next
    /// stage.
    pub async fn transmit_file(&self, job_id: &str, file_name: &str, bytes: &[u8]) -> Result<Job> {
        validate::received_file_name(file_name)?;

        let job = self
            .cache
            .lock()
            .await
            .get_job(job_id)
            .cloned()
            .ok_or_else(|| RelayError::validation(format!("no job received for id {}", job_id)))?;
        if job.input_file.name != file_name {
            return Err(RelayError::validation(format!(
                "file {} does not match the input file of job {}",
                file_name, job_id
            )));
        }

        let dir = self
            .base_folder
            .join(validate::mirrored_subpath(&job.input_file.dir_name)?);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RelayError::file("create", &dir, e))?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RelayError::file("write", &path, e))?;
        tracing::debug!(job_id = %job_id, path = %path.display(), bytes = bytes.len(), "Wrote input file");

        let patch = JobPatch::new()
            .owner(self.owner())
            .status(JobStatus::Incomplete)
            .input_location(&self.hostname, &dir.display().to_string())
            .expect_owner(job.owner);
        let claimed = self
            .repo
            .update(job_id, &patch)
            .await
            .map_err(|e| RelayError::update(job_id, e))?;
        tracing::info!(job_id = %job_id, from = %job.owner, owner = %self.owner(), "Took ownership of job");

        self.cache.lock().await.remove_job(job_id);

        if let Err(e) = self.next_stage.handle_job(&claimed).await {
            tracing::error!(job_id = %job_id, error = %e, "Next stage notification failed, job kept for retry");
        }
        Ok(claimed)
    }
}

#[async_trait]
impl StageController for ReceiverController {
    fn owner(&self) -> Owner {
        Owner::FileReceiverGateway
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
            let check = validate::hostname(&self.hostname, &job.input_file.hostname)
                .and_then(|_| validate::file_exists(&job.input_file.path()));
            if let Err(e) = check {
                tracing::warn!(job_id = %job.id, error = %e, "Skipping job on retry");
                errors.push(e);
                continue;
            }

            if let Err(e) = self.next_stage.handle_job(&job).await {
                if let Err(update) =
                    record_failure(self.repo.as_ref(), &job.id, self.owner(), e.kind(), ERR_NOTIFY).await
                {
                    errors.push(update);
                }
                errors.push(RelayError::transport(ERR_NOTIFY, e));
            }
        }
        RelayError::collect(errors)
    }
}
