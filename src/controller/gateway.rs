use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{claim, record_failure, StageController, ERR_NOTIFY};
use crate::cache::SharedJobCache;
use crate::error::{RelayError, Result};
use crate::job::{validate, ErrorDetails, FileStatus, Job, JobPatch, JobStatus, Owner};
use crate::repo::JobRepository;
use crate::transport::NextStage;

/// Serves processed output files from the gateway and archives them once
/// they have been pulled.
pub struct GatewayController {
    hostname: String,
    archive_folder: PathBuf,
    repo: Arc<dyn JobRepository>,
    puller: Arc<dyn NextStage>,
    cache: SharedJobCache,
}

impl GatewayController {
    pub fn new(
        hostname: &str,
        archive_folder: PathBuf,
        repo: Arc<dyn JobRepository>,
        puller: Arc<dyn NextStage>,
        cache: SharedJobCache,
    ) -> Self {
        Self {
            hostname: hostname.to_string(),
            archive_folder,
            repo,
            puller,
            cache,
        }
    }

    /// Claim a processed job, start tracking its output files and tell the
    /// puller about it.
    pub async fn handle_job(&self, mut job: Job) -> Result<Job> {
        validate::job_id(&job.id)?;
        validate::hostname(&self.hostname, &job.pipeline_details.output_file_host)?;

        for file in job.pipeline_details.output_files.iter_mut() {
            if file.status == FileStatus::Unset {
                file.status = FileStatus::Incomplete;
                file.error_details = Some(ErrorDetails::cleared());
            }
        }

        let patch = JobPatch::new().status(JobStatus::Incomplete).output_files(
            &job.pipeline_details.output_file_host,
            job.pipeline_details.output_files.clone(),
        );
        let claimed = claim(self.repo.as_ref(), &job, self.owner(), patch).await?;

        if !self.cache.lock().await.add_job(claimed.clone()) {
            return Err(RelayError::Internal(format!(
                "job cache is full, cannot track job {}",
                claimed.id
            )));
        }

        if let Err(e) = self.puller.handle_job(&claimed).await {
            tracing::error!(job_id = %claimed.id, error = %e, "Failed to notify puller");
            record_failure(self.repo.as_ref(), &claimed.id, self.owner(), e.kind(), ERR_NOTIFY)
                .await?;
        }
        Ok(claimed)
    }

    /// Bytes of output file `index` of a tracked job.
    pub async fn fetch_file(&self, job_id: &str, index: usize) -> Result<Vec<u8>> {
        let path = {
            let cache = self.cache.lock().await;
            let job = cache
                .get_job(job_id)
                .ok_or_else(|| RelayError::validation(format!("unknown job {}", job_id)))?;
            let file = job
                .pipeline_details
                .output_files
                .get(index)
                .ok_or_else(|| {
                    RelayError::validation(format!("job {} has no output file {}", job_id, index))
                })?;
            file.path()
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| RelayError::file("read", &path, e))?;
        tracing::debug!(job_id = %job_id, file_index = index, bytes = bytes.len(), "Serving output file");
        Ok(bytes)
    }

    /// Move the input file and every non-failed output file of a tracked job
    /// into the archive folder.
    ///
    /// Ownership is left untouched; only the input archive name is recorded.
    pub async fn archive(&self, job_id: &str) -> Result<Job> {
        let job = self
            .cache
            .lock()
            .await
            .get_job(job_id)
            .cloned()
            .ok_or_else(|| RelayError::validation(format!("unknown job {}", job_id)))?;

        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut errors = Vec::new();

        let input_target = self
            .archive_folder
            .join(archive_name(&job.input_file.name, &job.id, timestamp, "input"));
        let input_archived = match move_file(&job.input_file.path(), &input_target).await {
            Ok(()) => true,
            Err(e) => {
                errors.push(e);
                false
            }
        };

        for (index, file) in job.pipeline_details.output_files.iter().enumerate() {
            if file.status.is_failed() {
                continue;
            }
            let target = self
                .archive_folder
                .join(archive_name(&file.name, &job.id, timestamp, "output"));
            if let Err(e) = move_file(&file.path(), &target).await {
                tracing::warn!(job_id = %job.id, file_index = index, error = %e, "Failed to archive output file");
                errors.push(e);
            }
        }

        let mut stored = job.clone();
        if input_archived {
            let patch =
                JobPatch::new().input_archive_name(input_target.display().to_string());
            match self.repo.update(&job.id, &patch).await {
                Ok(updated) => stored = updated,
                Err(e) => errors.push(RelayError::update(&job.id, e)),
            }
        }

        self.cache.lock().await.remove_job(job_id);
        RelayError::collect(errors)?;
        tracing::info!(job_id = %job.id, archive = %input_target.display(), "Archived job files");
        Ok(stored)
    }

    async fn refresh_cache(&self) -> Result<Vec<Job>> {
        let own = self
            .repo
            .retrieve_all_by_owner(self.owner())
            .await
            .map_err(RelayError::Retrieve)?;
        let pulling = self
            .repo
            .retrieve_all_by_owner(Owner::FileReceiverOem)
            .await
            .map_err(RelayError::Retrieve)?;

        let mut cache = self.cache.lock().await;
        for job in own.iter().chain(pulling.iter()) {
            if !cache.add_job(job.clone()) {
                tracing::warn!(job_id = %job.id, "Job cache is full, job not tracked");
            }
        }
        tracing::debug!(cached = cache.len(), "Refreshed job cache");
        Ok(own)
    }
}

#[async_trait]
impl StageController for GatewayController {
    fn owner(&self) -> Owner {
        Owner::FileSenderGateway
    }

    async fn retry_on_startup(&self) -> Result<()> {
        let jobs = self.refresh_cache().await?;
        tracing::info!(count = jobs.len(), "Retrying owned jobs");

        let mut errors = Vec::new();
        for job in jobs {
            if job.status.is_terminal() {
                tracing::debug!(job_id = %job.id, status = %job.status, "Skipping settled job on retry");
                continue;
            }
            if let Err(e) = self.puller.handle_job(&job).await {
                if let Err(update) =
                    record_failure(self.repo.as_ref(), &job.id, self.owner(), e.kind(), ERR_NOTIFY).await
                {
                    errors.push(update);
                }
                errors.push(RelayError::transport(
                    format!("{} for job {}", ERR_NOTIFY, job.id),
                    e,
                ));
            }
        }
        RelayError::collect(errors)
    }
}

/// `scan.tiff` becomes `scan_archive_<id>_<ts>_<kind>.tiff`.
pub fn archive_name(name: &str, job_id: &str, timestamp: i64, kind: &str) -> String {
    name.replacen('.', &format!("_archive_{}_{}_{}.", job_id, timestamp, kind), 1)
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| RelayError::file("archive", from, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| RelayError::file("remove", from, e))
}
