//! Per-file transmission fan-out.
//!
//! Every eligible output file of a job is pulled by its own task. All tasks
//! are joined before the job-level decision is made, so one slow or failing
//! file never blocks the others and a partially pulled job is never
//! archived.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::{ERR_ARCHIVE, ERR_TRANSMIT_FILE, ERR_WRITE_FILE};
use crate::error::{RelayError, Result};
use crate::job::{ErrorDetails, FileStatus, Job, JobPatch, JobStatus, OutputFile, Owner};
use crate::repo::JobRepository;
use crate::transport::{FailureKind, FileSource};

/// Result reported by one per-file unit.
#[derive(Debug)]
pub struct FileOutcome {
    pub index: usize,
    pub file: OutputFile,
    pub error: Option<RelayError>,
}

/// Job-level state computed from the per-file outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub owner: Owner,
    pub status: JobStatus,
    pub error_details: ErrorDetails,
    /// True when every file is complete and the job may be archived.
    pub archive: bool,
}

pub struct FanOut {
    owner: Owner,
    hostname: String,
    output_folder: PathBuf,
    repo: Arc<dyn JobRepository>,
    source: Arc<dyn FileSource>,
}

impl FanOut {
    pub fn new(
        owner: Owner,
        hostname: &str,
        output_folder: PathBuf,
        repo: Arc<dyn JobRepository>,
        source: Arc<dyn FileSource>,
    ) -> Self {
        Self {
            owner,
            hostname: hostname.to_string(),
            output_folder,
            repo,
            source,
        }
    }

    /// Run one pass over `job` and commit the result with a single update.
    ///
    /// Returns the stored job, or every error collected during the pass.
    pub async fn run(&self, job: Job) -> Result<Job> {
        let outcomes = self.transfer_files(&job).await;

        let mut files = job.pipeline_details.output_files.clone();
        let mut errors = Vec::new();
        for outcome in outcomes {
            if let Some(file) = files.get_mut(outcome.index) {
                *file = outcome.file;
            }
            if let Some(e) = outcome.error {
                errors.push(e);
            }
        }

        let mut decision = decide(self.owner, &files);
        if decision.archive {
            if let Err(e) = self.source.archive(&job.id).await {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "Archive failed, job is still complete"
                );
                decision.error_details = ErrorDetails::new(self.owner, ERR_ARCHIVE);
                errors.push(RelayError::transport(ERR_ARCHIVE, e));
            }
        }

        let patch = JobPatch::new()
            .owner(decision.owner)
            .status(decision.status)
            .error_details(decision.error_details.clone())
            .output_files(&self.hostname, files)
            .expect_owner(self.owner);

        match self.repo.update(&job.id, &patch).await {
            Ok(stored) => {
                tracing::info!(
                    job_id = %job.id,
                    owner = %decision.owner,
                    status = %decision.status,
                    "Finished output file pass"
                );
                RelayError::collect(errors).map(|_| stored)
            }
            Err(e) => {
                errors.push(RelayError::update(&job.id, e));
                RelayError::collect(errors).map(|_| job)
            }
        }
    }

    /// Pull every eligible file concurrently and wait for all of them.
    pub async fn transfer_files(&self, job: &Job) -> Vec<FileOutcome> {
        let mut handles: Vec<(usize, OutputFile, JoinHandle<FileOutcome>)> = Vec::new();

        for (index, file) in job.pipeline_details.output_files.iter().enumerate() {
            if file.status.is_failed() || file.status == FileStatus::Complete {
                tracing::debug!(
                    job_id = %job.id,
                    file_index = index,
                    status = %file.status,
                    "Skipping output file"
                );
                continue;
            }

            let unit = pull_file(
                self.source.clone(),
                job.id.clone(),
                index,
                file.clone(),
                self.output_folder.clone(),
                self.owner,
            );
            handles.push((index, file.clone(), tokio::spawn(unit)));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (index, mut file, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(job_id = %job.id, file_index = index, error = %e, "File task failed");
                    file.status = FileStatus::TransmissionFailed;
                    file.owner = self.owner;
                    file.error_details = Some(ErrorDetails::new(self.owner, ERR_TRANSMIT_FILE));
                    outcomes.push(FileOutcome {
                        index,
                        file,
                        error: Some(RelayError::Internal(format!(
                            "file task {} of job {} failed: {}",
                            index, job.id, e
                        ))),
                    });
                }
            }
        }
        outcomes
    }
}

/// Decide the job-level state from the per-file states.
pub fn decide(owner: Owner, files: &[OutputFile]) -> Decision {
    if let Some(failed) = files.iter().find(|f| f.status.is_failed()) {
        let message = failed
            .error_details
            .as_ref()
            .filter(|d| !d.is_empty())
            .map(|d| d.message.clone())
            .unwrap_or_else(|| ERR_TRANSMIT_FILE.to_string());
        return Decision {
            owner,
            status: JobStatus::FileErrored,
            error_details: ErrorDetails::new(owner, message),
            archive: false,
        };
    }

    if files.iter().any(|f| f.status != FileStatus::Complete) {
        return Decision {
            owner,
            status: JobStatus::Incomplete,
            error_details: ErrorDetails::new(owner, ERR_TRANSMIT_FILE),
            archive: false,
        };
    }

    Decision {
        owner: Owner::None,
        status: JobStatus::Complete,
        error_details: ErrorDetails::cleared(),
        archive: true,
    }
}

async fn pull_file(
    source: Arc<dyn FileSource>,
    job_id: String,
    index: usize,
    mut file: OutputFile,
    output_folder: PathBuf,
    owner: Owner,
) -> FileOutcome {
    file.status = FileStatus::Incomplete;
    file.owner = owner;

    let bytes = match source.fetch_file(&job_id, index).await {
        Ok(bytes) => bytes,
        Err(e) => {
            file.status = match e.kind() {
                FailureKind::Transient => FileStatus::Incomplete,
                FailureKind::Permanent => FileStatus::TransmissionFailed,
            };
            file.error_details = Some(ErrorDetails::new(owner, ERR_TRANSMIT_FILE));
            tracing::warn!(job_id = %job_id, file_index = index, error = %e, "Failed to fetch output file");
            return FileOutcome {
                index,
                file,
                error: Some(RelayError::transport(
                    format!("{} {} of job {}", ERR_TRANSMIT_FILE, index, job_id),
                    e,
                )),
            };
        }
    };

    let name = base_name(&file.name);
    let destination = output_folder.join(&name);
    if let Err(e) = tokio::fs::write(&destination, &bytes).await {
        file.status = FileStatus::WriteFailed;
        file.error_details = Some(ErrorDetails::new(owner, ERR_WRITE_FILE));
        tracing::warn!(job_id = %job_id, file_index = index, error = %e, "Failed to write output file");
        return FileOutcome {
            index,
            file,
            error: Some(RelayError::file("write", &destination, e)),
        };
    }

    tracing::debug!(
        job_id = %job_id,
        file_index = index,
        path = %destination.display(),
        bytes = bytes.len(),
        "Pulled output file"
    );
    file.dir_name = output_folder.display().to_string();
    file.name = name;
    file.status = FileStatus::Complete;
    file.owner = Owner::None;
    file.error_details = None;
    FileOutcome {
        index,
        file,
        error: None,
    }
}

fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}
