use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use super::http::HttpPeer;
use super::{TransportError, ENDPOINT_TRANSMIT_FILE, ENDPOINT_TRANSMIT_JOB, HEADER_FILE_NAME, HEADER_JOB_ID};
use crate::job::{FileInfo, Job};

/// Bounded retry for reading a local file that may still be in the middle
/// of being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRetry {
    /// Extra reads after the first one fails.
    pub attempts: u32,
    pub wait: Duration,
}

impl Default for ReadRetry {
    fn default() -> Self {
        Self {
            attempts: 2,
            wait: Duration::from_millis(500),
        }
    }
}

/// Read `path`, retrying up to `retry.attempts` times.
///
/// Returns the contents and the number of retries that were needed.
pub async fn read_with_retry(path: &Path, retry: ReadRetry) -> Result<(Vec<u8>, u32), TransportError> {
    let mut retries = 0;
    loop {
        match tokio::fs::read(path).await {
            Ok(bytes) => return Ok((bytes, retries)),
            Err(e) if retries >= retry.attempts => {
                return Err(TransportError::Read {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    retry = retries + 1,
                    error = %e,
                    "File not readable yet, retrying"
                );
                tokio::time::sleep(retry.wait).await;
                retries += 1;
            }
        }
    }
}

/// The service that accepts input jobs and their bytes from the sender.
#[async_trait]
pub trait FileReceiver: Send + Sync {
    async fn transmit_job(&self, job: &Job) -> Result<(), TransportError>;

    /// Send the bytes of `file` for job `job_id`. Returns the read retries used.
    async fn transmit_file(&self, job_id: &str, file: &FileInfo) -> Result<u32, TransportError>;
}

pub struct HttpFileReceiver {
    peer: HttpPeer,
    read_retry: ReadRetry,
}

impl HttpFileReceiver {
    pub fn new(peer: HttpPeer, read_retry: ReadRetry) -> Self {
        Self { peer, read_retry }
    }
}

#[async_trait]
impl FileReceiver for HttpFileReceiver {
    async fn transmit_job(&self, job: &Job) -> Result<(), TransportError> {
        let request = self.peer.request(Method::POST, ENDPOINT_TRANSMIT_JOB)?.json(job);
        self.peer.send(request).await?;
        Ok(())
    }

    async fn transmit_file(&self, job_id: &str, file: &FileInfo) -> Result<u32, TransportError> {
        let (bytes, retries) = read_with_retry(&file.path(), self.read_retry).await?;

        let request = self
            .peer
            .request(Method::POST, ENDPOINT_TRANSMIT_FILE)?
            .header(HEADER_FILE_NAME, &file.name)
            .header(HEADER_JOB_ID, job_id)
            .body(bytes);
        self.peer.send(request).await?;
        Ok(retries)
    }
}
