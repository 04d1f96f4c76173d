use async_trait::async_trait;
use reqwest::Method;

use super::http::HttpPeer;
use super::{fill_endpoint, TransportError, ENDPOINT_ARCHIVE_FILE, ENDPOINT_TRANSMIT_FILE_JOB_ID};

/// The service holding a job's output files.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Fetch the bytes of output file `index` of job `job_id`.
    async fn fetch_file(&self, job_id: &str, index: usize) -> Result<Vec<u8>, TransportError>;

    /// Ask the source to archive the files of job `job_id`.
    async fn archive(&self, job_id: &str) -> Result<(), TransportError>;

    /// Ask the source to refresh its view of in-flight jobs.
    async fn retry(&self) -> Result<(), TransportError>;
}

pub struct HttpFileSource {
    peer: HttpPeer,
}

impl HttpFileSource {
    pub fn new(peer: HttpPeer) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl FileSource for HttpFileSource {
    async fn fetch_file(&self, job_id: &str, index: usize) -> Result<Vec<u8>, TransportError> {
        let path = fill_endpoint(ENDPOINT_TRANSMIT_FILE_JOB_ID, job_id, Some(index));
        let request = self.peer.request(Method::GET, &path)?;
        let response = self.peer.send(request).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(TransportError::EmptyBody);
        }
        Ok(bytes.to_vec())
    }

    async fn archive(&self, job_id: &str) -> Result<(), TransportError> {
        let path = fill_endpoint(ENDPOINT_ARCHIVE_FILE, job_id, None);
        let request = self.peer.request(Method::POST, &path)?;
        self.peer.send(request).await?;
        Ok(())
    }

    async fn retry(&self) -> Result<(), TransportError> {
        self.peer.trigger_retry().await
    }
}
