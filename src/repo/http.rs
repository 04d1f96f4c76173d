use async_trait::async_trait;
use reqwest::{Method, StatusCode};

use super::{JobRepository, RepoError, ENDPOINT_JOB_ID, ENDPOINT_JOB_OWNER};
use crate::job::{Job, JobPatch, Owner};
use crate::transport::{fill_endpoint, HttpPeer, TransportError, HEADER_EXPECTED_OWNER};

/// Client of the job repository service.
pub struct HttpJobRepository {
    peer: HttpPeer,
}

impl HttpJobRepository {
    pub fn new(peer: HttpPeer) -> Self {
        Self { peer }
    }

    fn classify(&self, id: &str, expected: Option<Owner>, e: TransportError) -> RepoError {
        let status = e.status().and_then(|code| StatusCode::from_u16(code).ok());
        match (status, expected) {
            (Some(StatusCode::NOT_FOUND), _) => RepoError::NotFound(id.to_string()),
            (Some(StatusCode::CONFLICT), Some(expected)) => RepoError::OwnerConflict {
                id: id.to_string(),
                expected,
            },
            (Some(StatusCode::BAD_REQUEST), _) => RepoError::InvalidPatch(e.to_string()),
            _ => RepoError::Transport(e),
        }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn retrieve_all_by_owner(&self, owner: Owner) -> Result<Vec<Job>, RepoError> {
        let path = ENDPOINT_JOB_OWNER.replace("{owner}", owner.as_str());
        let request = self.peer.request(Method::GET, &path)?;
        let response = self.peer.send(request).await?;
        let jobs = response.json().await.map_err(TransportError::from)?;
        Ok(jobs)
    }

    async fn retrieve_by_id(&self, id: &str) -> Result<Job, RepoError> {
        let path = fill_endpoint(ENDPOINT_JOB_ID, id, None);
        let request = self.peer.request(Method::GET, &path)?;
        let response = self
            .peer
            .send(request)
            .await
            .map_err(|e| self.classify(id, None, e))?;
        let job = response.json().await.map_err(TransportError::from)?;
        Ok(job)
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job, RepoError> {
        let path = fill_endpoint(ENDPOINT_JOB_ID, id, None);
        let mut request = self.peer.request(Method::PUT, &path)?.json(&patch.fields());
        if let Some(expected) = patch.expected_owner() {
            request = request.header(HEADER_EXPECTED_OWNER, expected.as_str());
        }
        let response = self
            .peer
            .send(request)
            .await
            .map_err(|e| self.classify(id, patch.expected_owner(), e))?;
        let job = response.json().await.map_err(TransportError::from)?;
        Ok(job)
    }
}
