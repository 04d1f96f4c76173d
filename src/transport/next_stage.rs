use async_trait::async_trait;
use reqwest::Method;

use super::http::HttpPeer;
use super::{TransportError, ENDPOINT_DATA_TO_HANDLE};
use crate::job::Job;

/// Downstream service notified once a job is ready for it.
#[async_trait]
pub trait NextStage: Send + Sync {
    async fn handle_job(&self, job: &Job) -> Result<(), TransportError>;
}

pub struct HttpNextStage {
    peer: HttpPeer,
}

impl HttpNextStage {
    pub fn new(peer: HttpPeer) -> Self {
        Self { peer }
    }
}

#[async_trait]
impl NextStage for HttpNextStage {
    async fn handle_job(&self, job: &Job) -> Result<(), TransportError> {
        let request = self
            .peer
            .request(Method::POST, ENDPOINT_DATA_TO_HANDLE)?
            .json(job);
        self.peer.send(request).await?;
        Ok(())
    }
}
