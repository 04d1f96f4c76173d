//! Point-to-point HTTP clients used to move job metadata and file bytes
//! between services.

pub mod auth;
mod http;
mod next_stage;
mod receiver_client;
mod source_client;

use thiserror::Error;

pub use auth::{AuthError, JwtTokenSource, TokenSource};
pub use http::HttpPeer;
pub use next_stage::{HttpNextStage, NextStage};
pub use receiver_client::{read_with_retry, FileReceiver, HttpFileReceiver, ReadRetry};
pub use source_client::{FileSource, HttpFileSource};

pub const ENDPOINT_DATA_TO_HANDLE: &str = "/api/v1/dataToHandle";
pub const ENDPOINT_TRANSMIT_JOB: &str = "/api/v1/transmitJob";
pub const ENDPOINT_TRANSMIT_FILE: &str = "/api/v1/transmitFile";
pub const ENDPOINT_TRANSMIT_FILE_JOB_ID: &str = "/api/v1/transmitFile/{jobid}/{fileid}";
pub const ENDPOINT_ARCHIVE_FILE: &str = "/api/v1/archiveFile/{jobid}";
pub const ENDPOINT_RETRY: &str = "/api/v1/retry";

pub const HEADER_JOB_ID: &str = "jobid";
pub const HEADER_FILE_NAME: &str = "filename";
pub const HEADER_EXPECTED_OWNER: &str = "expected-owner";

/// Whether a failed call is worth repeating on a later pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network-level trouble: dial, timeout or send failure.
    Transient,
    /// The peer answered but refused, or local data was unusable.
    Permanent,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("failed to send request: {0}")]
    Send(String),

    #[error("returned not ok status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("response body was empty")]
    EmptyBody,

    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to build request: {0}")]
    Build(String),

    #[error("failed to add auth header: {0}")]
    Auth(#[from] AuthError),
}

impl TransportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Send(_) => {
                FailureKind::Transient
            }
            _ => FailureKind::Permanent,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_builder() {
            TransportError::Build(e.to_string())
        } else if e.is_decode() || e.is_body() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Send(e.to_string())
        }
    }
}

/// Substitute `{jobid}` and `{fileid}` placeholders in an endpoint template.
pub fn fill_endpoint(template: &str, job_id: &str, file_id: Option<usize>) -> String {
    let path = template.replace("{jobid}", job_id);
    match file_id {
        Some(index) => path.replace("{fileid}", &index.to_string()),
        None => path,
    }
}
