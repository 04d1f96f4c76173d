use thiserror::Error;

use crate::repo::RepoError;
use crate::transport::{AuthError, TransportError};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Failed to retrieve jobs: {0}")]
    Retrieve(#[source] RepoError),

    #[error("Failed to update job {id}: {source}")]
    Update {
        id: String,
        #[source]
        source: RepoError,
    },

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to {action} {path}: {source}")]
    File {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<RelayError>),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to build auth: {0}")]
    Auth(#[from] AuthError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        RelayError::Validation(message.into())
    }

    pub fn transport(context: impl Into<String>, source: TransportError) -> Self {
        RelayError::Transport {
            context: context.into(),
            source,
        }
    }

    pub fn update(id: &str, source: RepoError) -> Self {
        RelayError::Update {
            id: id.to_string(),
            source,
        }
    }

    pub fn file(action: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        RelayError::File {
            action,
            path: path.display().to_string(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, RelayError::Validation(_))
    }

    /// Collapse a list of collected errors into one result.
    pub fn collect(mut errors: Vec<RelayError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(RelayError::Multiple(errors)),
        }
    }
}

fn join_messages(errors: &[RelayError]) -> String {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} errors occurred: {}", errors.len(), messages.join("; "))
}

pub type Result<T> = std::result::Result<T, RelayError>;
