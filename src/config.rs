use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::error::{RelayError, Result};
use crate::job::Owner;
use crate::transport::auth::DEFAULT_TOKEN_EXPIRY;
use crate::transport::ReadRetry;

/// Which stage of the transfer chain this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Sends new input files from the instrument host to the gateway.
    Sender,
    /// Accepts input files on the gateway and hands them to processing.
    Receiver,
    /// Serves processed output files from the gateway.
    Gateway,
    /// Pulls output files back to the instrument host.
    Puller,
}

impl Role {
    /// The owner identity this role claims jobs as.
    pub fn owner(&self) -> Owner {
        match self {
            Role::Sender => Owner::FileSenderOem,
            Role::Receiver => Owner::FileReceiverGateway,
            Role::Gateway => Owner::FileSenderGateway,
            Role::Puller => Owner::FileReceiverOem,
        }
    }
}

/// Bounded retry when reading local files that may still be growing.
#[derive(Debug, Clone, Copy)]
pub struct ReadRetryConfig {
    pub attempts: u32,
    pub wait_ms: u64,
}

impl Default for ReadRetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            wait_ms: 500,
        }
    }
}

impl ReadRetryConfig {
    pub fn retry(&self) -> ReadRetry {
        ReadRetry {
            attempts: self.attempts,
            wait: Duration::from_millis(self.wait_ms),
        }
    }
}

/// Local folders a role reads from or writes to.
#[derive(Debug, Clone, Default)]
pub struct FolderConfig {
    /// Receiver: where incoming input files are written.
    pub base_folder: Option<PathBuf>,
    /// Puller: where pulled output files are written.
    pub output_folder: Option<PathBuf>,
    /// Gateway: where archived files are moved.
    pub archive_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum JwtAlgorithm {
    #[default]
    Es256,
    Rs256,
}

/// Bearer token settings for outbound calls.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// If false, calls are sent without an Authorization header.
    pub enabled: bool,
    pub algorithm: JwtAlgorithm,
    /// PEM private key used to sign tokens.
    pub private_key_path: Option<PathBuf>,
    /// File whose trimmed contents become the token issuer.
    pub issuer_key_path: Option<PathBuf>,
    pub expiry: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: JwtAlgorithm::default(),
            private_key_path: None,
            issuer_key_path: None,
            expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }
}

impl AuthConfig {
    /// Check if auth is enabled with both key files set.
    pub fn is_complete(&self) -> bool {
        self.enabled && self.private_key_path.is_some() && self.issuer_key_path.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub role: Role,
    pub listen_addr: SocketAddr,
    /// Name of this host as recorded in job file locations.
    pub hostname: String,
    pub job_repo_url: String,
    /// Sender: the receiver. Puller: the gateway.
    pub peer_url: Option<String>,
    /// Receiver: the processing stage. Gateway: the puller.
    pub next_stage_url: Option<String>,
    pub http_timeout_ms: u64,
    pub read_retry: ReadRetryConfig,
    pub folders: FolderConfig,
    pub auth: AuthConfig,
    pub cache_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            role: Role::Sender,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            hostname: String::new(),
            job_repo_url: "http://127.0.0.1:8080".to_string(),
            peer_url: None,
            next_stage_url: None,
            http_timeout_ms: 30_000,
            read_retry: ReadRetryConfig::default(),
            folders: FolderConfig::default(),
            auth: AuthConfig::default(),
            cache_capacity: crate::cache::DEFAULT_MAX_JOBS,
        }
    }
}

impl ServiceConfig {
    pub fn new(role: Role, listen_addr: SocketAddr, hostname: &str) -> Self {
        Self {
            role,
            listen_addr,
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    pub fn with_job_repo(mut self, url: &str) -> Self {
        self.job_repo_url = url.to_string();
        self
    }

    pub fn with_peer(mut self, url: &str) -> Self {
        self.peer_url = Some(url.to_string());
        self
    }

    pub fn with_next_stage(mut self, url: &str) -> Self {
        self.next_stage_url = Some(url.to_string());
        self
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Check the settings the configured role depends on.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(RelayError::Config("hostname must be set".into()));
        }
        if self.job_repo_url.trim().is_empty() {
            return Err(RelayError::Config("job repository url must be set".into()));
        }
        if self.http_timeout_ms == 0 {
            return Err(RelayError::Config("http timeout must be positive".into()));
        }
        if self.auth.enabled && !self.auth.is_complete() {
            return Err(RelayError::Config(
                "auth is enabled but the private key or issuer key path is missing".into(),
            ));
        }

        match self.role {
            Role::Sender => require(&self.peer_url, "receiver url (--peer)"),
            Role::Receiver => {
                require(&self.next_stage_url, "next stage url (--next-stage)")?;
                require_dir(&self.folders.base_folder, "base folder")
            }
            Role::Gateway => {
                require(&self.next_stage_url, "puller url (--next-stage)")?;
                require_dir(&self.folders.archive_folder, "archive folder")
            }
            Role::Puller => {
                require(&self.peer_url, "gateway url (--peer)")?;
                require_dir(&self.folders.output_folder, "output folder")
            }
        }
    }
}

fn require(value: &Option<String>, what: &str) -> Result<()> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(RelayError::Config(format!("{} must be set", what))),
    }
}

fn require_dir(value: &Option<PathBuf>, what: &str) -> Result<()> {
    match value {
        Some(path) if path.is_dir() => Ok(()),
        Some(path) => Err(RelayError::Config(format!(
            "{} {} does not exist",
            what,
            path.display()
        ))),
        None => Err(RelayError::Config(format!("{} must be set", what))),
    }
}
