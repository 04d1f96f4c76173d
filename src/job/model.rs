use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identity of the service currently responsible for a job.
///
/// Exactly one owner holds a job at a time. [`Owner::None`] marks a job that is
/// idle: either terminal or waiting for an upstream producer to pick it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Owner {
    #[default]
    #[serde(rename = "none", alias = "")]
    None,
    #[serde(rename = "file-watcher")]
    FileWatcher,
    #[serde(rename = "data-organizer")]
    DataOrganizer,
    #[serde(rename = "file-sender-oem")]
    FileSenderOem,
    #[serde(rename = "file-receiver-gateway")]
    FileReceiverGateway,
    #[serde(rename = "task-launcher")]
    TaskLauncher,
    #[serde(rename = "file-sender-gateway")]
    FileSenderGateway,
    #[serde(rename = "file-receiver-oem")]
    FileReceiverOem,
    #[serde(rename = "job-repository")]
    JobRepository,
}

impl Owner {
    pub const ALL: [Owner; 9] = [
        Owner::None,
        Owner::FileWatcher,
        Owner::DataOrganizer,
        Owner::FileSenderOem,
        Owner::FileReceiverGateway,
        Owner::TaskLauncher,
        Owner::FileSenderGateway,
        Owner::FileReceiverOem,
        Owner::JobRepository,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Owner::None => "none",
            Owner::FileWatcher => "file-watcher",
            Owner::DataOrganizer => "data-organizer",
            Owner::FileSenderOem => "file-sender-oem",
            Owner::FileReceiverGateway => "file-receiver-gateway",
            Owner::TaskLauncher => "task-launcher",
            Owner::FileSenderGateway => "file-sender-gateway",
            Owner::FileReceiverOem => "file-receiver-oem",
            Owner::JobRepository => "job-repository",
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Owner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Owner::ALL
            .into_iter()
            .find(|owner| owner.as_str() == s)
            .ok_or_else(|| format!("unknown owner: {}", s))
    }
}

/// Job-level status.
///
/// Every status except `Incomplete` is terminal once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobStatus {
    Complete,
    #[default]
    #[serde(alias = "")]
    Incomplete,
    #[serde(rename = "NoPipelineFound")]
    NoPipeline,
    PipelineError,
    /// Job metadata could not be published or transmitted. Unrelated to files.
    TransmissionFailed,
    /// At least one output file is in a failed state.
    FileErrored,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        *self != JobStatus::Incomplete
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Complete => write!(f, "Complete"),
            JobStatus::Incomplete => write!(f, "Incomplete"),
            JobStatus::NoPipeline => write!(f, "NoPipelineFound"),
            JobStatus::PipelineError => write!(f, "PipelineError"),
            JobStatus::TransmissionFailed => write!(f, "TransmissionFailed"),
            JobStatus::FileErrored => write!(f, "FileErrored"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileStatus {
    /// Not yet initialised by the stage that first tracks output files.
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "FileComplete")]
    Complete,
    #[serde(rename = "FileIncomplete")]
    Incomplete,
    #[serde(rename = "FileTransmissionFailed")]
    TransmissionFailed,
    #[serde(rename = "FileArchivalFailed")]
    ArchivalFailed,
    #[serde(rename = "FileWriteFailed")]
    WriteFailed,
    #[serde(rename = "FileInvalid")]
    Invalid,
}

impl FileStatus {
    /// Failed states are terminal: automatic retries never resubmit them.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            FileStatus::TransmissionFailed
                | FileStatus::ArchivalFailed
                | FileStatus::WriteFailed
                | FileStatus::Invalid
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Unset => write!(f, "unset"),
            FileStatus::Complete => write!(f, "FileComplete"),
            FileStatus::Incomplete => write!(f, "FileIncomplete"),
            FileStatus::TransmissionFailed => write!(f, "FileTransmissionFailed"),
            FileStatus::ArchivalFailed => write!(f, "FileArchivalFailed"),
            FileStatus::WriteFailed => write!(f, "FileWriteFailed"),
            FileStatus::Invalid => write!(f, "FileInvalid"),
        }
    }
}

/// User-facing error attached to a job or an output file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorDetails {
    pub owner: Owner,
    #[serde(rename = "Error")]
    pub message: String,
}

impl ErrorDetails {
    pub fn new(owner: Owner, message: impl Into<String>) -> Self {
        Self {
            owner,
            message: message.into(),
        }
    }

    /// The empty value the repository stores once an error has been resolved.
    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

/// Location of a job's input file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileInfo {
    pub hostname: String,
    pub dir_name: String,
    /// File name including its extension.
    pub name: String,
    pub extension: String,
    pub archive_name: String,
    pub viewable: String,
    pub attributes: HashMap<String, String>,
}

impl FileInfo {
    pub fn new(hostname: &str, dir_name: &str, name: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            dir_name: dir_name.to_string(),
            name: name.to_string(),
            extension: extension_of(name),
            ..Default::default()
        }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.dir_name).join(&self.name)
    }
}

/// A file produced by the processing pipeline for a job.
///
/// Its index inside [`PipelineDetails::output_files`] is its identity for the
/// lifetime of the job.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OutputFile {
    pub dir_name: String,
    pub name: String,
    pub extension: String,
    pub archive_name: String,
    pub viewable: String,
    pub status: FileStatus,
    pub error_details: Option<ErrorDetails>,
    pub owner: Owner,
}

impl OutputFile {
    pub fn new(dir_name: &str, name: &str) -> Self {
        Self {
            dir_name: dir_name.to_string(),
            name: name.to_string(),
            extension: extension_of(name),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = status;
        self
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.dir_name).join(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PipelineDetails {
    pub task_id: String,
    pub status: String,
    #[serde(rename = "QCFlags")]
    pub qc_flags: String,
    pub output_file_host: String,
    pub output_files: Vec<OutputFile>,
    pub results: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Job {
    pub id: String,
    pub owner: Owner,
    pub input_file: FileInfo,
    pub pipeline_details: PipelineDetails,
    /// Nanoseconds since the Unix epoch (UTC) of the last repository write.
    pub last_updated: i64,
    pub status: JobStatus,
    pub error_details: Option<ErrorDetails>,
}

impl Job {
    pub fn new(id: impl Into<String>, owner: Owner, input_file: FileInfo) -> Self {
        Self {
            id: id.into(),
            owner,
            input_file,
            ..Default::default()
        }
    }

    pub fn with_output_files(mut self, host: &str, files: Vec<OutputFile>) -> Self {
        self.pipeline_details.output_file_host = host.to_string();
        self.pipeline_details.output_files = files;
        self
    }

    /// Advance `last_updated`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        self.last_updated = now.max(self.last_updated.saturating_add(1));
    }

    /// `host:dir/name` of the input file, for log lines.
    pub fn full_input_file_location(&self) -> String {
        format!(
            "{}:{}",
            self.input_file.hostname,
            self.input_file.path().display()
        )
    }

    /// `host:first, second, ...` of the output files, for log lines.
    pub fn full_output_file_location(&self) -> String {
        let names: Vec<&str> = self
            .pipeline_details
            .output_files
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        format!(
            "{}:{}",
            self.pipeline_details.output_file_host,
            names.join(", ")
        )
    }
}

/// File extension including the leading dot, or an empty string.
pub fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}
