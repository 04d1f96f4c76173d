use serde_json::{Map, Value};

use super::model::{ErrorDetails, Job, JobStatus, OutputFile, Owner};

pub const KEY_OWNER: &str = "Owner";
pub const KEY_STATUS: &str = "Status";
pub const KEY_ERROR_OWNER: &str = "ErrorDetails.Owner";
pub const KEY_ERROR_MESSAGE: &str = "ErrorDetails.Error";
pub const KEY_INPUT_DIR_NAME: &str = "InputFile.DirName";
pub const KEY_INPUT_HOSTNAME: &str = "InputFile.Hostname";
pub const KEY_INPUT_ARCHIVE_NAME: &str = "InputFile.ArchiveName";
pub const KEY_OUTPUT_FILE_HOST: &str = "PipelineDetails.OutputFileHost";
pub const KEY_OUTPUT_FILES: &str = "PipelineDetails.OutputFiles";

/// A partial update of a stored [`Job`].
///
/// Only the fields that are set travel to the repository. An optional
/// expected owner turns the update into a compare-and-swap on `Owner`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub owner: Option<Owner>,
    pub status: Option<JobStatus>,
    pub error_details: Option<ErrorDetails>,
    pub input_dir_name: Option<String>,
    pub input_hostname: Option<String>,
    pub input_archive_name: Option<String>,
    pub output_file_host: Option<String>,
    pub output_files: Option<Vec<OutputFile>>,
    expected_owner: Option<Owner>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn error(mut self, owner: Owner, message: impl Into<String>) -> Self {
        self.error_details = Some(ErrorDetails::new(owner, message));
        self
    }

    pub fn error_details(mut self, details: ErrorDetails) -> Self {
        self.error_details = Some(details);
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_details = Some(ErrorDetails::cleared());
        self
    }

    pub fn input_location(mut self, hostname: &str, dir_name: &str) -> Self {
        self.input_hostname = Some(hostname.to_string());
        self.input_dir_name = Some(dir_name.to_string());
        self
    }

    pub fn input_archive_name(mut self, name: impl Into<String>) -> Self {
        self.input_archive_name = Some(name.into());
        self
    }

    pub fn output_files(mut self, host: &str, files: Vec<OutputFile>) -> Self {
        self.output_file_host = Some(host.to_string());
        self.output_files = Some(files);
        self
    }

    /// Only apply this patch if the stored job is still held by `owner`.
    pub fn expect_owner(mut self, owner: Owner) -> Self {
        self.expected_owner = Some(owner);
        self
    }

    pub fn expected_owner(&self) -> Option<Owner> {
        self.expected_owner
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// The dotted field map sent as the body of a repository update.
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(owner) = self.owner {
            fields.insert(KEY_OWNER.into(), Value::from(owner.as_str()));
        }
        if let Some(status) = self.status {
            fields.insert(KEY_STATUS.into(), Value::from(status.to_string()));
        }
        if let Some(details) = &self.error_details {
            fields.insert(KEY_ERROR_OWNER.into(), Value::from(details.owner.as_str()));
            fields.insert(KEY_ERROR_MESSAGE.into(), Value::from(details.message.clone()));
        }
        if let Some(dir) = &self.input_dir_name {
            fields.insert(KEY_INPUT_DIR_NAME.into(), Value::from(dir.clone()));
        }
        if let Some(host) = &self.input_hostname {
            fields.insert(KEY_INPUT_HOSTNAME.into(), Value::from(host.clone()));
        }
        if let Some(name) = &self.input_archive_name {
            fields.insert(KEY_INPUT_ARCHIVE_NAME.into(), Value::from(name.clone()));
        }
        if let Some(host) = &self.output_file_host {
            fields.insert(KEY_OUTPUT_FILE_HOST.into(), Value::from(host.clone()));
        }
        if let Some(files) = &self.output_files {
            let value = serde_json::to_value(files).unwrap_or(Value::Array(Vec::new()));
            fields.insert(KEY_OUTPUT_FILES.into(), value);
        }
        fields
    }

    /// Rebuild a patch from a dotted field map. Unknown keys are rejected.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, String> {
        let mut patch = JobPatch::new();
        let mut error_owner: Option<Owner> = None;
        let mut error_message: Option<String> = None;

        for (key, value) in fields {
            match key.as_str() {
                KEY_OWNER => patch.owner = Some(decode(key, value)?),
                KEY_STATUS => patch.status = Some(decode(key, value)?),
                KEY_ERROR_OWNER => error_owner = Some(decode(key, value)?),
                KEY_ERROR_MESSAGE => error_message = Some(decode(key, value)?),
                KEY_INPUT_DIR_NAME => patch.input_dir_name = Some(decode(key, value)?),
                KEY_INPUT_HOSTNAME => patch.input_hostname = Some(decode(key, value)?),
                KEY_INPUT_ARCHIVE_NAME => patch.input_archive_name = Some(decode(key, value)?),
                KEY_OUTPUT_FILE_HOST => patch.output_file_host = Some(decode(key, value)?),
                KEY_OUTPUT_FILES => patch.output_files = Some(decode(key, value)?),
                other => return Err(format!("unsupported update key: {}", other)),
            }
        }

        if error_owner.is_some() || error_message.is_some() {
            patch.error_details = Some(ErrorDetails {
                owner: error_owner.unwrap_or_default(),
                message: error_message.unwrap_or_default(),
            });
        }
        Ok(patch)
    }

    /// Apply the set fields to `job` and advance its `last_updated`.
    pub fn apply(&self, job: &mut Job) {
        if let Some(owner) = self.owner {
            job.owner = owner;
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(details) = &self.error_details {
            job.error_details = Some(details.clone());
        }
        if let Some(dir) = &self.input_dir_name {
            job.input_file.dir_name = dir.clone();
        }
        if let Some(host) = &self.input_hostname {
            job.input_file.hostname = host.clone();
        }
        if let Some(name) = &self.input_archive_name {
            job.input_file.archive_name = name.clone();
        }
        if let Some(host) = &self.output_file_host {
            job.pipeline_details.output_file_host = host.clone();
        }
        if let Some(files) = &self.output_files {
            job.pipeline_details.output_files = files.clone();
        }
        job.touch();
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, value: &Value) -> Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|e| format!("invalid value for {}: {}", key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::{FileInfo, FileStatus};

    #[test]
    fn only_set_fields_are_sent() {
        let patch = JobPatch::new()
            .owner(Owner::FileReceiverOem)
            .status(JobStatus::Incomplete);
        let fields = patch.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[KEY_OWNER], "file-receiver-oem");
        assert_eq!(fields[KEY_STATUS], "Incomplete");
    }

    #[test]
    fn error_details_use_both_dotted_keys() {
        let fields = JobPatch::new()
            .error(Owner::FileSenderOem, "failed to transmit file")
            .fields();
        assert_eq!(fields[KEY_ERROR_OWNER], "file-sender-oem");
        assert_eq!(fields[KEY_ERROR_MESSAGE], "failed to transmit file");
    }

    #[test]
    fn expected_owner_is_not_a_field() {
        let patch = JobPatch::new().expect_owner(Owner::TaskLauncher);
        assert!(patch.is_empty());
        assert_eq!(patch.expected_owner(), Some(Owner::TaskLauncher));
    }

    #[test]
    fn field_map_rebuilds_the_patch() {
        let patch = JobPatch::new()
            .owner(Owner::None)
            .status(JobStatus::Complete)
            .clear_error()
            .output_files(
                "gw",
                vec![OutputFile::new("/out", "a.png").with_status(FileStatus::Complete)],
            );
        let rebuilt = JobPatch::from_fields(&patch.fields()).unwrap();
        assert_eq!(rebuilt, patch);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut fields = Map::new();
        fields.insert("Id".into(), Value::from("other"));
        assert!(JobPatch::from_fields(&fields).is_err());
    }

    #[test]
    fn apply_touches_only_patched_fields() {
        let mut job = Job::new("1", Owner::FileSenderOem, FileInfo::new("oem", "/in", "a.tiff"));
        let before = job.last_updated;

        JobPatch::new()
            .owner(Owner::FileReceiverGateway)
            .input_location("gw", "/base/sub")
            .apply(&mut job);

        assert_eq!(job.owner, Owner::FileReceiverGateway);
        assert_eq!(job.input_file.hostname, "gw");
        assert_eq!(job.input_file.dir_name, "/base/sub");
        assert_eq!(job.input_file.name, "a.tiff");
        assert_eq!(job.status, JobStatus::Incomplete);
        assert!(job.last_updated > before);
    }
}
