mod model;
mod patch;
pub mod validate;

pub use model::{
    extension_of, ErrorDetails, FileInfo, FileStatus, Job, JobStatus, OutputFile, Owner,
    PipelineDetails,
};
pub use patch::JobPatch;
