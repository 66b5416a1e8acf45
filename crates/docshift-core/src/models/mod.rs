pub mod client_storage;
pub mod conversion;
pub mod job;

pub use client_storage::{Admission, ClientStorageAccount};
pub use conversion::ConversionKind;
pub use job::{clip_error_detail, Job, JobStatus};
