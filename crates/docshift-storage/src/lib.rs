//! Filesystem layout for client artifacts.
//!
//! Inputs and outputs live in per-client partitions under one storage root:
//!
//! ```text
//! {root}/input/{client_id}/{job_id}_{filename}
//! {root}/output/{client_id}/{job_id}.{ext}
//! ```
//!
//! The client ID is the only link between an account and its files.

pub mod error;
pub mod local;
pub mod usage;

pub use error::{StorageError, StorageResult};
pub use local::{ensure_parent_dir, remove_file, ClientPartitions, OutputFile};
pub use usage::directory_size;
