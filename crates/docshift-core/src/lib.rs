//! docshift Core Library
//!
//! This crate provides the domain models, error taxonomy, configuration, and
//! filename validation shared by every docshift component.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use config::{BusBackend, Config};
pub use error::{AdmissionError, AppError, TransitionError};
pub use models::{Admission, ClientStorageAccount, ConversionKind, Job, JobStatus};
pub use validation::validate_filename;
