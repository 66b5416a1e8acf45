//! Store traits and their implementations
//
// Traits shared by every backend
pub mod store;
//
// PostgreSQL repositories
pub mod client_storage;
pub mod job;
//
// In-process stores
pub mod memory;

pub use client_storage::ClientStorageRepository;
pub use job::JobRepository;
pub use memory::{InMemoryAccountStore, InMemoryJobStore};
pub use store::{AccountStore, JobStore};
