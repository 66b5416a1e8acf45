//! Persistence for jobs and client storage accounts.
//!
//! Services depend on the [`JobStore`] and [`AccountStore`] traits. The
//! PostgreSQL repositories back a deployed worker; the in-memory stores back
//! single-process runs and tests.

pub mod db;

pub use db::{
    AccountStore, ClientStorageRepository, InMemoryAccountStore, InMemoryJobStore, JobRepository,
    JobStore,
};
