//! Job lifecycle, storage quota and expiry services.

pub mod cleanup;
pub mod jobs;
pub mod quota;

pub use cleanup::{ExpirySweeper, SweepReport};
pub use jobs::{JobLifecycleManager, RetentionPolicy};
pub use quota::{QuotaLedger, QuotaUsage};
