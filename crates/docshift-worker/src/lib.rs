//! docshift worker
//!
//! Conversion registry, dispatcher and the worker pool that drains the job
//! queue, plus the process setup used by the `docshift-worker` binary.

pub mod dispatcher;
pub mod queue;
pub mod registry;
pub mod setup;
pub mod telemetry;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, SkipReason};
pub use queue::{
    DispatchFault, DispatchSignal, JobQueue, JobReceipt, WorkerPool, WorkerPoolConfig,
};
pub use registry::{CommandConverter, ConversionRegistry, Converter, RegistryBuilder};
