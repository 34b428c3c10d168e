//! Archival pipeline: stage executors, the driver that commits their
//! transitions, and the worker pool they run on.

pub mod context;
pub mod driver;
pub mod executors;
pub mod worker_pool;

pub use context::{ArchiveLayout, StageContext};
pub use driver::PipelineDriver;
pub use executors::{ExecutorRegistry, StageError, StageExecutor};
pub use worker_pool::WorkerPool;
