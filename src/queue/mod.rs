//! Queue domain: stages, items and the service facade.

pub mod item;
pub mod service;
pub mod stage;

pub use item::QueueItem;
pub use service::{NewQueueItem, QueueService};
pub use stage::{Stage, StageStatus, Track};
