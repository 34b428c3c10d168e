//! vodvault: livestream and VOD archival pipeline.
//!
//! Queue items move through a fixed set of archival stages (folder setup,
//! metadata, video download, chat download/render, final moves) persisted in
//! SQLite. A dispatcher scans for eligible work and runs it on a bounded
//! worker pool; conditional updates in the store make every stage claim
//! exclusive, so crashes and concurrent workers never double-run a stage.

pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod queue;

pub use config::Config;
pub use error::{Error, Result};
