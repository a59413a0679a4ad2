//! The moodplan processing pipeline.
//!
//! Submissions flow through a durable [`IngestionBuffer`] into a pool of
//! [`Orchestrator`] consumers, which call the cognition service, persist a
//! plan record and enqueue a visualization job. A separate pool of
//! [`VisualizationWorker`]s drains the job queue. The two halves share
//! nothing but the store: a stalled or broken visualization side can only
//! leave records `pending` or `failed`.

pub mod artifacts;
pub mod ascii;
pub mod buffer;
pub mod cognition;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod secrets;
pub mod worker;

pub use buffer::{Delivery, IngestionBuffer};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use worker::VisualizationWorker;
