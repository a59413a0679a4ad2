//! Core types and trait definitions for the moodplan pipeline.
//!
//! This crate is deliberately free of HTTP, queue and database dependencies.
//! The store, pipeline and server crates all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod emotion;
pub mod error;
pub mod plan;
pub mod service;
pub mod store;
pub mod submission;

pub use error::{Error, Result};
