//! # Bulkjob
//!
//! Bulk job orchestration for document-oriented backends.
//!
//! Bulkjob processes a large, dynamically enumerated set of work items by
//! invoking a remote procedure once per item, under a fixed-size worker pool
//! with strict backpressure, progress supervision, and fail-fast error
//! handling.
//!
//! ## Design
//!
//! - **Blocking backpressure**: the admission queue is bounded; a saturated
//!   queue blocks the producing thread instead of rejecting or dropping
//!   work. Producer latency is traded for guaranteed no-loss delivery.
//! - **At-most-once dispatch**: each work item is bound to exactly one task.
//!   The first enumerated item is dispatched immediately to smoke-test the
//!   remote procedure; the rest are buffered compactly, then dispatched in
//!   enumeration order.
//! - **Fail fast**: one failed item fails the whole batch. No retry, no
//!   partial-success continuation.
//! - **Anomaly detection**: a completed or enumerated count exceeding the
//!   expected total is a contract violation and aborts the job.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulkjob::builders::JobBuilder;
//! use bulkjob::config::JobConfig;
//!
//! let config = JobConfig {
//!     connection_uri: "backend://localhost:8000".into(),
//!     target: "documents".into(),
//!     uris_module: Some("/ext/uris.xqy".into()),
//!     process_module: Some("/ext/process.xqy".into()),
//!     thread_count: 8,
//!     ..JobConfig::default()
//! };
//!
//! let scheduler = JobBuilder::new(config)
//!     .connector(my_connector)
//!     .build()?;
//! let summary = scheduler.run()?;
//! println!("completed {} items", summary.completed);
//! ```
//!
//! The backend wire protocol, credential decryption algorithms, and outer
//! configuration surfaces (CLI, properties files) live behind traits; see
//! [`infra::backend`] and [`util::credential`].

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]

/// Core orchestration: errors, tasks, loaders, pool, monitor, scheduler.
pub mod core;
/// Configuration models and layered value resolution.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters: backend traits and loader variants.
pub mod infra;
/// Shared utilities.
pub mod util;
