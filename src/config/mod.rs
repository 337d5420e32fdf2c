//! Configuration models and layered value resolution.

pub mod job;

pub use job::{load_env_overrides, resolve_layered, JobConfig};
