//! Error types for job orchestration.

use thiserror::Error;

/// Errors produced while configuring or running a bulk job.
///
/// Every fatal variant bubbles to the scheduler thread, which performs
/// best-effort shutdown of the pool and monitor before returning it.
#[derive(Debug, Error)]
pub enum JobError {
    /// Invalid or missing configuration, detected before any work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Backend connect, session, or module-install failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single work item's invocation or result handling failed.
    /// Fatal to the whole batch: no retry, no partial-success continuation.
    #[error("task failed for item `{item}`: {reason}")]
    TaskExecution {
        /// The work item whose task failed (empty for batch-level hooks).
        item: String,
        /// What went wrong.
        reason: String,
    },

    /// An observed count (completed or enumerated) exceeded the expected
    /// total. Contract violation by the producing side; always a hard abort.
    #[error("anomaly: {0}")]
    Anomaly(String),

    /// The post-batch hook failed after all items completed. Reported, but
    /// does not invalidate already-completed work.
    #[error("finalization error: {0}")]
    Finalization(String),

    /// The loader failed while reading an item.
    #[error("item read error: {0}")]
    ItemRead(String),

    /// A credential value could not be resolved.
    #[error("credential error: {0}")]
    Credential(String),

    /// Worker panic, channel breakage, or other internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = JobError::Configuration("missing process module".into());
        assert_eq!(
            format!("{err}"),
            "configuration error: missing process module"
        );

        let err = JobError::TaskExecution {
            item: "/a.xml".into(),
            reason: "invoke failed".into(),
        };
        assert_eq!(format!("{err}"), "task failed for item `/a.xml`: invoke failed");

        let err = JobError::Anomaly("completed 4 of expected 3".into());
        assert_eq!(format!("{err}"), "anomaly: completed 4 of expected 3");
    }
}
