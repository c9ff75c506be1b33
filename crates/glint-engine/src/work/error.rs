use std::time::Duration;

/// Why an upload did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("gpu upload failed: {0}")]
    Gpu(String),

    #[error("fence wait failed: {0}")]
    Fence(String),

    #[error("fence did not signal within {0:?}")]
    Timeout(Duration),

    #[error("work function panicked")]
    Panicked,

    /// The worker never started (or died); the item was never run.
    #[error("upload worker is not running")]
    WorkerUnavailable,

    /// Submitted after the queue was shut down; the item was never run.
    #[error("work queue is shut down")]
    Rejected,
}

/// Result handed to every join callback.
pub type UploadOutcome = Result<(), UploadError>;
