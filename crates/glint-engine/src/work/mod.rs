//! Asynchronous upload subsystem.
//!
//! One background worker per context owns an upload context that shares the
//! context's GPU object namespace. Work runs there in submission order, is
//! fenced, and is handed back to the owning thread, which runs each join
//! callback exactly once.

mod error;
mod notifier;
mod queue;

pub use error::{UploadError, UploadOutcome};
pub use notifier::{NoopNotifier, Notifier};
pub use queue::{WorkId, WorkQueue, WorkState, WorkerStatus};
