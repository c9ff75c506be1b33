//! Core engine-facing contracts.
//!
//! A [`Context`] is the owning-thread root of everything else: it hands out
//! pipelines and targets bound to its backend, and owns the upload worker.

mod app;
mod context;

pub use app::{App, AppControl};
pub use context::{Context, ContextConfig};
