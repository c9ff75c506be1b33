//! Glint engine crate.
//!
//! A small rendering abstraction: pipelines record backend-agnostic operations
//! against opaque resource handles, a backend binds those handles lazily per
//! context, and each context owns a background worker for asynchronous
//! uploads.
//!
//! Layers, bottom up:
//! - `resource`: handles, per-context user data, CPU payloads
//! - `pipeline`: operations, pipelines, the execution contract
//! - `work`: the upload worker and its completion contract
//! - `backend`: the backend contract plus an in-memory recording backend
//! - `device`: the wgpu backend
//! - `core` / `target` / `window`: contexts, render targets, the winit loop

pub mod backend;
pub mod coords;
pub mod core;
pub mod device;
pub mod logging;
pub mod pipeline;
pub mod resource;
pub mod target;
pub mod window;
pub mod work;

pub use core::{App, AppControl, Context, ContextConfig};
pub use target::Target;
