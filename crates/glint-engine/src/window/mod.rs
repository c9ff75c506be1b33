//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and Window, and wires them to a wgpu context and
//! its upload worker.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeEvent};
