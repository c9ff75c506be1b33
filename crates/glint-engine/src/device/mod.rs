//! wgpu backend.
//!
//! This module is responsible for:
//! - creating the wgpu Instance/Adapter/Device/Queue
//! - creating & configuring one Surface per window target
//! - binding resource handles to buffers, textures and linked programs
//! - recording pipeline executions and presenting their window targets

mod backend;
mod error;
mod execution;
mod init;
mod objects;
mod scope;
mod shader;
mod surface;
mod upload;

pub use backend::WgpuBackend;
pub use error::{ShaderError, SurfaceErrorAction};
pub use init::BackendInit;
