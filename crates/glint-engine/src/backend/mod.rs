//! Backend contract.
//!
//! A backend is one context's view of a GPU API: it hands out execution
//! contexts that pipelines dispatch into, and upload contexts that live on the
//! context's worker thread and share its object namespace.

pub mod recording;

use std::time::Duration;

use crate::pipeline::ExecutionContext;
use crate::resource::{Array, ArrayData, ContextId, Texture, TextureData};
use crate::work::{UploadError, UploadOutcome};

pub trait Backend {
    /// Lazy-binding key of every object this backend creates.
    fn context_id(&self) -> ContextId;

    fn name(&self) -> &str;

    /// Starts one pipeline execution.
    fn begin_execution(&self) -> Box<dyn ExecutionContext + '_>;

    /// Creates the worker-side context. Called on the owning thread, then moved
    /// to the worker.
    fn create_upload_context(&self) -> anyhow::Result<Box<dyn UploadContext>>;
}

/// Worker-side half of a context.
///
/// Objects it creates land in the same [`UserData`](crate::resource::UserData)
/// slot the owning context binds from, so an array uploaded here is the array
/// drawn there.
pub trait UploadContext: Send {
    fn context_id(&self) -> ContextId;

    /// Called once on the worker thread before any work runs.
    fn make_current(&mut self) -> Result<(), UploadError> {
        Ok(())
    }

    fn upload_array(&mut self, array: &Array, data: &ArrayData) -> UploadOutcome;

    fn upload_texture(&mut self, texture: &Texture, data: &TextureData) -> UploadOutcome;

    /// Blocks until everything submitted so far has completed on the GPU, or
    /// `timeout` passes.
    fn fence(&mut self, timeout: Duration) -> UploadOutcome;
}
