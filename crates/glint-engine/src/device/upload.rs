use std::time::Duration;

use crate::backend::UploadContext;
use crate::resource::{Array, ArrayData, ContextId, Texture, TextureData, UserData};
use crate::work::{UploadError, UploadOutcome};

use super::{objects, scope};

/// Worker-side half of a [`WgpuBackend`](super::WgpuBackend).
///
/// Holds clones of the backend's device and queue, so every object it creates
/// is visible to the owning thread as soon as the upload is fenced.
///
/// Device errors raised by an upload are captured on the worker and returned
/// as [`UploadError::Gpu`]. The object is detached from the handle then, so
/// nothing draws from it.
pub(crate) struct WgpuUploads {
    pub(crate) context_id: ContextId,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
}

impl WgpuUploads {
    fn outcome(&self, user_data: &UserData, error: Option<wgpu::Error>) -> UploadOutcome {
        match error {
            None => Ok(()),
            Some(err) => {
                user_data.remove(self.context_id);
                Err(UploadError::Gpu(err.to_string()))
            }
        }
    }
}

impl UploadContext for WgpuUploads {
    fn context_id(&self) -> ContextId {
        self.context_id
    }

    fn upload_array(&mut self, array: &Array, data: &ArrayData) -> UploadOutcome {
        let ((), error) = scope::capture(&self.device, || {
            objects::write_array(&self.device, &self.queue, self.context_id, array, data)
        });
        self.outcome(array.user_data(), error)
    }

    fn upload_texture(&mut self, texture: &Texture, data: &TextureData) -> UploadOutcome {
        let ((), error) = scope::capture(&self.device, || {
            objects::write_texture(&self.device, &self.queue, self.context_id, texture, data)
        });
        self.outcome(texture.user_data(), error)
    }

    fn fence(&mut self, timeout: Duration) -> UploadOutcome {
        // Flushes staged writes.
        let index = self.queue.submit([]);

        match self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(index),
            timeout: Some(timeout),
        }) {
            Ok(_) => Ok(()),
            Err(wgpu::PollError::Timeout) => Err(UploadError::Timeout(timeout)),
            Err(err) => Err(UploadError::Fence(err.to_string())),
        }
    }
}
