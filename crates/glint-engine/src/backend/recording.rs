//! GPU-free backend.
//!
//! Every backend-visible action is appended to a [`CallLog`]. Backend objects
//! are plain markers stored in the same lazy-binding slots a real backend
//! uses, so binding, sharing and release are observable without a device.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::coords::{Color, Viewport};
use crate::pipeline::{ArrayBinding, Bindings, ExecutionContext, PrimitiveMode, TextureBinding};
use crate::resource::{
    Array, ArrayData, ContextId, HandleId, Shader, ShaderSource, Texture, TextureData,
};
use crate::target::Target;
use crate::work::UploadOutcome;

use super::{Backend, UploadContext};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BeginExecution,
    SetTarget(HandleId),
    CreateSurface(HandleId),
    SetViewport(Viewport),
    ClearColor(Color),
    ClearDepth(f32),
    CreateBuffer(HandleId),
    WriteBuffer { array: HandleId, len: usize },
    CreateTexture(HandleId),
    WriteTexture {
        texture: HandleId,
        width: u32,
        height: u32,
    },
    CreateProgram(HandleId),
    ShaderFailed(HandleId),
    SetShader(HandleId),
    AttachArray { array: HandleId, attribute: String },
    AttachTexture { texture: HandleId, slot: u32 },
    Draw {
        shader: HandleId,
        mode: PrimitiveMode,
        vertices: Range<u32>,
    },
    Present(HandleId),
    Finish,
    Fence,
    DestroyBuffer(HandleId),
    DestroyTexture(HandleId),
    DestroyProgram(HandleId),
    DestroySurface(HandleId),
}

/// Shared, thread-safe call log.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, call: Call) {
        log::trace!("recorded {call:?}");
        self.lock().push(call);
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

struct RecordedBuffer {
    array: HandleId,
    log: CallLog,
}

impl Drop for RecordedBuffer {
    fn drop(&mut self) {
        self.log.push(Call::DestroyBuffer(self.array));
    }
}

struct RecordedTexture {
    texture: HandleId,
    log: CallLog,
}

impl Drop for RecordedTexture {
    fn drop(&mut self) {
        self.log.push(Call::DestroyTexture(self.texture));
    }
}

struct RecordedProgram {
    shader: HandleId,
    log: CallLog,
}

impl Drop for RecordedProgram {
    fn drop(&mut self) {
        self.log.push(Call::DestroyProgram(self.shader));
    }
}

/// Compile result kept on the shader, so a broken shader is not recompiled
/// every frame.
enum ProgramState {
    Ready(#[allow(dead_code)] RecordedProgram),
    Failed,
}

struct RecordedSurface {
    target: HandleId,
    log: CallLog,
}

impl Drop for RecordedSurface {
    fn drop(&mut self) {
        self.log.push(Call::DestroySurface(self.target));
    }
}

/// Buffer and texture binding shared by the execution and upload sides.
#[derive(Clone)]
struct Objects {
    context_id: ContextId,
    log: CallLog,
}

impl Objects {
    fn write_array(&self, array: &Array, data: &ArrayData) {
        array.user_data().get_or_insert_with(self.context_id, || {
            self.log.push(Call::CreateBuffer(array.id()));
            RecordedBuffer {
                array: array.id(),
                log: self.log.clone(),
            }
        });
        self.log.push(Call::WriteBuffer {
            array: array.id(),
            len: data.len(),
        });
    }

    fn write_texture(&self, texture: &Texture, data: &TextureData) {
        texture.user_data().get_or_insert_with(self.context_id, || {
            self.log.push(Call::CreateTexture(texture.id()));
            RecordedTexture {
                texture: texture.id(),
                log: self.log.clone(),
            }
        });
        self.log.push(Call::WriteTexture {
            texture: texture.id(),
            width: data.width(),
            height: data.height(),
        });
    }

    fn compile(&self, shader: &Shader, source: &ShaderSource) -> bool {
        if source.vertex.trim().is_empty() || source.fragment.trim().is_empty() {
            log::warn!("shader {shader:?}: empty stage source");
            self.log.push(Call::ShaderFailed(shader.id()));
            shader
                .user_data()
                .replace(self.context_id, ProgramState::Failed);
            return false;
        }

        self.log.push(Call::CreateProgram(shader.id()));
        shader.user_data().replace(
            self.context_id,
            ProgramState::Ready(RecordedProgram {
                shader: shader.id(),
                log: self.log.clone(),
            }),
        );
        true
    }

    /// Binds `array` from its contents if this context has no buffer yet.
    ///
    /// Contents are only written by whoever creates the buffer, so an upload
    /// that got there first is never overwritten.
    fn resolve_array(&self, array: &Array) -> bool {
        array
            .user_data()
            .get_or_try_insert_with(self.context_id, || {
                let data = array.contents().ok_or(())?;
                self.log.push(Call::CreateBuffer(array.id()));
                self.log.push(Call::WriteBuffer {
                    array: array.id(),
                    len: data.len(),
                });
                Ok::<_, ()>(RecordedBuffer {
                    array: array.id(),
                    log: self.log.clone(),
                })
            })
            .is_ok()
    }

    fn resolve_texture(&self, texture: &Texture) -> bool {
        texture
            .user_data()
            .get_or_try_insert_with(self.context_id, || {
                let data = texture.contents().ok_or(())?;
                self.log.push(Call::CreateTexture(texture.id()));
                self.log.push(Call::WriteTexture {
                    texture: texture.id(),
                    width: data.width(),
                    height: data.height(),
                });
                Ok::<_, ()>(RecordedTexture {
                    texture: texture.id(),
                    log: self.log.clone(),
                })
            })
            .is_ok()
    }

    fn resolve_program(&self, shader: &Shader) -> bool {
        match shader.user_data().get::<ProgramState>(self.context_id) {
            Some(state) => matches!(*state, ProgramState::Ready(_)),
            None => match shader.contents() {
                Some(source) => self.compile(shader, &source),
                None => false,
            },
        }
    }
}

/// Backend that records instead of rendering.
///
/// Clones share the context id and the call log.
#[derive(Clone)]
pub struct RecordingBackend {
    objects: Objects,
    uploads_fail: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            objects: Objects {
                context_id: ContextId::next(),
                log: CallLog::default(),
            },
            uploads_fail: false,
        }
    }

    /// A backend whose upload context cannot be created.
    pub fn failing_uploads() -> Self {
        Self {
            uploads_fail: true,
            ..Self::new()
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.objects.log
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for RecordingBackend {
    fn context_id(&self) -> ContextId {
        self.objects.context_id
    }

    fn name(&self) -> &str {
        "recording"
    }

    fn begin_execution(&self) -> Box<dyn ExecutionContext + '_> {
        self.objects.log.push(Call::BeginExecution);
        Box::new(RecordingExecution {
            objects: &self.objects,
            bindings: Bindings::new(),
            touched: Vec::new(),
        })
    }

    fn create_upload_context(&self) -> anyhow::Result<Box<dyn UploadContext>> {
        if self.uploads_fail {
            anyhow::bail!("no shared context available for {}", self.objects.context_id);
        }
        Ok(Box::new(RecordingUploads {
            objects: self.objects.clone(),
        }))
    }
}

struct RecordingExecution<'a> {
    objects: &'a Objects,
    bindings: Bindings,
    /// Window targets to present at finish.
    touched: Vec<Target>,
}

impl ExecutionContext for RecordingExecution<'_> {
    fn context_id(&self) -> ContextId {
        self.objects.context_id
    }

    fn set_target(&mut self, target: &Target) {
        if !self.bindings.set_target(target) {
            return;
        }

        let objects = self.objects;
        objects.log.push(Call::SetTarget(target.id()));
        target
            .user_data()
            .get_or_insert_with(objects.context_id, || {
                objects.log.push(Call::CreateSurface(target.id()));
                RecordedSurface {
                    target: target.id(),
                    log: objects.log.clone(),
                }
            });

        if target.is_window() && !self.touched.contains(target) {
            self.touched.push(target.clone());
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.objects.log.push(Call::SetViewport(viewport));
        self.bindings.set_viewport(viewport);
    }

    fn clear_color(&mut self, color: Color) {
        self.objects.log.push(Call::ClearColor(color));
    }

    fn clear_depth(&mut self, depth: f32) {
        self.objects.log.push(Call::ClearDepth(depth));
    }

    fn load_array(&mut self, array: &Array, data: &ArrayData) {
        self.objects.write_array(array, data);
    }

    fn load_texture(&mut self, texture: &Texture, data: &TextureData) {
        self.objects.write_texture(texture, data);
    }

    fn load_shader(&mut self, shader: &Shader, source: &ShaderSource) {
        self.objects.compile(shader, source);
    }

    fn set_shader(&mut self, shader: &Shader) {
        self.objects.log.push(Call::SetShader(shader.id()));
        self.bindings.set_shader(shader);
    }

    fn attach_array(&mut self, binding: &ArrayBinding) {
        self.objects.log.push(Call::AttachArray {
            array: binding.array.id(),
            attribute: binding.attribute.clone(),
        });
        self.bindings.attach_array(binding);
    }

    fn attach_texture(&mut self, binding: &TextureBinding) {
        self.objects.log.push(Call::AttachTexture {
            texture: binding.texture.id(),
            slot: binding.slot,
        });
        self.bindings.attach_texture(binding);
    }

    fn draw(&mut self, mode: PrimitiveMode, vertices: Range<u32>) {
        let Some(target) = self.bindings.target() else {
            log::debug!("draw without a target; skipped");
            return;
        };
        let (width, height) = target.size();
        if width == 0 || height == 0 || vertices.is_empty() {
            return;
        }
        let Some(shader) = self.bindings.shader().cloned() else {
            log::debug!("draw without a shader; skipped");
            return;
        };

        let objects = self.objects;
        for binding in self.bindings.arrays() {
            if !objects.resolve_array(&binding.array) {
                log::debug!("array {:?} was never uploaded; draw skipped", binding.array);
                return;
            }
        }
        for binding in self.bindings.textures() {
            if !objects.resolve_texture(&binding.texture) {
                log::debug!("texture {:?} was never uploaded; draw skipped", binding.texture);
                return;
            }
        }
        if !objects.resolve_program(&shader) {
            log::debug!("shader {shader:?} is not ready; draw skipped");
            return;
        }

        objects.log.push(Call::Draw {
            shader: shader.id(),
            mode,
            vertices,
        });
    }

    fn finish(&mut self) {
        for target in self.touched.drain(..) {
            self.objects.log.push(Call::Present(target.id()));
        }
        self.objects.log.push(Call::Finish);
    }
}

/// Worker-side half of a [`RecordingBackend`].
struct RecordingUploads {
    objects: Objects,
}

impl UploadContext for RecordingUploads {
    fn context_id(&self) -> ContextId {
        self.objects.context_id
    }

    fn upload_array(&mut self, array: &Array, data: &ArrayData) -> UploadOutcome {
        self.objects.write_array(array, data);
        Ok(())
    }

    fn upload_texture(&mut self, texture: &Texture, data: &TextureData) -> UploadOutcome {
        self.objects.write_texture(texture, data);
        Ok(())
    }

    fn fence(&mut self, _timeout: Duration) -> UploadOutcome {
        self.objects.log.push(Call::Fence);
        Ok(())
    }
}
