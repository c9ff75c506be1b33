use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use crate::backend::Backend;
use crate::coords::{Color, Viewport};
use crate::pipeline::{ArrayBinding, Bindings, ExecutionContext, PrimitiveMode, TextureBinding};
use crate::resource::{
    Array, ArrayData, ContextId, Shader, ShaderSource, Texture, TextureData,
};
use crate::target::{Target, TargetKind};

use super::objects::{self, DepthBuffer, TextureSlot};
use super::scope;
use super::shader::{PipelineKey, Program, ProgramState, VertexSlot};
use super::surface::SurfaceState;
use super::{SurfaceErrorAction, WgpuBackend};

/// Backend state attached to a target.
struct TargetState {
    /// `None` for offscreen targets.
    surface: Option<SurfaceState>,
    depth: Mutex<Option<DepthBuffer>>,
}

impl TargetState {
    fn new(backend: &WgpuBackend, target: &Target) -> Result<Self> {
        let surface = match target.kind() {
            TargetKind::Window(window) => Some(SurfaceState::new(
                backend.instance(),
                backend.adapter(),
                backend.device(),
                window.clone(),
                backend.init(),
            )?),
            TargetKind::Offscreen { .. } => None,
        };

        Ok(Self {
            surface,
            depth: Mutex::new(None),
        })
    }

    fn depth_view(&self, device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        let mut depth = self.depth.lock().unwrap_or_else(PoisonError::into_inner);
        match depth.as_ref() {
            Some(d) if d.width == width && d.height == height => d.view.clone(),
            _ => {
                let d = DepthBuffer::new(device, width, height);
                let view = d.view.clone();
                *depth = Some(d);
                view
            }
        }
    }
}

/// Attachments of the current target.
struct Frame {
    color: wgpu::TextureView,
    depth: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

fn wgpu_color(c: Color) -> wgpu::Color {
    wgpu::Color {
        r: c.r as f64,
        g: c.g as f64,
        b: c.b as f64,
        a: c.a as f64,
    }
}

/// One `execute()` against a [`WgpuBackend`].
///
/// Records into a single command encoder. Each draw gets its own render pass
/// that loads the target, or clears it if a clear is pending. Work is
/// submitted and surfaces presented in [`finish`](ExecutionContext::finish).
pub(crate) struct WgpuExecution<'a> {
    backend: &'a WgpuBackend,
    bindings: Bindings,
    /// Taken by `finish`.
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<Frame>,
    clear_color: Option<wgpu::Color>,
    clear_depth: Option<f32>,
    /// Swapchain textures acquired by this execution, presented at finish.
    presents: Vec<(Target, wgpu::SurfaceTexture)>,
}

impl<'a> WgpuExecution<'a> {
    pub(crate) fn new(backend: &'a WgpuBackend) -> Self {
        let encoder = backend
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("glint execution encoder"),
            });

        Self {
            backend,
            bindings: Bindings::new(),
            encoder: Some(encoder),
            frame: None,
            clear_color: None,
            clear_depth: None,
            presents: Vec::new(),
        }
    }

    fn ctx(&self) -> ContextId {
        self.backend.context_id()
    }

    /// Resolves color and depth attachments of `target`, acquiring a swapchain
    /// texture for windows.
    fn resolve_frame(&mut self, target: &Target) -> Option<Frame> {
        let (width, height) = target.size();
        if width == 0 || height == 0 {
            log::debug!("target {} has zero size; draws skipped", target.id());
            return None;
        }

        let backend = self.backend;
        let device = backend.device();
        let state = target
            .user_data()
            .get_or_try_insert_with(self.ctx(), || TargetState::new(backend, target));
        let state = match state {
            Ok(state) => state,
            Err(err) => {
                log::error!("target {} cannot be rendered: {err:#}", target.id());
                return None;
            }
        };

        let (color, format) = match target.kind() {
            TargetKind::Window(_) => {
                let surface = state.surface.as_ref()?;
                let view = match self.presents.iter().find(|(t, _)| t == target) {
                    Some((_, acquired)) => acquired.texture.create_view(&Default::default()),
                    None => {
                        if !surface.ensure_size(device, width, height) {
                            return None;
                        }
                        let acquired = surface.acquire(device).or_else(|action| match action {
                            SurfaceErrorAction::Reconfigured => surface.acquire(device),
                            other => Err(other),
                        });
                        let acquired = match acquired {
                            Ok(acquired) => acquired,
                            Err(SurfaceErrorAction::Fatal) => {
                                log::error!("surface of target {} is unusable", target.id());
                                return None;
                            }
                            Err(action) => {
                                log::debug!("target {}: {action:?}", target.id());
                                return None;
                            }
                        };
                        let view = acquired.texture.create_view(&Default::default());
                        self.presents.push((target.clone(), acquired));
                        view
                    }
                };
                (view, surface.format())
            }
            TargetKind::Offscreen {
                texture,
                format: pixel_format,
            } => {
                let TextureSlot { view, format, .. } = objects::ensure_texture(
                    device,
                    self.ctx(),
                    texture,
                    width,
                    height,
                    objects::texture_format(*pixel_format),
                );
                (view, format)
            }
        };

        Some(Frame {
            color,
            depth: state.depth_view(device, width, height),
            format,
            width,
            height,
        })
    }

    /// Records a clear-only pass for clears no draw has consumed.
    fn flush_clears(&mut self) {
        if self.clear_color.is_none() && self.clear_depth.is_none() {
            return;
        }
        let color = self.clear_color.take();
        let depth = self.clear_depth.take();
        let (Some(frame), Some(encoder)) = (self.frame.as_ref(), self.encoder.as_mut()) else {
            return;
        };

        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("glint clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &frame.depth,
                depth_ops: Some(wgpu::Operations {
                    load: depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }

    /// Buffer of `array` in this context, bound from its contents if nothing
    /// uploaded it yet.
    fn resolve_array(&self, array: &Array) -> Option<wgpu::Buffer> {
        objects::bind_array_contents(self.backend.device(), self.backend.queue(), self.ctx(), array)
    }

    fn resolve_texture(&self, texture: &Texture) -> Option<TextureSlot> {
        objects::bind_texture_contents(
            self.backend.device(),
            self.backend.queue(),
            self.ctx(),
            texture,
        )
    }

    fn resolve_program(&self, shader: &Shader) -> Option<Arc<ProgramState>> {
        if let Some(state) = shader.user_data().get::<ProgramState>(self.ctx()) {
            return Some(state);
        }
        let source = shader.contents()?;
        Some(self.compile(shader, &source))
    }

    fn compile(&self, shader: &Shader, source: &ShaderSource) -> Arc<ProgramState> {
        let state = match Program::new(self.backend.device(), shader.label(), source) {
            Ok(program) => {
                log::debug!("shader {shader:?} linked");
                ProgramState::Ready(program)
            }
            Err(err) => {
                log::warn!("shader {shader:?}: {err}");
                ProgramState::Failed
            }
        };
        shader.user_data().replace(self.ctx(), state)
    }

    /// Bind group 0 for the draw's textures. `Ok(None)` when the shader
    /// declares no bindings.
    fn texture_bind_group(
        &self,
        program: &Program,
        pipeline: &wgpu::RenderPipeline,
        textures: &[(u32, TextureSlot)],
    ) -> Result<Option<wgpu::BindGroup>, wgpu::Error> {
        let mut entries = Vec::new();
        for (slot, texture) in textures {
            if program.has_binding(2 * slot) {
                entries.push(wgpu::BindGroupEntry {
                    binding: 2 * slot,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                });
            }
            if program.has_binding(2 * slot + 1) {
                entries.push(wgpu::BindGroupEntry {
                    binding: 2 * slot + 1,
                    resource: wgpu::BindingResource::Sampler(self.backend.sampler()),
                });
            }
        }
        if entries.is_empty() {
            return Ok(None);
        }

        let device = self.backend.device();
        let (bind_group, error) = scope::capture(device, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("glint texture bind group"),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            })
        });
        match error {
            None => Ok(Some(bind_group)),
            Some(err) => Err(err),
        }
    }

    fn vertex_slots(&self, program: &Program, arrays: &[ArrayBinding]) -> Option<Vec<VertexSlot>> {
        arrays
            .iter()
            .map(|binding| {
                let Some(location) = program.location(&binding.attribute) else {
                    log::debug!("shader has no attribute {:?}; draw skipped", binding.attribute);
                    return None;
                };
                Some(VertexSlot {
                    stride: u64::from(binding.effective_stride()),
                    format: objects::vertex_format(binding.format),
                    offset: u64::from(binding.offset),
                    location,
                })
            })
            .collect()
    }
}

impl ExecutionContext for WgpuExecution<'_> {
    fn context_id(&self) -> ContextId {
        self.ctx()
    }

    fn set_target(&mut self, target: &Target) {
        if !self.bindings.set_target(target) {
            return;
        }
        self.flush_clears();
        self.frame = self.resolve_frame(target);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.bindings.set_viewport(viewport);
    }

    fn clear_color(&mut self, color: Color) {
        self.clear_color = Some(wgpu_color(color));
    }

    fn clear_depth(&mut self, depth: f32) {
        self.clear_depth = Some(depth.clamp(0.0, 1.0));
    }

    fn load_array(&mut self, array: &Array, data: &ArrayData) {
        objects::write_array(
            self.backend.device(),
            self.backend.queue(),
            self.ctx(),
            array,
            data,
        );
    }

    fn load_texture(&mut self, texture: &Texture, data: &TextureData) {
        objects::write_texture(
            self.backend.device(),
            self.backend.queue(),
            self.ctx(),
            texture,
            data,
        );
    }

    fn load_shader(&mut self, shader: &Shader, source: &ShaderSource) {
        self.compile(shader, source);
    }

    fn set_shader(&mut self, shader: &Shader) {
        self.bindings.set_shader(shader);
    }

    fn attach_array(&mut self, binding: &ArrayBinding) {
        self.bindings.attach_array(binding);
    }

    fn attach_texture(&mut self, binding: &TextureBinding) {
        self.bindings.attach_texture(binding);
    }

    fn draw(&mut self, mode: PrimitiveMode, vertices: Range<u32>) {
        if vertices.is_empty() {
            return;
        }
        let Some(shader) = self.bindings.shader().cloned() else {
            log::debug!("draw without a shader; skipped");
            return;
        };
        let Some((width, height, format)) = self.frame.as_ref().map(|f| (f.width, f.height, f.format))
        else {
            log::debug!("draw without a usable target; skipped");
            return;
        };

        let mut buffers = Vec::with_capacity(self.bindings.arrays().len());
        for binding in self.bindings.arrays() {
            let Some(buffer) = self.resolve_array(&binding.array) else {
                log::debug!("array {:?} was never uploaded; draw skipped", binding.array);
                return;
            };
            let last = u64::from(vertices.end - 1);
            let needed = last * u64::from(binding.effective_stride())
                + u64::from(binding.offset)
                + u64::from(binding.format.size());
            if needed > buffer.size() {
                log::debug!(
                    "array {:?} holds {} bytes, draw needs {needed}; skipped",
                    binding.array,
                    buffer.size()
                );
                return;
            }
            buffers.push(buffer);
        }

        let own_texture = self.bindings.target().and_then(Target::texture);
        let mut textures = Vec::with_capacity(self.bindings.textures().len());
        for binding in self.bindings.textures() {
            if own_texture == Some(&binding.texture) {
                log::debug!("texture {:?} is the current target; draw skipped", binding.texture);
                return;
            }
            let Some(slot) = self.resolve_texture(&binding.texture) else {
                log::debug!("texture {:?} was never uploaded; draw skipped", binding.texture);
                return;
            };
            textures.push((binding.slot, slot));
        }

        let Some(state) = self.resolve_program(&shader) else {
            log::debug!("shader {shader:?} was never loaded; draw skipped");
            return;
        };
        let ProgramState::Ready(program) = &*state else {
            return;
        };

        let slot_numbers: Vec<u32> = textures.iter().map(|(slot, _)| *slot).collect();
        if let Some(binding) = program.unbound_binding(&slot_numbers) {
            log::debug!("shader {shader:?} binding {binding} has no texture; draw skipped");
            return;
        }

        let Some(slots) = self.vertex_slots(program, self.bindings.arrays()) else {
            return;
        };

        let viewport = match self.bindings.viewport() {
            Some(v) => match v.clipped_to(width, height) {
                Some(v) => Some(v),
                None => return,
            },
            None => None,
        };

        let key = PipelineKey {
            color_format: format,
            topology: objects::topology(mode),
            slots,
        };
        let Some(pipeline) = program.pipeline(self.backend.device(), &key) else {
            return;
        };
        let bind_group = match self.texture_bind_group(program, &pipeline, &textures) {
            Ok(bind_group) => bind_group,
            Err(err) => {
                log::warn!("shader {shader:?}: textures cannot be bound, draw skipped: {err}");
                return;
            }
        };

        let color_load = self
            .clear_color
            .take()
            .map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);
        let depth_load = self
            .clear_depth
            .take()
            .map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);
        let (Some(frame), Some(encoder)) = (self.frame.as_ref(), self.encoder.as_mut()) else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("glint draw pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &frame.depth,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        pass.set_pipeline(&pipeline);
        if let Some(bind_group) = &bind_group {
            pass.set_bind_group(0, bind_group, &[]);
        }
        for (slot, buffer) in buffers.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }
        if let Some(v) = viewport {
            pass.set_viewport(v.x, v.y, v.width, v.height, 0.0, 1.0);
        }
        pass.draw(vertices, 0..1);
    }

    fn finish(&mut self) {
        self.flush_clears();

        let Some(encoder) = self.encoder.take() else {
            return;
        };
        self.backend.queue().submit(std::iter::once(encoder.finish()));

        for (target, acquired) in self.presents.drain(..) {
            if let Some(window) = target.window() {
                window.pre_present_notify();
            }
            acquired.present();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use crate::backend::UploadContext;
    use crate::device::BackendInit;
    use crate::pipeline::{DrawOp, Operation, VertexFormat};
    use crate::resource::PixelFormat;

    const WIDTH: u32 = 64;

    const FILL: &str = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0, 1.0, 0.0, 1.0);
}
"#;

    const SAMPLED: &str = r#"
@group(0) @binding(0) var tex: texture_2d<f32>;
@group(0) @binding(1) var samp: sampler;

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) p: vec4<f32>) -> @location(0) vec4<f32> {
    return textureSample(tex, samp, p.xy);
}
"#;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];

    /// `None` when this machine has no usable adapter.
    fn backend() -> Option<Rc<WgpuBackend>> {
        match pollster::block_on(WgpuBackend::new(BackendInit::default(), None)) {
            Ok(backend) => Some(Rc::new(backend)),
            Err(err) => {
                eprintln!("no GPU adapter, skipping: {err:#}");
                None
            }
        }
    }

    fn offscreen(backend: &Rc<WgpuBackend>) -> Target {
        let backend: Rc<dyn Backend> = backend.clone();
        Target::new(
            TargetKind::Offscreen {
                texture: Texture::new(),
                format: PixelFormat::Rgba8Unorm,
            },
            (WIDTH, 1),
            backend,
        )
    }

    fn clear_red() -> Operation {
        Operation::clear_with(Some(Color::new(1.0, 0.0, 0.0, 1.0)), Some(1.0))
    }

    /// Covers the whole target with one triangle.
    fn cover(shader: &str, format: VertexFormat) -> Operation {
        let vertices = Array::with_contents(ArrayData::from_pod(&[
            [-1.0f32, -1.0],
            [3.0, -1.0],
            [-1.0, 3.0],
        ]));
        Operation::draw(
            DrawOp::new(
                Shader::with_contents(ShaderSource::combined(shader)),
                PrimitiveMode::Triangles,
                3,
            )
            .with_array(ArrayBinding::new(vertices, "position", format).with_stride(8)),
        )
    }

    fn first_pixel(backend: &WgpuBackend, target: &Target) -> [u8; 4] {
        let texture = target.texture().expect("offscreen target");
        let slot = texture
            .user_data()
            .get::<objects::GpuTexture>(backend.context_id())
            .expect("target texture bound")
            .slot();
        let device = backend.device();

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: u64::from(WIDTH * 4),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&Default::default());
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &slot.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(WIDTH * 4),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: WIDTH,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        backend.queue().submit([encoder.finish()]);

        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, |r| r.expect("map readback"));
        device.poll(wgpu::PollType::wait_indefinitely()).unwrap();

        let bytes = readback.slice(..).get_mapped_range();
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    }

    #[test]
    fn pending_clear_is_flushed_at_finish() {
        let Some(backend) = backend() else { return };
        let target = offscreen(&backend);
        target.pipeline().add_operation(clear_red());

        target.redraw();

        assert_eq!(first_pixel(&backend, &target), RED);
    }

    #[test]
    fn draw_lands_on_cleared_target() {
        let Some(backend) = backend() else { return };
        let target = offscreen(&backend);
        target.pipeline().add_operation(clear_red());
        target
            .pipeline()
            .add_operation(cover(FILL, VertexFormat::Float32x2));

        target.redraw();

        assert_eq!(first_pixel(&backend, &target), GREEN);
    }

    #[test]
    fn rejected_pipeline_does_not_blank_the_frame() {
        let Some(backend) = backend() else { return };

        let cleared = offscreen(&backend);
        cleared.pipeline().add_operation(clear_red());
        cleared
            .pipeline()
            .add_operation(cover(FILL, VertexFormat::Uint32));
        cleared.redraw();
        cleared.redraw();
        assert_eq!(first_pixel(&backend, &cleared), RED);

        let followed = offscreen(&backend);
        followed.pipeline().add_operation(clear_red());
        followed
            .pipeline()
            .add_operation(cover(FILL, VertexFormat::Uint32));
        followed
            .pipeline()
            .add_operation(cover(FILL, VertexFormat::Float32x2));
        followed.redraw();
        assert_eq!(first_pixel(&backend, &followed), GREEN);
    }

    #[test]
    fn unbound_texture_binding_skips_only_that_draw() {
        let Some(backend) = backend() else { return };
        let target = offscreen(&backend);
        target.pipeline().add_operation(clear_red());
        target
            .pipeline()
            .add_operation(cover(SAMPLED, VertexFormat::Float32x2));

        target.redraw();

        assert_eq!(first_pixel(&backend, &target), RED);
    }

    #[test]
    fn lazy_contents_keep_an_existing_buffer() {
        let Some(backend) = backend() else { return };
        let array = Array::with_contents(ArrayData::from_pod(&[0.0f32; 2]));
        let mut uploads = backend.create_upload_context().unwrap();
        uploads
            .upload_array(&array, &ArrayData::from_pod(&[0.0f32; 16]))
            .unwrap();

        let exec = WgpuExecution::new(&backend);
        let buffer = exec.resolve_array(&array).expect("bound by the upload");

        assert_eq!(buffer.size(), objects::aligned_size(16 * 4));
    }
}
