//! GPU objects bound to resource handles.
//!
//! Everything here is reachable from both the owning thread and the upload
//! worker, so it lives behind the handle's `UserData` lock and internal
//! mutexes.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::pipeline::{PrimitiveMode, VertexFormat};
use crate::resource::{Array, ArrayData, ContextId, PixelFormat, Texture, TextureData};

/// Buffer sizes are rounded up to this so `write_buffer` always accepts them.
pub(crate) fn aligned_size(len: usize) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    (len as u64).div_ceil(align).max(1) * align
}

struct BufferSlot {
    buffer: wgpu::Buffer,
    capacity: u64,
}

fn create_buffer(device: &wgpu::Device, label: Option<&str>, capacity: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label,
        size: capacity,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Vertex buffer of one array in one context.
///
/// Grows in place: a larger upload replaces the wgpu buffer but the handle
/// keeps a single `GpuArray`.
pub(crate) struct GpuArray {
    slot: Mutex<BufferSlot>,
}

impl GpuArray {
    fn lock(&self) -> MutexGuard<'_, BufferSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn buffer(&self) -> wgpu::Buffer {
        self.lock().buffer.clone()
    }

    fn with_data(device: &wgpu::Device, queue: &wgpu::Queue, array: &Array, data: &ArrayData) -> Self {
        let capacity = aligned_size(data.len());
        log::debug!("creating buffer for {array:?} ({capacity} bytes)");

        let slot = BufferSlot {
            buffer: create_buffer(device, array.label(), capacity),
            capacity,
        };
        write_padded(queue, &slot, data);

        Self {
            slot: Mutex::new(slot),
        }
    }

    fn write(&self, device: &wgpu::Device, queue: &wgpu::Queue, array: &Array, data: &ArrayData) {
        let capacity = aligned_size(data.len());
        let mut slot = self.lock();
        if slot.capacity < capacity {
            log::debug!("growing buffer for {array:?} to {capacity} bytes");
            slot.buffer = create_buffer(device, array.label(), capacity);
            slot.capacity = capacity;
        }
        write_padded(queue, &slot, data);
    }
}

fn write_padded(queue: &wgpu::Queue, slot: &BufferSlot, data: &ArrayData) {
    if data.is_empty() {
        return;
    }

    let bytes = data.as_bytes();
    let padded_len = aligned_size(bytes.len());
    if bytes.len() as u64 == padded_len {
        queue.write_buffer(&slot.buffer, 0, bytes);
    } else {
        let mut padded = bytes.to_vec();
        padded.resize(padded_len as usize, 0);
        queue.write_buffer(&slot.buffer, 0, &padded);
    }
}

/// Creates the array's buffer on first use and writes `data` into it.
pub(crate) fn write_array(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    ctx: ContextId,
    array: &Array,
    data: &ArrayData,
) {
    let mut created = false;
    let gpu = array.user_data().get_or_insert_with(ctx, || {
        created = true;
        GpuArray::with_data(device, queue, array, data)
    });
    if !created {
        gpu.write(device, queue, array, data);
    }
}

/// Buffer of `array` in `ctx`, created from the handle's contents if none
/// exists yet.
///
/// Contents are written only by whoever creates the buffer, so they never
/// overwrite an upload that bound the handle first.
pub(crate) fn bind_array_contents(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    ctx: ContextId,
    array: &Array,
) -> Option<wgpu::Buffer> {
    array
        .user_data()
        .get_or_try_insert_with(ctx, || {
            let data = array.contents().ok_or(())?;
            Ok::<_, ()>(GpuArray::with_data(device, queue, array, &data))
        })
        .ok()
        .map(|gpu| gpu.buffer())
}

pub(crate) fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
    }
}

pub(crate) fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

pub(crate) fn topology(mode: PrimitiveMode) -> wgpu::PrimitiveTopology {
    match mode {
        PrimitiveMode::Points => wgpu::PrimitiveTopology::PointList,
        PrimitiveMode::Lines => wgpu::PrimitiveTopology::LineList,
        PrimitiveMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

/// Current texture, view and extent of a texture handle.
#[derive(Clone)]
pub(crate) struct TextureSlot {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

/// Texture of one handle in one context. Recreated in place when the extent
/// or format changes.
pub(crate) struct GpuTexture {
    slot: Mutex<TextureSlot>,
}

impl GpuTexture {
    pub(crate) fn slot(&self) -> TextureSlot {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn create_texture(
    device: &wgpu::Device,
    label: Option<&str>,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> TextureSlot {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label,
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    TextureSlot {
        texture,
        view,
        width,
        height,
        format,
    }
}

/// Binds `texture` with the given extent, recreating it if it differs.
pub(crate) fn ensure_texture(
    device: &wgpu::Device,
    ctx: ContextId,
    texture: &Texture,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> TextureSlot {
    let gpu = texture.user_data().get_or_insert_with(ctx, || {
        log::debug!("creating texture for {texture:?} ({width}x{height} {format:?})");
        GpuTexture {
            slot: Mutex::new(create_texture(device, texture.label(), width, height, format)),
        }
    });

    let mut slot = gpu.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.width != width || slot.height != height || slot.format != format {
        log::debug!("recreating texture for {texture:?} at {width}x{height} {format:?}");
        *slot = create_texture(device, texture.label(), width, height, format);
    }
    slot.clone()
}

pub(crate) fn write_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    ctx: ContextId,
    texture: &Texture,
    data: &TextureData,
) {
    let slot = ensure_texture(
        device,
        ctx,
        texture,
        data.width(),
        data.height(),
        texture_format(data.format()),
    );
    write_texels(queue, &slot, data);
}

/// Texture of `texture` in `ctx`, created from the handle's contents if none
/// exists yet. Same rule as [`bind_array_contents`].
pub(crate) fn bind_texture_contents(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    ctx: ContextId,
    texture: &Texture,
) -> Option<TextureSlot> {
    texture
        .user_data()
        .get_or_try_insert_with(ctx, || {
            let data = texture.contents().ok_or(())?;
            log::debug!(
                "creating texture for {texture:?} from contents ({}x{})",
                data.width(),
                data.height()
            );
            let slot = create_texture(
                device,
                texture.label(),
                data.width(),
                data.height(),
                texture_format(data.format()),
            );
            write_texels(queue, &slot, &data);
            Ok::<_, ()>(GpuTexture {
                slot: Mutex::new(slot),
            })
        })
        .ok()
        .map(|gpu| gpu.slot())
}

fn write_texels(queue: &wgpu::Queue, slot: &TextureSlot, data: &TextureData) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &slot.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data.as_bytes(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(data.row_pitch()),
            rows_per_image: Some(data.height()),
        },
        wgpu::Extent3d {
            width: data.width(),
            height: data.height(),
            depth_or_array_layers: 1,
        },
    );
}

/// Depth attachment of one target.
pub(crate) struct DepthBuffer {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl DepthBuffer {
    pub(crate) fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("glint depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: super::shader::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes_are_copy_aligned() {
        assert_eq!(aligned_size(0), 4);
        assert_eq!(aligned_size(1), 4);
        assert_eq!(aligned_size(4), 4);
        assert_eq!(aligned_size(6), 8);
        assert_eq!(aligned_size(24), 24);
    }

    #[test]
    fn strips_keep_their_topology() {
        assert_eq!(
            topology(PrimitiveMode::TriangleStrip),
            wgpu::PrimitiveTopology::TriangleStrip
        );
        assert_eq!(topology(PrimitiveMode::Points), wgpu::PrimitiveTopology::PointList);
        assert_eq!(topology(PrimitiveMode::default()), wgpu::PrimitiveTopology::TriangleList);
    }

    #[test]
    fn vertex_formats_match_sizes() {
        for format in [
            VertexFormat::Float32,
            VertexFormat::Float32x2,
            VertexFormat::Float32x3,
            VertexFormat::Float32x4,
            VertexFormat::Uint32,
            VertexFormat::Unorm8x4,
        ] {
            assert_eq!(vertex_format(format).size(), u64::from(format.size()));
        }
    }
}
