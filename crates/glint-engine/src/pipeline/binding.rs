use std::ops::Range;

use crate::resource::{Array, Shader, Texture};

/// How vertices are assembled into primitives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

/// Component layout of one vertex attribute.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Unorm8x4,
}

impl VertexFormat {
    /// Size of one attribute value in bytes.
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 | VertexFormat::Unorm8x4 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Feeds one named shader attribute from an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayBinding {
    pub array: Array,
    pub attribute: String,
    pub format: VertexFormat,
    /// Bytes between consecutive vertices; `0` means tightly packed.
    pub stride: u32,
    /// Byte offset of the first value inside each vertex.
    pub offset: u32,
}

impl ArrayBinding {
    pub fn new(array: Array, attribute: impl Into<String>, format: VertexFormat) -> Self {
        Self {
            array,
            attribute: attribute.into(),
            format,
            stride: 0,
            offset: 0,
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Stride with the tightly-packed case resolved.
    pub fn effective_stride(&self) -> u32 {
        if self.stride == 0 {
            self.format.size()
        } else {
            self.stride
        }
    }
}

/// Binds a texture to a numbered sampler slot of the current shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBinding {
    pub texture: Texture,
    pub slot: u32,
}

impl TextureBinding {
    pub fn new(texture: Texture, slot: u32) -> Self {
        Self { texture, slot }
    }
}

/// Payload of a draw operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawOp {
    pub shader: Shader,
    pub arrays: Vec<ArrayBinding>,
    pub textures: Vec<TextureBinding>,
    pub mode: PrimitiveMode,
    pub first: u32,
    pub count: u32,
}

impl DrawOp {
    pub fn new(shader: Shader, mode: PrimitiveMode, count: u32) -> Self {
        Self {
            shader,
            arrays: Vec::new(),
            textures: Vec::new(),
            mode,
            first: 0,
            count,
        }
    }

    pub fn with_array(mut self, binding: ArrayBinding) -> Self {
        self.arrays.push(binding);
        self
    }

    pub fn with_texture(mut self, texture: Texture, slot: u32) -> Self {
        self.textures.push(TextureBinding::new(texture, slot));
        self
    }

    pub fn with_first(mut self, first: u32) -> Self {
        self.first = first;
        self
    }

    #[inline]
    pub fn vertices(&self) -> Range<u32> {
        self.first..self.first.saturating_add(self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_stride_means_packed() {
        let b = ArrayBinding::new(Array::new(), "position", VertexFormat::Float32x3);
        assert_eq!(b.effective_stride(), 12);
        assert_eq!(b.with_stride(24).effective_stride(), 24);
    }

    #[test]
    fn vertices_range_starts_at_first() {
        let d = DrawOp::new(Shader::new(), PrimitiveMode::Triangles, 3).with_first(6);
        assert_eq!(d.vertices(), 6..9);
    }
}
