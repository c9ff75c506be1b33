use bytemuck::Pod;

/// Errors raised while building upload payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("texture payload is {actual} bytes, {width}x{height} {format:?} needs {expected}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("texture dimensions must be non-zero (got {width}x{height})")]
    EmptyTexture { width: u32, height: u32 },
}

/// CPU-side bytes destined for an [`Array`](super::Array).
///
/// The payload is opaque to the engine; attribute interpretation comes from
/// the [`ArrayBinding`](crate::pipeline::ArrayBinding) that reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayData {
    bytes: Vec<u8>,
}

impl ArrayData {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Copies a slice of plain-old-data values (e.g. `[f32; 3]` vertices).
    pub fn from_pod<T: Pod>(values: &[T]) -> Self {
        Self {
            bytes: bytemuck::cast_slice(values).to_vec(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Texel layout of a [`TextureData`] payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R8Unorm,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::Rgba8Unorm
            | PixelFormat::Rgba8UnormSrgb
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Bgra8UnormSrgb => 4,
        }
    }
}

/// CPU-side texels destined for a [`Texture`](super::Texture).
///
/// Rows are tightly packed, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    width: u32,
    height: u32,
    format: PixelFormat,
    bytes: Vec<u8>,
}

impl TextureData {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<Self, DataError> {
        if width == 0 || height == 0 {
            return Err(DataError::EmptyTexture { width, height });
        }

        let bytes = bytes.into();
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if bytes.len() != expected {
            return Err(DataError::SizeMismatch {
                width,
                height,
                format,
                expected,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            width,
            height,
            format,
            bytes,
        })
    }

    pub fn from_pod<T: Pod>(
        width: u32,
        height: u32,
        format: PixelFormat,
        texels: &[T],
    ) -> Result<Self, DataError> {
        Self::new(width, height, format, bytemuck::cast_slice(texels).to_vec())
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per texel row.
    #[inline]
    pub fn row_pitch(&self) -> u32 {
        self.width * self.format.bytes_per_pixel() as u32
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// WGSL source for both program stages.
///
/// Stages may live in separate modules or in one module containing both
/// entry points; each module must declare exactly one entry point for its
/// stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

impl ShaderSource {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    /// Both stages in a single module.
    pub fn combined(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            vertex: source.clone(),
            fragment: source,
        }
    }

    pub fn is_combined(&self) -> bool {
        self.vertex == self.fragment
    }
}
