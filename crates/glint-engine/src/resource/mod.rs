//! Resource handles and the CPU payloads uploaded into them.
//!
//! Handles are opaque and reference-counted. Nothing GPU-side exists for a
//! handle until a backend first binds it inside some context; the backend
//! object then lives in the handle's [`UserData`] slot for that context.

mod data;
mod handle;
mod ids;
mod user_data;

pub use data::{ArrayData, DataError, PixelFormat, ShaderSource, TextureData};
pub use handle::{Array, ArrayKind, Handle, ResourceKind, Shader, ShaderKind, Texture, TextureKind};
pub use ids::{ContextId, HandleId};
pub use user_data::UserData;
