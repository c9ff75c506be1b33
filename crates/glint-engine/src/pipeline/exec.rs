use std::ops::Range;

use crate::coords::{Color, Viewport};
use crate::resource::{Array, ArrayData, ContextId, Shader, ShaderSource, Texture, TextureData};
use crate::target::Target;

use super::{ArrayBinding, PrimitiveMode, TextureBinding};

/// Per-`execute()` backend state machine that operations are dispatched to.
///
/// One instance is created by [`Backend::begin_execution`](crate::backend::Backend::begin_execution)
/// for every pipeline execution and dropped right after [`finish`](Self::finish).
/// Nothing here reports errors: a call whose dependencies are not ready is
/// logged and skipped, and the remaining operations still run.
pub trait ExecutionContext {
    /// Context whose GPU namespace this execution binds into.
    fn context_id(&self) -> ContextId;

    /// Makes `target` current. Surface state is created on first use and cached
    /// on the target.
    fn set_target(&mut self, target: &Target);

    /// Restricts subsequent draws on the current target. Reset by `set_target`.
    fn set_viewport(&mut self, viewport: Viewport);

    fn clear_color(&mut self, color: Color);

    fn clear_depth(&mut self, depth: f32);

    /// Uploads `data`, creating the array's buffer on first use.
    fn load_array(&mut self, array: &Array, data: &ArrayData);

    /// Uploads `data`, creating the texture on first use.
    fn load_texture(&mut self, texture: &Texture, data: &TextureData);

    /// Compiles and links `source`. On failure the shader stays unbound.
    fn load_shader(&mut self, shader: &Shader, source: &ShaderSource);

    /// Records `shader` as current for this execution only and drops every
    /// attachment made so far.
    fn set_shader(&mut self, shader: &Shader);

    /// Binds an array to a named attribute of the current shader.
    fn attach_array(&mut self, binding: &ArrayBinding);

    fn attach_texture(&mut self, binding: &TextureBinding);

    /// Draws `vertices` with the current shader and attachments.
    fn draw(&mut self, mode: PrimitiveMode, vertices: Range<u32>);

    /// Flushes recorded work and presents window targets touched by this
    /// execution.
    fn finish(&mut self);
}

/// Cross-operation state of one execution.
///
/// This is the only state that survives from one operation to the next, and
/// it never outlives the execution, so pipelines that share resources cannot
/// observe each other's binds.
#[derive(Debug, Default)]
pub struct Bindings {
    target: Option<Target>,
    viewport: Option<Viewport>,
    shader: Option<Shader>,
    arrays: Vec<ArrayBinding>,
    textures: Vec<TextureBinding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the current target changed.
    pub fn set_target(&mut self, target: &Target) -> bool {
        if self.target.as_ref() == Some(target) {
            return false;
        }
        self.target = Some(target.clone());
        self.viewport = None;
        true
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Starts a fresh set of attachments, even for the current shader: every
    /// draw binds exactly the arrays and textures it names.
    pub fn set_shader(&mut self, shader: &Shader) {
        self.arrays.clear();
        self.textures.clear();
        self.shader = Some(shader.clone());
    }

    pub fn shader(&self) -> Option<&Shader> {
        self.shader.as_ref()
    }

    /// Re-attaching an attribute replaces the previous binding.
    pub fn attach_array(&mut self, binding: &ArrayBinding) {
        match self
            .arrays
            .iter_mut()
            .find(|b| b.attribute == binding.attribute)
        {
            Some(existing) => *existing = binding.clone(),
            None => self.arrays.push(binding.clone()),
        }
    }

    pub fn attach_texture(&mut self, binding: &TextureBinding) {
        match self.textures.iter_mut().find(|b| b.slot == binding.slot) {
            Some(existing) => *existing = binding.clone(),
            None => self.textures.push(binding.clone()),
        }
    }

    pub fn arrays(&self) -> &[ArrayBinding] {
        &self.arrays
    }

    pub fn textures(&self) -> &[TextureBinding] {
        &self.textures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::VertexFormat;

    #[test]
    fn shader_switch_drops_attachments() {
        let mut b = Bindings::new();
        let s1 = Shader::new();
        let s2 = Shader::new();

        b.set_shader(&s1);
        b.attach_array(&ArrayBinding::new(Array::new(), "pos", VertexFormat::Float32x2));
        assert_eq!(b.arrays().len(), 1);

        b.set_shader(&s2);
        assert!(b.arrays().is_empty());
    }

    #[test]
    fn same_shader_does_not_inherit_attachments() {
        let mut b = Bindings::new();
        let shader = Shader::new();

        b.set_shader(&shader);
        b.attach_array(&ArrayBinding::new(Array::new(), "pos", VertexFormat::Float32x2));
        b.attach_texture(&TextureBinding::new(Texture::new(), 0));

        b.set_shader(&shader);
        assert!(b.arrays().is_empty());
        assert!(b.textures().is_empty());
        assert_eq!(b.shader(), Some(&shader));
    }

    #[test]
    fn reattaching_attribute_replaces() {
        let mut b = Bindings::new();
        let first = Array::new();
        let second = Array::new();

        b.attach_array(&ArrayBinding::new(first, "pos", VertexFormat::Float32x2));
        b.attach_array(&ArrayBinding::new(second.clone(), "pos", VertexFormat::Float32x2));

        assert_eq!(b.arrays().len(), 1);
        assert_eq!(b.arrays()[0].array, second);
    }
}
