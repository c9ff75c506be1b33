use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::coords::{Color, Viewport};
use crate::resource::{Array, ArrayData, Shader, ShaderSource, Texture, TextureData};
use crate::target::Target;

use super::{DrawOp, ExecutionContext, Pipeline};

/// Sub-pipelines nested deeper than this are skipped.
pub(crate) const MAX_NESTING: usize = 16;

/// Payload of an [`Operation`].
///
/// Extending the engine:
/// - add a variant here
/// - dispatch it in `Operation::execute_nested`
/// - add the backend call it needs to `ExecutionContext`
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    Clear {
        color: Option<Color>,
        depth: Option<f32>,
    },
    Viewport(Viewport),
    TargetFocus(Target),
    LoadArray {
        array: Array,
        data: ArrayData,
    },
    LoadTexture {
        texture: Texture,
        data: TextureData,
    },
    LoadShader {
        shader: Shader,
        source: ShaderSource,
    },
    Draw(DrawOp),
    SubPipeline(Pipeline),
}

/// Shared handle to one pipeline step.
///
/// The same operation may sit in several pipelines. Callers keep a clone to
/// update parameters between executions (e.g. an animated vertex count).
#[derive(Clone)]
pub struct Operation {
    kind: Rc<RefCell<OperationKind>>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind: Rc::new(RefCell::new(kind)),
        }
    }

    pub fn clear(color: Color) -> Self {
        Self::new(OperationKind::Clear {
            color: Some(color),
            depth: None,
        })
    }

    pub fn clear_with(color: Option<Color>, depth: Option<f32>) -> Self {
        Self::new(OperationKind::Clear { color, depth })
    }

    pub fn viewport(viewport: Viewport) -> Self {
        Self::new(OperationKind::Viewport(viewport))
    }

    pub fn target_focus(target: Target) -> Self {
        Self::new(OperationKind::TargetFocus(target))
    }

    pub fn load_array(array: Array, data: ArrayData) -> Self {
        Self::new(OperationKind::LoadArray { array, data })
    }

    pub fn load_texture(texture: Texture, data: TextureData) -> Self {
        Self::new(OperationKind::LoadTexture { texture, data })
    }

    pub fn load_shader(shader: Shader, source: ShaderSource) -> Self {
        Self::new(OperationKind::LoadShader { shader, source })
    }

    pub fn draw(draw: DrawOp) -> Self {
        Self::new(OperationKind::Draw(draw))
    }

    pub fn sub_pipeline(pipeline: Pipeline) -> Self {
        Self::new(OperationKind::SubPipeline(pipeline))
    }

    /// Borrows the payload.
    ///
    /// # Panics
    /// Panics if called from inside [`update`](Self::update) on the same operation.
    pub fn kind(&self) -> Ref<'_, OperationKind> {
        self.kind.borrow()
    }

    /// Mutates the payload in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut OperationKind) -> R) -> R {
        f(&mut self.kind.borrow_mut())
    }

    /// Sets the vertex count of a draw. Returns `false` for other kinds.
    pub fn set_vertex_count(&self, count: u32) -> bool {
        self.update(|kind| match kind {
            OperationKind::Draw(draw) => {
                draw.count = count;
                true
            }
            _ => false,
        })
    }

    /// Sets first vertex and count of a draw. Returns `false` for other kinds.
    pub fn set_vertex_range(&self, first: u32, count: u32) -> bool {
        self.update(|kind| match kind {
            OperationKind::Draw(draw) => {
                draw.first = first;
                draw.count = count;
                true
            }
            _ => false,
        })
    }

    /// Sets the colour of a clear. Returns `false` for other kinds.
    pub fn set_clear_color(&self, color: Color) -> bool {
        self.update(|kind| match kind {
            OperationKind::Clear { color: c, .. } => {
                *c = Some(color);
                true
            }
            _ => false,
        })
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.kind, &other.kind)
    }

    /// Dispatches this operation into `exec`.
    pub fn execute(&self, exec: &mut dyn ExecutionContext) {
        self.execute_nested(exec, 0);
    }

    pub(crate) fn execute_nested(&self, exec: &mut dyn ExecutionContext, depth: usize) {
        let kind = self.kind.borrow();

        match &*kind {
            OperationKind::Clear { color, depth } => {
                if let Some(color) = color {
                    exec.clear_color(*color);
                }
                if let Some(depth) = depth {
                    exec.clear_depth(*depth);
                }
            }

            OperationKind::Viewport(viewport) => exec.set_viewport(*viewport),

            OperationKind::TargetFocus(target) => exec.set_target(target),

            OperationKind::LoadArray { array, data } => exec.load_array(array, data),

            OperationKind::LoadTexture { texture, data } => exec.load_texture(texture, data),

            OperationKind::LoadShader { shader, source } => exec.load_shader(shader, source),

            OperationKind::Draw(draw) => {
                exec.set_shader(&draw.shader);
                for binding in &draw.arrays {
                    exec.attach_array(binding);
                }
                for binding in &draw.textures {
                    exec.attach_texture(binding);
                }
                exec.draw(draw.mode, draw.vertices());
            }

            OperationKind::SubPipeline(pipeline) => {
                if depth >= MAX_NESTING {
                    log::warn!(
                        "sub-pipeline {} nested deeper than {MAX_NESTING}; skipped",
                        pipeline.id()
                    );
                    return;
                }
                if pipeline.context_id() != exec.context_id() {
                    log::warn!(
                        "sub-pipeline {} belongs to {}, executing in {}; skipped",
                        pipeline.id(),
                        pipeline.context_id(),
                        exec.context_id()
                    );
                    return;
                }
                pipeline.dispatch(exec, depth + 1);
            }
        }
    }
}

/// Structural equality: the same handle, or payloads that compare equal.
impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.kind.borrow() == *other.kind.borrow()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind.try_borrow() {
            Ok(kind) => fmt::Debug::fmt(&*kind, f),
            Err(_) => f.write_str("Operation(<updating>)"),
        }
    }
}
