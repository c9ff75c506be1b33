use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::backend::Backend;
use crate::resource::{ContextId, HandleId};
use crate::target::Target;

use super::{ExecutionContext, Operation};

struct PipelineInner {
    id: HandleId,
    backend: Rc<dyn Backend>,
    operations: RefCell<Vec<Operation>>,
}

/// Ordered list of operations bound to the context that created it.
///
/// Insertion order is execution order. Cloning yields another handle to the
/// same list.
///
/// Operations must not add or remove operations of the pipeline that is
/// executing them. Doing so is not undefined behavior: the running execution
/// works on a snapshot and the change applies from the next `execute()`.
#[derive(Clone)]
pub struct Pipeline {
    inner: Rc<PipelineInner>,
}

impl Pipeline {
    pub(crate) fn new(backend: Rc<dyn Backend>) -> Self {
        Self {
            inner: Rc::new(PipelineInner {
                id: HandleId::next(),
                backend,
                operations: RefCell::new(Vec::new()),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// Context this pipeline executes against.
    pub fn context_id(&self) -> ContextId {
        self.inner.backend.context_id()
    }

    /// Appends `op`; it runs after every operation already present.
    pub fn add_operation(&self, op: Operation) {
        self.inner.operations.borrow_mut().push(op);
    }

    /// Removes the first entry structurally equal to `op`.
    ///
    /// Returns `false` (and changes nothing) if there is none.
    pub fn remove_operation(&self, op: &Operation) -> bool {
        let mut ops = self.inner.operations.borrow_mut();
        match ops.iter().position(|o| o == op) {
            Some(pos) => {
                ops.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes every operation.
    pub fn clear(&self) {
        self.inner.operations.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.operations.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.operations.borrow().is_empty()
    }

    /// Snapshot of the operations in execution order.
    pub fn operations(&self) -> Vec<Operation> {
        self.inner.operations.borrow().clone()
    }

    /// Runs every operation in order inside a fresh execution context.
    ///
    /// An empty pipeline does not touch the backend at all.
    pub fn execute(&self) {
        self.run(None);
    }

    /// Like [`execute`](Self::execute) with `target` made current first.
    pub(crate) fn execute_on(&self, target: &Target) {
        self.run(Some(target));
    }

    fn run(&self, focus: Option<&Target>) {
        if self.is_empty() {
            return;
        }

        let mut exec = self.inner.backend.begin_execution();
        if let Some(target) = focus {
            exec.set_target(target);
        }

        self.dispatch(exec.as_mut(), 0);
        exec.finish();
    }

    /// Dispatches this pipeline's operations into an execution that is
    /// already running.
    pub(crate) fn dispatch(&self, exec: &mut dyn ExecutionContext, depth: usize) {
        for op in self.operations() {
            op.execute_nested(exec, depth);
        }
    }
}

impl PartialEq for Pipeline {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.inner.id)
            .field("context", &self.context_id())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Call, RecordingBackend};
    use crate::coords::{Color, Viewport};
    use crate::pipeline::{ArrayBinding, DrawOp, PrimitiveMode, VertexFormat};
    use crate::pipeline::operation::MAX_NESTING;
    use crate::resource::{Array, ArrayData, PixelFormat, Shader, ShaderSource, Texture};
    use crate::target::TargetKind;

    fn pipeline() -> (Pipeline, RecordingBackend) {
        let backend = RecordingBackend::new();
        let pipeline = Pipeline::new(Rc::new(backend.clone()));
        (pipeline, backend)
    }

    fn offscreen(backend: &RecordingBackend) -> Target {
        Target::new(
            TargetKind::Offscreen {
                texture: Texture::new(),
                format: PixelFormat::Rgba8Unorm,
            },
            (16, 16),
            Rc::new(backend.clone()),
        )
    }

    fn source() -> ShaderSource {
        ShaderSource::new("vertex", "fragment")
    }

    #[test]
    fn executes_in_insertion_order() {
        let (p, backend) = pipeline();
        p.add_operation(Operation::viewport(Viewport::new(0.0, 0.0, 4.0, 4.0)));
        p.add_operation(Operation::clear(Color::white()));
        p.add_operation(Operation::clear_with(None, Some(1.0)));

        p.execute();

        assert_eq!(
            backend.log().calls(),
            vec![
                Call::BeginExecution,
                Call::SetViewport(Viewport::new(0.0, 0.0, 4.0, 4.0)),
                Call::ClearColor(Color::white()),
                Call::ClearDepth(1.0),
                Call::Finish,
            ]
        );
    }

    #[test]
    fn removing_absent_operation_is_noop() {
        let (p, _) = pipeline();
        let kept = Operation::clear(Color::white());
        p.add_operation(kept.clone());

        assert!(!p.remove_operation(&Operation::clear(Color::black())));
        assert_eq!(p.operations(), vec![kept]);
    }

    #[test]
    fn remove_takes_first_match_and_keeps_order() {
        let (p, _) = pipeline();
        let a = Operation::clear(Color::white());
        let b = Operation::clear(Color::black());
        let c = Operation::clear(Color::white());
        p.add_operation(a.clone());
        p.add_operation(b.clone());
        p.add_operation(c.clone());

        assert!(p.remove_operation(&Operation::clear(Color::white())));

        let ops = p.operations();
        assert_eq!(ops.len(), 2);
        assert!(ops[0].ptr_eq(&b));
        assert!(ops[1].ptr_eq(&c));
    }

    #[test]
    fn cleared_pipeline_makes_no_backend_calls() {
        let (p, backend) = pipeline();
        p.add_operation(Operation::clear(Color::white()));
        p.clear();

        p.execute();

        assert!(backend.log().calls().is_empty());
    }

    #[test]
    fn draw_with_failed_shader_does_not_abort_frame() {
        let (p, backend) = pipeline();
        let target = offscreen(&backend);
        let broken = Shader::new();
        let array = Array::new();

        p.add_operation(Operation::target_focus(target));
        p.add_operation(Operation::load_shader(broken.clone(), ShaderSource::new("", "")));
        p.add_operation(Operation::load_array(
            array.clone(),
            ArrayData::from_pod(&[0.0f32; 6]),
        ));
        p.add_operation(Operation::draw(
            DrawOp::new(broken, PrimitiveMode::Triangles, 3).with_array(ArrayBinding::new(
                array,
                "position",
                VertexFormat::Float32x2,
            )),
        ));
        p.add_operation(Operation::clear(Color::black()));

        p.execute();

        let calls = backend.log().calls();
        assert!(calls.iter().any(|c| matches!(c, Call::ShaderFailed(_))));
        assert!(!calls.iter().any(|c| matches!(c, Call::Draw { .. })));
        assert_eq!(calls[calls.len() - 2], Call::ClearColor(Color::black()));
        assert_eq!(calls[calls.len() - 1], Call::Finish);
    }

    #[test]
    fn first_draw_binds_buffer_then_program_then_draws() {
        let (_, backend) = pipeline();
        let target = offscreen(&backend);
        let shader = Shader::with_contents(source());
        let array = Array::with_contents(ArrayData::from_pod(&[[0.0f32, 0.0]; 3]));

        target.pipeline().add_operation(Operation::clear(Color::black()));
        target.pipeline().add_operation(Operation::draw(
            DrawOp::new(shader.clone(), PrimitiveMode::Triangles, 3).with_array(
                ArrayBinding::new(array.clone(), "position", VertexFormat::Float32x2),
            ),
        ));

        target.redraw();

        let interesting: Vec<Call> = backend
            .log()
            .calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    Call::CreateBuffer(_) | Call::CreateProgram(_) | Call::Draw { .. }
                )
            })
            .collect();
        assert_eq!(
            interesting,
            vec![
                Call::CreateBuffer(array.id()),
                Call::CreateProgram(shader.id()),
                Call::Draw {
                    shader: shader.id(),
                    mode: PrimitiveMode::Triangles,
                    vertices: 0..3,
                },
            ]
        );
    }

    #[test]
    fn draw_binds_only_its_own_arrays() {
        let (_, backend) = pipeline();
        let target = offscreen(&backend);
        let shader = Shader::with_contents(source());
        let never_uploaded = Array::new();

        target.pipeline().add_operation(Operation::draw(
            DrawOp::new(shader.clone(), PrimitiveMode::Triangles, 3).with_array(
                ArrayBinding::new(never_uploaded, "position", VertexFormat::Float32x2),
            ),
        ));
        target
            .pipeline()
            .add_operation(Operation::draw(DrawOp::new(shader.clone(), PrimitiveMode::Points, 1)));

        target.redraw();

        let draws: Vec<Call> = backend
            .log()
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Draw { .. }))
            .collect();
        assert_eq!(
            draws,
            vec![Call::Draw {
                shader: shader.id(),
                mode: PrimitiveMode::Points,
                vertices: 0..1,
            }]
        );
    }

    #[test]
    fn repeated_executions_reuse_bound_objects() {
        let (_, backend) = pipeline();
        let target = offscreen(&backend);
        let shader = Shader::with_contents(source());
        let array = Array::with_contents(ArrayData::from_pod(&[[0.0f32, 0.0]; 3]));
        target.pipeline().add_operation(Operation::draw(
            DrawOp::new(shader, PrimitiveMode::Triangles, 3).with_array(ArrayBinding::new(
                array,
                "position",
                VertexFormat::Float32x2,
            )),
        ));

        for _ in 0..4 {
            target.redraw();
        }

        let calls = backend.log().calls();
        let count = |pred: fn(&Call) -> bool| calls.iter().filter(|c| pred(c)).count();
        assert_eq!(count(|c| matches!(c, Call::CreateBuffer(_))), 1);
        assert_eq!(count(|c| matches!(c, Call::CreateProgram(_))), 1);
        assert_eq!(count(|c| matches!(c, Call::Draw { .. })), 4);
    }

    #[test]
    fn sub_pipeline_runs_inside_parent_execution() {
        let (outer, backend) = pipeline();
        let inner = Pipeline::new(Rc::new(backend.clone()));
        inner.add_operation(Operation::clear(Color::black()));

        outer.add_operation(Operation::clear(Color::white()));
        outer.add_operation(Operation::sub_pipeline(inner));

        outer.execute();

        assert_eq!(
            backend.log().calls(),
            vec![
                Call::BeginExecution,
                Call::ClearColor(Color::white()),
                Call::ClearColor(Color::black()),
                Call::Finish,
            ]
        );
    }

    #[test]
    fn self_nesting_is_bounded() {
        let (p, backend) = pipeline();
        p.add_operation(Operation::clear(Color::white()));
        p.add_operation(Operation::sub_pipeline(p.clone()));

        p.execute();

        let clears = backend
            .log()
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::ClearColor(_)))
            .count();
        assert_eq!(clears, MAX_NESTING + 1);

        // Break the Rc cycle.
        p.clear();
    }

    #[test]
    fn foreign_sub_pipeline_is_skipped() {
        let (outer, backend) = pipeline();
        let other = Pipeline::new(Rc::new(RecordingBackend::new()));
        other.add_operation(Operation::clear(Color::black()));
        outer.add_operation(Operation::sub_pipeline(other));

        outer.execute();

        assert_eq!(backend.log().calls(), vec![Call::BeginExecution, Call::Finish]);
    }

    #[test]
    fn animated_vertex_count_applies_next_execution() {
        let (p, backend) = pipeline();
        let target = offscreen(&backend);
        let shader = Shader::new();
        let array = Array::new();
        p.add_operation(Operation::target_focus(target));
        p.add_operation(Operation::load_shader(shader.clone(), source()));
        p.add_operation(Operation::load_array(array.clone(), ArrayData::from_pod(&[0.0f32; 12])));
        let draw = Operation::draw(
            DrawOp::new(shader, PrimitiveMode::Triangles, 3).with_array(ArrayBinding::new(
                array,
                "position",
                VertexFormat::Float32x2,
            )),
        );
        p.add_operation(draw.clone());

        p.execute();
        draw.set_vertex_count(6);
        p.execute();

        let draws: Vec<_> = backend
            .log()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Draw { vertices, .. } => Some(vertices),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![0..3, 0..6]);
    }
}
