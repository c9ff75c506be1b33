//! Render destinations.
//!
//! A target is either a window surface (presented at the end of every
//! execution that drew into it) or an offscreen texture. Each target owns a
//! pipeline that lives exactly as long as the target.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use winit::window::Window;

use crate::backend::Backend;
use crate::pipeline::Pipeline;
use crate::resource::{HandleId, PixelFormat, Texture, UserData};

/// What a target renders into.
#[derive(Clone)]
pub enum TargetKind {
    Window(Arc<Window>),
    Offscreen {
        texture: Texture,
        format: PixelFormat,
    },
}

impl fmt::Debug for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Window(window) => f.debug_tuple("Window").field(&window.id()).finish(),
            TargetKind::Offscreen { texture, format } => f
                .debug_struct("Offscreen")
                .field("texture", texture)
                .field("format", format)
                .finish(),
        }
    }
}

struct TargetInner {
    id: HandleId,
    kind: TargetKind,
    size: Cell<(u32, u32)>,
    pipeline: Pipeline,
    user_data: UserData,
}

/// Bindable render destination. Owned by the thread of its context.
#[derive(Clone)]
pub struct Target {
    inner: Rc<TargetInner>,
}

impl Target {
    pub(crate) fn new(kind: TargetKind, size: (u32, u32), backend: Rc<dyn Backend>) -> Self {
        Self {
            inner: Rc::new(TargetInner {
                id: HandleId::next(),
                kind,
                size: Cell::new(size),
                pipeline: Pipeline::new(backend),
                user_data: UserData::new(),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn kind(&self) -> &TargetKind {
        &self.inner.kind
    }

    pub fn window(&self) -> Option<&Arc<Window>> {
        match &self.inner.kind {
            TargetKind::Window(window) => Some(window),
            TargetKind::Offscreen { .. } => None,
        }
    }

    /// Colour texture of an offscreen target.
    pub fn texture(&self) -> Option<&Texture> {
        match &self.inner.kind {
            TargetKind::Window(_) => None,
            TargetKind::Offscreen { texture, .. } => Some(texture),
        }
    }

    pub fn is_window(&self) -> bool {
        matches!(self.inner.kind, TargetKind::Window(_))
    }

    /// Drawable size in physical pixels.
    pub fn size(&self) -> (u32, u32) {
        self.inner.size.get()
    }

    /// Records a new drawable size. Backends reconfigure on next use.
    ///
    /// Zero-sized targets are kept but skipped when drawn.
    pub fn resize(&self, width: u32, height: u32) {
        self.inner.size.set((width, height));
    }

    /// The pipeline executed by [`redraw`](Self::redraw).
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Backend presentation state attached to this target.
    pub fn user_data(&self) -> &UserData {
        &self.inner.user_data
    }

    /// Executes the target's pipeline with this target made current first.
    pub fn redraw(&self) {
        self.inner.pipeline.execute_on(self);
    }

    /// Asks for a redraw at the windowing layer's convenience.
    ///
    /// Window targets forward to winit; offscreen targets have no windowing
    /// layer and redraw immediately.
    pub fn request_redraw(&self) {
        match &self.inner.kind {
            TargetKind::Window(window) => window.request_redraw(),
            TargetKind::Offscreen { .. } => self.redraw(),
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("size", &self.inner.size.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Call, RecordingBackend};
    use crate::coords::Color;
    use crate::pipeline::Operation;

    fn offscreen(backend: &RecordingBackend) -> Target {
        Target::new(
            TargetKind::Offscreen {
                texture: Texture::new(),
                format: PixelFormat::Rgba8Unorm,
            },
            (64, 32),
            Rc::new(backend.clone()),
        )
    }

    #[test]
    fn redraw_focuses_target_first() {
        let backend = RecordingBackend::new();
        let target = offscreen(&backend);
        target.pipeline().add_operation(Operation::clear(Color::black()));

        target.redraw();

        let id = target.id();
        assert_eq!(
            backend.log().calls(),
            vec![
                Call::BeginExecution,
                Call::SetTarget(id),
                Call::CreateSurface(id),
                Call::ClearColor(Color::black()),
                Call::Finish,
            ]
        );
    }

    #[test]
    fn surface_state_is_created_once() {
        let backend = RecordingBackend::new();
        let target = offscreen(&backend);
        target.pipeline().add_operation(Operation::clear(Color::black()));

        target.redraw();
        target.request_redraw();

        let created = backend
            .log()
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateSurface(_)))
            .count();
        assert_eq!(created, 1);
    }

    #[test]
    fn empty_target_pipeline_is_silent() {
        let backend = RecordingBackend::new();
        let target = offscreen(&backend);

        target.redraw();

        assert!(backend.log().calls().is_empty());
    }

    #[test]
    fn resize_updates_size() {
        let backend = RecordingBackend::new();
        let target = offscreen(&backend);
        target.resize(10, 20);
        assert_eq!(target.size(), (10, 20));
    }
}
