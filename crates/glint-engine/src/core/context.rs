use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use winit::window::Window;

use crate::backend::{Backend, UploadContext};
use crate::pipeline::Pipeline;
use crate::resource::{Array, ArrayData, ContextId, PixelFormat, Texture, TextureData};
use crate::target::{Target, TargetKind};
use crate::work::{Notifier, UploadOutcome, WorkId, WorkQueue, WorkState, WorkerStatus};

/// Context construction options.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Upper bound on how long the worker waits for one item's GPU work.
    pub fence_timeout: Duration,
    /// Worker thread name; the context number is appended.
    pub worker_name_prefix: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            fence_timeout: Duration::from_secs(10),
            worker_name_prefix: "glint-upload".to_string(),
        }
    }
}

struct ContextInner {
    work: WorkQueue,
    backend: Rc<dyn Backend>,
}

/// Owning-thread root of one rendering context.
///
/// Cloning yields another handle to the same context. The upload worker shuts
/// down when the last handle is dropped.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    /// Wraps `backend` and starts its upload worker.
    ///
    /// `notifier` is poked from the worker after every finished item; it must
    /// eventually get the owning thread to call
    /// [`drain_finished`](Self::drain_finished).
    pub fn new<B>(backend: B, notifier: Arc<dyn Notifier>, config: ContextConfig) -> Self
    where
        B: Backend + 'static,
    {
        let id = backend.context_id();
        let upload = backend.create_upload_context();
        let thread_name = format!("{}-{}", config.worker_name_prefix, id.get());

        log::info!("context {id} created on {} backend", backend.name());

        let work = WorkQueue::start(id, upload, notifier, config.fence_timeout, thread_name);

        Self {
            inner: Rc::new(ContextInner {
                work,
                backend: Rc::new(backend),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.inner.backend.context_id()
    }

    pub fn backend(&self) -> &Rc<dyn Backend> {
        &self.inner.backend
    }

    /// New empty pipeline executing against this context.
    pub fn create_pipeline(&self) -> Pipeline {
        Pipeline::new(self.inner.backend.clone())
    }

    /// Target presenting to `window`, sized to its current inner size.
    pub fn create_window_target(&self, window: Arc<Window>) -> Target {
        let size = window.inner_size();
        Target::new(
            TargetKind::Window(window),
            (size.width, size.height),
            self.inner.backend.clone(),
        )
    }

    /// Target rendering into a fresh texture of `width` x `height`.
    pub fn create_offscreen_target(&self, width: u32, height: u32) -> Target {
        Target::new(
            TargetKind::Offscreen {
                texture: Texture::with_label("offscreen target"),
                format: PixelFormat::Rgba8Unorm,
            },
            (width, height),
            self.inner.backend.clone(),
        )
    }

    /// Uploads `data` into `array` on the worker. `join` gets the array back
    /// on this thread once the upload is fenced.
    pub fn upload_array_async<J>(&self, array: &Array, data: ArrayData, join: J) -> WorkId
    where
        J: FnOnce(Array, UploadOutcome) + 'static,
    {
        self.inner.work.submit(
            (array.clone(), data),
            |ctx, (array, data)| ctx.upload_array(array, data),
            move |(array, _), outcome| join(array, outcome),
        )
    }

    pub fn upload_texture_async<J>(&self, texture: &Texture, data: TextureData, join: J) -> WorkId
    where
        J: FnOnce(Texture, UploadOutcome) + 'static,
    {
        self.inner.work.submit(
            (texture.clone(), data),
            |ctx, (texture, data)| ctx.upload_texture(texture, data),
            move |(texture, _), outcome| join(texture, outcome),
        )
    }

    /// Queues arbitrary work for the upload worker.
    ///
    /// See [`WorkQueue::submit`].
    pub fn submit<P, W, J>(&self, payload: P, work: W, join: J) -> WorkId
    where
        P: Send + 'static,
        W: FnOnce(&mut dyn UploadContext, &mut P) -> UploadOutcome + Send + 'static,
        J: FnOnce(P, UploadOutcome) + 'static,
    {
        self.inner.work.submit(payload, work, join)
    }

    /// Runs the join callbacks of finished work. Returns how many ran.
    pub fn drain_finished(&self) -> usize {
        self.inner.work.drain_finished()
    }

    pub fn work_state(&self, id: WorkId) -> Option<WorkState> {
        self.inner.work.state(id)
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.inner.work.worker_status()
    }

    /// Finishes every submitted item and stops the worker.
    ///
    /// Join callbacks of everything submitted so far have run when this
    /// returns. Later submits are rejected.
    pub fn shutdown(&self) {
        log::debug!("context {} shutting down", self.id());
        self.inner.work.shutdown();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id())
            .field("backend", &self.inner.backend.name())
            .field("work", &self.inner.work)
            .finish()
    }
}
