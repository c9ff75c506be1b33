use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use super::{ArrayData, ContextId, HandleId, ShaderSource, TextureData, UserData};

/// Marker trait for resource handle kinds.
pub trait ResourceKind: Send + Sync + 'static {
    const NAME: &'static str;

    /// CPU payload a backend binds from when the handle is first used.
    type Contents: Send + Sync + 'static;
}

/// Vertex attribute array.
#[derive(Debug)]
pub enum ArrayKind {}

/// Sampled texture (also the colour storage of offscreen targets).
#[derive(Debug)]
pub enum TextureKind {}

/// Vertex + fragment program.
#[derive(Debug)]
pub enum ShaderKind {}

impl ResourceKind for ArrayKind {
    const NAME: &'static str = "Array";
    type Contents = ArrayData;
}

impl ResourceKind for TextureKind {
    const NAME: &'static str = "Texture";
    type Contents = TextureData;
}

impl ResourceKind for ShaderKind {
    const NAME: &'static str = "Shader";
    type Contents = ShaderSource;
}

pub type Array = Handle<ArrayKind>;
pub type Texture = Handle<TextureKind>;
pub type Shader = Handle<ShaderKind>;

struct HandleCore<C> {
    id: HandleId,
    label: Option<String>,
    contents: Mutex<Option<Arc<C>>>,
    user_data: UserData,
}

impl<C> Drop for HandleCore<C> {
    fn drop(&mut self) {
        let contexts = self.user_data.contexts();
        if !contexts.is_empty() {
            log::trace!(
                "releasing handle {} ({} backend objects)",
                self.id,
                contexts.len()
            );
        }
    }
}

/// Reference-counted resource handle.
///
/// Cloning is `ref`, dropping a clone is `unref`. Backend objects are attached
/// lazily through [`user_data`](Self::user_data) and are released when the
/// last clone goes away, never before.
///
/// A handle may also carry CPU contents. A backend that meets an unbound
/// handle during a draw binds it from those contents; explicit loads
/// (`LoadArray`, `LoadShader`, async uploads) do not touch them.
///
/// Handles are `Send + Sync` so the upload worker can fill them.
pub struct Handle<K: ResourceKind> {
    core: Arc<HandleCore<K::Contents>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> Handle<K> {
    pub fn new() -> Self {
        Self::build(None, None)
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self::build(Some(label.into()), None)
    }

    /// Handle that binds lazily from `contents` on first use.
    pub fn with_contents(contents: K::Contents) -> Self {
        Self::build(None, Some(Arc::new(contents)))
    }

    fn build(label: Option<String>, contents: Option<Arc<K::Contents>>) -> Self {
        Self {
            core: Arc::new(HandleCore {
                id: HandleId::next(),
                label,
                contents: Mutex::new(contents),
                user_data: UserData::new(),
            }),
            _kind: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.core.id
    }

    pub fn label(&self) -> Option<&str> {
        self.core.label.as_deref()
    }

    /// Contents used for lazy binding, if any.
    pub fn contents(&self) -> Option<Arc<K::Contents>> {
        self.core
            .contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the lazy-binding contents.
    ///
    /// Contexts that already bound the handle keep their object; use an
    /// explicit load to refresh them.
    pub fn set_contents(&self, contents: K::Contents) {
        *self
            .core
            .contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(contents));
    }

    /// Backend objects attached to this handle.
    #[inline]
    pub fn user_data(&self) -> &UserData {
        &self.core.user_data
    }

    /// Whether a backend object exists for `ctx`.
    pub fn is_bound(&self, ctx: ContextId) -> bool {
        self.core.user_data.contains(ctx)
    }

    /// Number of live clones of this handle.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.core)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<K: ResourceKind> Default for Handle<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ResourceKind> Clone for Handle<K> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<K: ResourceKind> Eq for Handle<K> {}

impl<K: ResourceKind> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl<K: ResourceKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.core.label {
            Some(label) => write!(f, "{}{}({label:?})", K::NAME, self.core.id),
            None => write!(f, "{}{}", K::NAME, self.core.id),
        }
    }
}
