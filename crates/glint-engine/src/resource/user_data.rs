use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::ContextId;

type Slot = (ContextId, Arc<dyn Any + Send + Sync>);

/// Backend objects attached to a handle, one slot per context.
///
/// This is where lazy binding lives: a backend asks for its object with
/// [`get_or_try_insert_with`](Self::get_or_try_insert_with) and the object is
/// created on the first request only. The lock is held across creation, so the
/// owning thread and the upload worker can never both create an object for the
/// same (handle, context) pair.
///
/// Attached objects are dropped together with the handle.
#[derive(Default)]
pub struct UserData {
    slots: Mutex<Vec<Slot>>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        // A panicking backend must not take every later frame down with it.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the object attached for `ctx`, if it has type `T`.
    pub fn get<T>(&self, ctx: ContextId) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let slots = self.lock();
        let (_, value) = slots.iter().find(|(id, _)| *id == ctx)?;
        value.clone().downcast::<T>().ok()
    }

    /// Returns the object attached for `ctx`, creating it with `create` first
    /// if no object is attached yet.
    ///
    /// An attached object of a different type is replaced, with a warning:
    /// a handle carries one backend object per context.
    pub fn get_or_try_insert_with<T, E>(
        &self,
        ctx: ContextId,
        create: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
    {
        let mut slots = self.lock();

        if let Some(pos) = slots.iter().position(|(id, _)| *id == ctx) {
            if let Ok(existing) = slots[pos].1.clone().downcast::<T>() {
                return Ok(existing);
            }
            log::warn!(
                "{ctx}: replacing attached object of another type with {}",
                std::any::type_name::<T>()
            );
            slots.swap_remove(pos);
        }

        let value = Arc::new(create()?);
        slots.push((ctx, value.clone()));
        Ok(value)
    }

    /// Infallible form of [`get_or_try_insert_with`](Self::get_or_try_insert_with).
    pub fn get_or_insert_with<T>(&self, ctx: ContextId, create: impl FnOnce() -> T) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        match self.get_or_try_insert_with::<T, std::convert::Infallible>(ctx, || Ok(create())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Attaches `value` for `ctx`, dropping whatever was attached before.
    pub fn replace<T>(&self, ctx: ContextId, value: T) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        let value = Arc::new(value);
        let mut slots = self.lock();
        slots.retain(|(id, _)| *id != ctx);
        slots.push((ctx, value.clone()));
        value
    }

    /// Detaches the object for `ctx`. Returns whether anything was attached.
    pub fn remove(&self, ctx: ContextId) -> bool {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|(id, _)| *id != ctx);
        slots.len() != before
    }

    pub fn contains(&self, ctx: ContextId) -> bool {
        self.lock().iter().any(|(id, _)| *id == ctx)
    }

    /// Contexts that currently have an object attached.
    pub fn contexts(&self) -> Vec<ContextId> {
        self.lock().iter().map(|(id, _)| *id).collect()
    }
}

impl std::fmt::Debug for UserData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserData")
            .field("contexts", &self.contexts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn creates_once_per_context() {
        let data = UserData::new();
        let ctx = ContextId::next();
        let created = AtomicUsize::new(0);

        for _ in 0..5 {
            let v = data.get_or_insert_with(ctx, || {
                created.fetch_add(1, Ordering::SeqCst);
                42u32
            });
            assert_eq!(*v, 42);
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contexts_are_independent() {
        let data = UserData::new();
        let a = ContextId::next();
        let b = ContextId::next();

        data.get_or_insert_with(a, || 1u32);
        data.get_or_insert_with(b, || 2u32);

        assert_eq!(data.get::<u32>(a).as_deref(), Some(&1));
        assert_eq!(data.get::<u32>(b).as_deref(), Some(&2));
        assert_eq!(data.contexts().len(), 2);
    }

    #[test]
    fn failed_creation_leaves_slot_empty() {
        let data = UserData::new();
        let ctx = ContextId::next();

        let r: Result<Arc<u32>, &str> = data.get_or_try_insert_with(ctx, || Err("nope"));
        assert!(r.is_err());
        assert!(!data.contains(ctx));
    }

    #[test]
    fn replace_drops_previous_value() {
        let data = UserData::new();
        let ctx = ContextId::next();
        let first = data.get_or_insert_with(ctx, || String::from("small"));

        data.replace(ctx, String::from("large"));

        assert_eq!(*first, "small");
        assert_eq!(data.get::<String>(ctx).as_deref().map(String::as_str), Some("large"));
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn object_of_another_type_is_replaced() {
        let data = UserData::new();
        let ctx = ContextId::next();
        let stale = data.get_or_insert_with(ctx, || 7u8);

        let fresh = data.get_or_insert_with(ctx, || String::from("buffer"));

        assert_eq!(*fresh, "buffer");
        assert!(data.get::<u8>(ctx).is_none());
        assert_eq!(Arc::strong_count(&stale), 1);
        assert_eq!(data.contexts(), vec![ctx]);
    }

    #[test]
    fn remove_detaches() {
        let data = UserData::new();
        let ctx = ContextId::next();
        data.get_or_insert_with(ctx, || 1u8);

        assert!(data.remove(ctx));
        assert!(!data.remove(ctx));
        assert!(data.get::<u8>(ctx).is_none());
    }
}
