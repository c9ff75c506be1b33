/// Wakes the owning event loop when finished work is ready to be joined.
///
/// Called from the upload worker thread, once per finished item. The owning
/// loop reacts by calling `drain_finished()` on its own thread. Spurious or
/// coalesced wakes are fine: a drain always empties the finished list.
pub trait Notifier: Send + Sync {
    fn notify(&self);
}

impl<F> Notifier for F
where
    F: Fn() + Send + Sync,
{
    fn notify(&self) {
        self()
    }
}

/// Notifier for hosts that poll `drain_finished()` on their own schedule.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self) {}
}
