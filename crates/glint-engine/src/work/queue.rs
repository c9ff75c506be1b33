use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::UploadContext;
use crate::resource::ContextId;

use super::{Notifier, UploadError, UploadOutcome};

type Payload = Box<dyn Any + Send>;
type WorkFn = Box<dyn FnOnce(&mut dyn UploadContext, &mut (dyn Any + Send)) -> UploadOutcome + Send>;
type JoinFn = Box<dyn FnOnce(Payload, UploadOutcome)>;

/// Identifies one submitted work item.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct WorkId(u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work{}", self.0)
    }
}

/// Lifecycle of a submitted item. Released items report no state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkState {
    Queued,
    Executing,
    /// Done on the worker, join callback not run yet.
    Finished,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkerStatus {
    /// Thread spawned, upload context not current yet.
    Starting,
    Running,
    /// Upload context could not be created or made current. Submitted items
    /// stay queued until shutdown.
    Failed,
    Stopped,
}

struct Queued {
    id: WorkId,
    payload: Payload,
    work: WorkFn,
}

struct Finished {
    id: WorkId,
    payload: Payload,
    outcome: UploadOutcome,
}

struct State {
    pending: VecDeque<Queued>,
    executing: Option<WorkId>,
    finished: VecDeque<Finished>,
    closing: bool,
    status: WorkerStatus,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    notifier: Arc<dyn Notifier>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: WorkerStatus) {
        self.lock().status = status;
    }
}

/// Background upload queue of one context.
///
/// Owned by the context's thread (`!Send`): join callbacks are stored here and
/// only ever run from [`drain_finished`](Self::drain_finished) on that thread.
/// Only work functions and payloads cross to the worker.
pub struct WorkQueue {
    context_id: ContextId,
    shared: Arc<Shared>,
    joins: RefCell<BTreeMap<WorkId, JoinFn>>,
    rejected: RefCell<VecDeque<Finished>>,
    next_id: Cell<u64>,
    worker: RefCell<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Spawns the worker thread.
    ///
    /// `upload` is the shared-namespace context the worker will own; if it is
    /// an error, or cannot be made current on the worker, the failure is
    /// logged and the queue never progresses.
    pub fn start(
        context_id: ContextId,
        upload: anyhow::Result<Box<dyn UploadContext>>,
        notifier: Arc<dyn Notifier>,
        fence_timeout: Duration,
        thread_name: String,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                executing: None,
                finished: VecDeque::new(),
                closing: false,
                status: WorkerStatus::Starting,
            }),
            wake: Condvar::new(),
            notifier,
        });

        let worker_shared = shared.clone();
        let spawned = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_main(worker_shared, upload, fence_timeout));

        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("failed to spawn upload worker {thread_name}: {err}");
                shared.set_status(WorkerStatus::Failed);
                None
            }
        };

        Self {
            context_id,
            shared,
            joins: RefCell::new(BTreeMap::new()),
            rejected: RefCell::new(VecDeque::new()),
            next_id: Cell::new(1),
            worker: RefCell::new(worker),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Queues `work` to run on the worker with `payload`, then `join` with the
    /// payload and outcome on this thread.
    ///
    /// Fire-and-forget: `join` always runs exactly once, from a later
    /// `drain_finished()`. Items start in submission order.
    pub fn submit<P, W, J>(&self, payload: P, work: W, join: J) -> WorkId
    where
        P: Send + 'static,
        W: FnOnce(&mut dyn UploadContext, &mut P) -> UploadOutcome + Send + 'static,
        J: FnOnce(P, UploadOutcome) + 'static,
    {
        let id = WorkId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let work: WorkFn = Box::new(move |ctx, payload| match payload.downcast_mut::<P>() {
            Some(payload) => work(ctx, payload),
            None => Err(UploadError::Gpu(format!("{id}: payload type mismatch"))),
        });
        let join: JoinFn = Box::new(move |payload, outcome| match payload.downcast::<P>() {
            Ok(payload) => join(*payload, outcome),
            Err(_) => log::error!("{id}: payload type mismatch, join skipped"),
        });

        self.joins.borrow_mut().insert(id, join);

        let mut state = self.shared.lock();
        if state.closing {
            drop(state);
            log::debug!("{id} submitted after shutdown; rejected");
            self.rejected.borrow_mut().push_back(Finished {
                id,
                payload: Box::new(payload),
                outcome: Err(UploadError::Rejected),
            });
            self.shared.notifier.notify();
            return id;
        }

        state.pending.push_back(Queued {
            id,
            payload: Box::new(payload),
            work,
        });
        let depth = state.pending.len();
        drop(state);

        log::trace!("{id} queued (pending {depth})");
        self.shared.wake.notify_one();
        id
    }

    /// Runs the join callback of every finished item, oldest first.
    ///
    /// The queue lock is released around each callback, so callbacks may
    /// submit new work. Returns how many callbacks ran.
    pub fn drain_finished(&self) -> usize {
        let mut joined = 0;

        loop {
            let next = self.shared.lock().finished.pop_front();
            let next = next.or_else(|| self.rejected.borrow_mut().pop_front());
            let Some(Finished { id, payload, outcome }) = next else {
                break;
            };

            let Some(join) = self.joins.borrow_mut().remove(&id) else {
                log::error!("{id} finished without a join callback");
                continue;
            };

            if let Err(err) = &outcome {
                log::warn!("{id} finished with error: {err}");
            }

            join(payload, outcome);
            joined += 1;
        }

        joined
    }

    /// `None` once the item's join callback has run (or for unknown ids).
    pub fn state(&self, id: WorkId) -> Option<WorkState> {
        if !self.joins.borrow().contains_key(&id) {
            return None;
        }

        let state = self.shared.lock();
        if state.executing == Some(id) {
            Some(WorkState::Executing)
        } else if state.pending.iter().any(|q| q.id == id) {
            Some(WorkState::Queued)
        } else {
            Some(WorkState::Finished)
        }
    }

    /// Items submitted whose join callback has not run yet.
    pub fn outstanding(&self) -> usize {
        self.joins.borrow().len()
    }

    pub fn worker_status(&self) -> WorkerStatus {
        self.shared.lock().status
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().closing
    }

    /// Stops accepting work, lets the worker finish every pending item, joins
    /// the thread and drains.
    ///
    /// Items the worker never ran (it failed to start) are joined with
    /// [`UploadError::WorkerUnavailable`]. Idempotent.
    pub fn shutdown(&self) {
        self.shared.lock().closing = true;
        self.shared.wake.notify_all();

        let handle = self.worker.borrow_mut().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("upload worker of {} panicked", self.context_id);
            }
        }

        {
            let mut state = self.shared.lock();
            while let Some(Queued { id, payload, .. }) = state.pending.pop_front() {
                state.finished.push_back(Finished {
                    id,
                    payload,
                    outcome: Err(UploadError::WorkerUnavailable),
                });
            }
            if state.status != WorkerStatus::Failed {
                state.status = WorkerStatus::Stopped;
            }
        }

        self.drain_finished();
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("WorkQueue")
            .field("context", &self.context_id)
            .field("status", &state.status)
            .field("pending", &state.pending.len())
            .field("finished", &state.finished.len())
            .finish()
    }
}

fn worker_main(
    shared: Arc<Shared>,
    upload: anyhow::Result<Box<dyn UploadContext>>,
    fence_timeout: Duration,
) {
    let mut ctx = match make_current(upload) {
        Ok(ctx) => ctx,
        Err(err) => {
            log::error!("upload worker failed to start: {err:#}");
            shared.set_status(WorkerStatus::Failed);
            return;
        }
    };

    shared.set_status(WorkerStatus::Running);
    log::debug!("upload worker running for {}", ctx.context_id());

    loop {
        let item = {
            let mut state = shared.lock();
            loop {
                if let Some(item) = state.pending.pop_front() {
                    state.executing = Some(item.id);
                    break Some(item);
                }
                if state.closing {
                    break None;
                }
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(Queued { id, mut payload, work }) = item else {
            break;
        };

        log::trace!("{id} executing");
        let outcome = run_item(ctx.as_mut(), work, payload.as_mut(), fence_timeout);

        {
            let mut state = shared.lock();
            state.executing = None;
            state.finished.push_back(Finished {
                id,
                payload,
                outcome,
            });
        }

        log::trace!("{id} finished");
        shared.notifier.notify();
    }

    shared.set_status(WorkerStatus::Stopped);
    log::debug!("upload worker for {} stopped", ctx.context_id());
}

fn make_current(
    upload: anyhow::Result<Box<dyn UploadContext>>,
) -> anyhow::Result<Box<dyn UploadContext>> {
    let mut ctx = upload?;
    ctx.make_current()?;
    Ok(ctx)
}

/// Runs one work function and fences whatever it submitted.
///
/// The fence runs even when the work failed so that nothing it left in flight
/// is still executing when the join callback observes the outcome.
fn run_item(
    ctx: &mut dyn UploadContext,
    work: WorkFn,
    payload: &mut (dyn Any + Send),
    fence_timeout: Duration,
) -> UploadOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *ctx, payload)));
    let fenced = ctx.fence(fence_timeout);

    match result {
        Ok(Ok(())) => fenced,
        Ok(Err(err)) => Err(err),
        Err(_) => {
            log::error!("work function panicked on the upload worker");
            Err(UploadError::Panicked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::backend::recording::{Call, RecordingBackend};
    use crate::resource::{Array, ArrayData};
    use std::rc::Rc;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Instant;

    fn start(backend: &RecordingBackend) -> (WorkQueue, Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let notifier: Arc<dyn Notifier> = Arc::new(move || {
            let _ = tx.send(());
        });
        let queue = WorkQueue::start(
            backend.context_id(),
            backend.create_upload_context(),
            notifier,
            Duration::from_secs(1),
            "glint-upload-test".to_string(),
        );
        (queue, rx)
    }

    /// Drains until `expected` joins ran or a generous deadline passes.
    fn join_all(queue: &WorkQueue, rx: &Receiver<()>, expected: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut joined = 0;
        while joined < expected {
            let left = deadline.saturating_duration_since(Instant::now());
            if rx.recv_timeout(left).is_err() {
                break;
            }
            joined += queue.drain_finished();
        }
        joined
    }

    #[test]
    fn joins_fire_in_submission_order_regardless_of_duration() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);
        let order = Rc::new(RefCell::new(Vec::new()));

        for (name, millis) in [("A", 60u64), ("B", 0), ("C", 20)] {
            let order = order.clone();
            queue.submit(
                name,
                move |_, _| {
                    std::thread::sleep(Duration::from_millis(millis));
                    Ok(())
                },
                move |name, outcome| {
                    assert_eq!(outcome, Ok(()));
                    order.borrow_mut().push(name);
                },
            );
        }

        assert_eq!(join_all(&queue, &rx, 3), 3);
        assert_eq!(*order.borrow(), vec!["A", "B", "C"]);
    }

    #[test]
    fn every_item_joins_exactly_once() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);
        let arrays: Vec<Array> = (0..4).map(|_| Array::new()).collect();
        let seen = Rc::new(RefCell::new(BTreeMap::<usize, usize>::new()));

        for i in 0..64 {
            let array = arrays[i % arrays.len()].clone();
            let seen = seen.clone();
            queue.submit(
                (i, array, ArrayData::from_pod(&[i as f32; 4])),
                |ctx, (_, array, data)| ctx.upload_array(array, data),
                move |(i, _, _), outcome| {
                    assert!(outcome.is_ok());
                    *seen.borrow_mut().entry(i).or_default() += 1;
                },
            );
        }

        assert_eq!(join_all(&queue, &rx, 64), 64);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 64);
        assert!(seen.values().all(|&n| n == 1));
        assert_eq!(queue.outstanding(), 0);

        let created = backend
            .log()
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateBuffer(_)))
            .count();
        assert_eq!(created, arrays.len());
    }

    #[test]
    fn join_runs_on_owning_thread() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);
        let owner = std::thread::current().id();
        let worker = Arc::new(Mutex::new(None));
        let joined_on = Rc::new(Cell::new(None));

        let worker_slot = worker.clone();
        let joined_slot = joined_on.clone();
        queue.submit(
            (),
            move |_, _| {
                *worker_slot.lock().unwrap() = Some(std::thread::current().id());
                Ok(())
            },
            move |_, _| joined_slot.set(Some(std::thread::current().id())),
        );

        assert_eq!(join_all(&queue, &rx, 1), 1);
        assert_eq!(joined_on.get(), Some(owner));
        assert_ne!(*worker.lock().unwrap(), Some(owner));
    }

    #[test]
    fn join_may_submit_more_work() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);
        let queue = Rc::new(queue);
        let done = Rc::new(Cell::new(false));

        let inner_queue = queue.clone();
        let inner_done = done.clone();
        queue.submit(
            (),
            |_, _| Ok(()),
            move |_, _| {
                let done = inner_done.clone();
                inner_queue.submit((), |_, _| Ok(()), move |_, _| done.set(true));
            },
        );

        assert_eq!(join_all(&queue, &rx, 2), 2);
        assert!(done.get());
        assert_eq!(queue.outstanding(), 0);
    }

    #[test]
    fn work_error_reaches_join() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);
        let outcome = Rc::new(RefCell::new(None));

        let slot = outcome.clone();
        queue.submit(
            (),
            |_, _| Err(UploadError::Gpu("out of memory".into())),
            move |_, o| *slot.borrow_mut() = Some(o),
        );

        assert_eq!(join_all(&queue, &rx, 1), 1);
        assert_eq!(
            *outcome.borrow(),
            Some(Err(UploadError::Gpu("out of memory".into())))
        );
    }

    #[test]
    fn panicking_work_does_not_stop_worker() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);
        let outcomes = Rc::new(RefCell::new(Vec::new()));

        let first = outcomes.clone();
        queue.submit(
            (),
            |_, _| panic!("boom"),
            move |_, o| first.borrow_mut().push(o),
        );
        let second = outcomes.clone();
        queue.submit((), |_, _| Ok(()), move |_, o| second.borrow_mut().push(o));

        assert_eq!(join_all(&queue, &rx, 2), 2);
        assert_eq!(*outcomes.borrow(), vec![Err(UploadError::Panicked), Ok(())]);
    }

    #[test]
    fn state_moves_from_queued_to_released() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        let blocker = queue.submit(
            gate_rx,
            |_, gate| {
                let _ = gate.recv_timeout(Duration::from_secs(5));
                Ok(())
            },
            |_, _| {},
        );
        let waiting = queue.submit((), |_, _| Ok(()), |_, _| {});

        assert_eq!(queue.state(waiting), Some(WorkState::Queued));

        gate_tx.send(()).unwrap();
        assert_eq!(join_all(&queue, &rx, 2), 2);

        assert_eq!(queue.state(blocker), None);
        assert_eq!(queue.state(waiting), None);
    }

    #[test]
    fn shutdown_finishes_pending_work() {
        let backend = RecordingBackend::new();
        let (queue, _rx) = start(&backend);
        let joined = Rc::new(RefCell::new(Vec::new()));

        for i in 0..8usize {
            let joined = joined.clone();
            queue.submit(
                i,
                |_, _| {
                    std::thread::sleep(Duration::from_millis(2));
                    Ok(())
                },
                move |i, o| joined.borrow_mut().push((i, o)),
            );
        }

        queue.shutdown();

        let joined = joined.borrow();
        assert_eq!(joined.len(), 8);
        assert!(joined.iter().enumerate().all(|(n, (i, o))| n == *i && o.is_ok()));
        assert_eq!(queue.worker_status(), WorkerStatus::Stopped);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let backend = RecordingBackend::new();
        let (queue, _rx) = start(&backend);
        queue.shutdown();

        let outcome = Rc::new(RefCell::new(None));
        let slot = outcome.clone();
        queue.submit((), |_, _| Ok(()), move |_, o| *slot.borrow_mut() = Some(o));

        assert_eq!(queue.drain_finished(), 1);
        assert_eq!(*outcome.borrow(), Some(Err(UploadError::Rejected)));
    }

    #[test]
    fn failed_worker_never_progresses_until_shutdown() {
        let backend = RecordingBackend::failing_uploads();
        let (queue, _rx) = start(&backend);
        let outcome = Rc::new(RefCell::new(None));

        let slot = outcome.clone();
        let id = queue.submit((), |_, _| Ok(()), move |_, o| *slot.borrow_mut() = Some(o));

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.worker_status() == WorkerStatus::Starting && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(queue.worker_status(), WorkerStatus::Failed);
        assert_eq!(queue.drain_finished(), 0);
        assert_eq!(queue.state(id), Some(WorkState::Queued));

        queue.shutdown();
        assert_eq!(*outcome.borrow(), Some(Err(UploadError::WorkerUnavailable)));
    }

    #[test]
    fn every_item_is_fenced() {
        let backend = RecordingBackend::new();
        let (queue, rx) = start(&backend);

        for _ in 0..3 {
            queue.submit((), |_, _| Ok(()), |_, _| {});
        }
        assert_eq!(join_all(&queue, &rx, 3), 3);

        let fences = backend
            .log()
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Fence))
            .count();
        assert_eq!(fences, 3);
    }
}
