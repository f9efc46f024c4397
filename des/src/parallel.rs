//! Parallel dispatch of independent simulation tasks
//!
//! A [`Dispatcher`] runs tasks on a rayon thread pool and hands back a
//! [`TaskHandle`] per task. Handles can be gathered with
//! [`Dispatcher::collect`], which blocks and returns outcomes in handle
//! order, or fed into [`Dispatcher::submit_dependent`], which schedules a task
//! that only starts once every one of its dependencies has finished.
//!
//! # Example: fan-out, then fan-in
//!
//! ```rust
//! use des::parallel::Dispatcher;
//!
//! let dispatcher = Dispatcher::builder().num_threads(4).build().unwrap();
//!
//! let squares = dispatcher.submit(|x: u64| Ok::<_, String>(x * x), vec![1, 2, 3, 4]);
//! let total = dispatcher.submit_dependent(
//!     |values: Vec<u64>| Ok::<_, String>(values.iter().sum::<u64>()),
//!     squares,
//! );
//!
//! let results = dispatcher.collect(vec![total]);
//! assert_eq!(results[0], Ok(30));
//! ```
//!
//! # Determinism
//!
//! Outcomes are deterministic when every task is a pure function of its input
//! (seeded RNGs, no shared mutable state). Completion order is arbitrary but
//! both `collect` and dependent tasks see results in submission order, so
//! re-running a task after a failure is always safe.
//!
//! # Error Handling
//!
//! A task that returns `Err` or panics completes with a [`TaskFailure`];
//! sibling tasks keep running. A dependent task whose dependency failed
//! completes with [`TaskFailure::DependencyFailed`] without running.
//!
//! # Timeouts
//!
//! With [`DispatcherBuilder::timeout`] set, `collect` waits at most that long
//! in total. Handles that have not finished by then are cancelled (tasks still
//! queued are skipped, running ones are left to finish and discarded) and
//! reported as [`TaskFailure::TimedOut`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use thiserror::Error;

pub use rayon::ThreadPoolBuildError;

pub type TaskId = u64;

type Listener = Box<dyn FnOnce() + Send>;
type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Why a dispatched task produced no result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("task {id} panicked: {message}")]
    Panicked { id: TaskId, message: String },

    #[error("task {id} failed: {message}")]
    Failed { id: TaskId, message: String },

    #[error("task {id} did not finish within {timeout:?}")]
    TimedOut { id: TaskId, timeout: Duration },

    #[error("task {id} was cancelled before it started")]
    Cancelled { id: TaskId },

    #[error("task {id} did not run because dependency {dependency} failed")]
    DependencyFailed { id: TaskId, dependency: TaskId },
}

impl TaskFailure {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskFailure::Panicked { id, .. }
            | TaskFailure::Failed { id, .. }
            | TaskFailure::TimedOut { id, .. }
            | TaskFailure::Cancelled { id }
            | TaskFailure::DependencyFailed { id, .. } => *id,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Task panics are caught before they can poison anything we hold
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SlotState<R> {
    finished: bool,
    outcome: Option<Result<R, TaskFailure>>,
    listeners: Vec<Listener>,
}

/// Write-once cell a task publishes its outcome into
struct Slot<R> {
    id: TaskId,
    state: Mutex<SlotState<R>>,
    ready: Condvar,
}

enum Wait<R> {
    Done(Result<R, TaskFailure>),
    Elapsed,
}

impl<R> Slot<R> {
    fn new(id: TaskId) -> Self {
        Slot {
            id,
            state: Mutex::new(SlotState {
                finished: false,
                outcome: None,
                listeners: Vec::new(),
            }),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Result<R, TaskFailure>) {
        let listeners = {
            let mut state = lock(&self.state);
            if state.finished {
                return;
            }
            state.finished = true;
            state.outcome = Some(outcome);
            std::mem::take(&mut state.listeners)
        };
        self.ready.notify_all();
        for listener in listeners {
            listener();
        }
    }

    /// Run `listener` once the slot is filled (immediately if it already is)
    fn on_complete(&self, listener: Listener) {
        let mut state = lock(&self.state);
        if state.finished {
            drop(state);
            listener();
        } else {
            state.listeners.push(listener);
        }
    }

    fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }

    fn take(&self) -> Result<R, TaskFailure> {
        lock(&self.state).outcome.take().unwrap_or_else(|| {
            Err(TaskFailure::Failed {
                id: self.id,
                message: "result was already taken".to_string(),
            })
        })
    }

    fn wait(&self, deadline: Option<Instant>) -> Wait<R> {
        let mut state = lock(&self.state);
        while !state.finished {
            match deadline {
                None => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wait::Elapsed;
                    }
                    state = self
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        drop(state);
        Wait::Done(self.take())
    }
}

/// Handle to a submitted task
///
/// Consumed by [`Dispatcher::collect`] or [`Dispatcher::submit_dependent`].
pub struct TaskHandle<R> {
    id: TaskId,
    slot: Arc<Slot<R>>,
    // Own flag first, then the flags of everything upstream
    cancel: Vec<Arc<AtomicBool>>,
}

impl<R> TaskHandle<R> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.slot.is_finished()
    }

    /// Ask this task and its dependencies not to start
    pub fn cancel(&self) {
        for flag in &self.cancel {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[derive(Clone)]
enum Spawner {
    Global,
    Dedicated(Arc<ThreadPool>),
}

impl Spawner {
    fn spawn<F: FnOnce() + Send + 'static>(&self, job: F) {
        match self {
            Spawner::Global => rayon::spawn(job),
            Spawner::Dedicated(pool) => pool.spawn(job),
        }
    }
}

#[derive(Default)]
struct Progress {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    callback: Option<ProgressFn>,
}

impl Progress {
    fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    fn tick(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(callback) = &self.callback {
            callback(completed, self.submitted.load(Ordering::SeqCst));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

fn execute<R, E, F>(id: TaskId, cancelled: &AtomicBool, slot: &Slot<R>, job: F)
where
    E: fmt::Display,
    F: FnOnce() -> Result<R, E>,
{
    if cancelled.load(Ordering::SeqCst) {
        slot.complete(Err(TaskFailure::Cancelled { id }));
        return;
    }

    let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::Failed {
            id,
            message: err.to_string(),
        }),
        Err(payload) => Err(TaskFailure::Panicked {
            id,
            message: panic_message(payload.as_ref()),
        }),
    };
    if let Err(failure) = &outcome {
        tracing::debug!(task = id, %failure, "task failed");
    }
    slot.complete(outcome);
}

/// Configures a [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    num_threads: Option<usize>,
    timeout: Option<Duration>,
    progress: Option<ProgressFn>,
}

impl DispatcherBuilder {
    /// Use a dedicated pool with `n` workers instead of rayon's global pool
    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Upper bound on how long a single `collect` call may block
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Called with `(completed, submitted)` after every task finishes
    pub fn progress<P>(mut self, callback: P) -> Self
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<Dispatcher, ThreadPoolBuildError> {
        let spawner = match self.num_threads {
            Some(n) => Spawner::Dedicated(Arc::new(
                rayon::ThreadPoolBuilder::new().num_threads(n).build()?,
            )),
            None => Spawner::Global,
        };
        Ok(Dispatcher {
            spawner,
            timeout: self.timeout,
            next_id: Arc::new(AtomicU64::new(0)),
            progress: Arc::new(Progress {
                callback: self.progress,
                ..Progress::default()
            }),
        })
    }
}

/// Runs tasks on a thread pool; cheap to clone, clones share the pool
#[derive(Clone)]
pub struct Dispatcher {
    spawner: Spawner,
    timeout: Option<Duration>,
    next_id: Arc<AtomicU64>,
    progress: Arc<Progress>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher {
            spawner: Spawner::Global,
            timeout: None,
            next_id: Arc::new(AtomicU64::new(0)),
            progress: Arc::new(Progress::default()),
        }
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn next_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn spawn_task<R, E, F>(&self, job: F) -> TaskHandle<R>
    where
        R: Send + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<R, E> + Send + 'static,
    {
        let id = self.next_id();
        let slot = Arc::new(Slot::new(id));
        let cancelled = Arc::new(AtomicBool::new(false));
        self.progress.submitted();

        let task = {
            let slot = Arc::clone(&slot);
            let cancelled = Arc::clone(&cancelled);
            let progress = Arc::clone(&self.progress);
            move || {
                execute(id, &cancelled, &slot, job);
                progress.tick();
            }
        };
        self.spawner.spawn(task);

        TaskHandle {
            id,
            slot,
            cancel: vec![cancelled],
        }
    }

    /// Run `job` once per input; handles come back in input order
    pub fn submit<I, R, E, F>(&self, job: F, inputs: Vec<I>) -> Vec<TaskHandle<R>>
    where
        I: Send + 'static,
        R: Send + 'static,
        E: fmt::Display,
        F: Fn(I) -> Result<R, E> + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        inputs
            .into_iter()
            .map(|input| {
                let job = Arc::clone(&job);
                self.spawn_task(move || job(input))
            })
            .collect()
    }

    /// Run `job` on the outputs of `depends_on` once all of them have finished
    ///
    /// The job receives the outputs in the order of `depends_on`, whatever
    /// order the dependencies completed in.
    pub fn submit_dependent<A, R, E, F>(&self, job: F, depends_on: Vec<TaskHandle<A>>) -> TaskHandle<R>
    where
        A: Send + 'static,
        R: Send + 'static,
        E: fmt::Display,
        F: FnOnce(Vec<A>) -> Result<R, E> + Send + 'static,
    {
        let id = self.next_id();
        let slot = Arc::new(Slot::new(id));
        let cancelled = Arc::new(AtomicBool::new(false));
        self.progress.submitted();

        let mut cancel = vec![Arc::clone(&cancelled)];
        cancel.extend(depends_on.iter().flat_map(|h| h.cancel.iter().cloned()));
        let upstream: Vec<Arc<Slot<A>>> = depends_on.into_iter().map(|h| h.slot).collect();

        let launch: Listener = {
            let slot = Arc::clone(&slot);
            let spawner = self.spawner.clone();
            let progress = Arc::clone(&self.progress);
            let upstream = upstream.clone();
            Box::new(move || {
                spawner.spawn(move || {
                    match gather(id, &upstream) {
                        Ok(inputs) => execute(id, &cancelled, &slot, move || job(inputs)),
                        Err(failure) => slot.complete(Err(failure)),
                    }
                    progress.tick();
                })
            })
        };

        if upstream.is_empty() {
            launch();
        } else {
            let remaining = Arc::new(AtomicUsize::new(upstream.len()));
            let launch = Arc::new(Mutex::new(Some(launch)));
            for dependency in &upstream {
                let remaining = Arc::clone(&remaining);
                let launch = Arc::clone(&launch);
                dependency.on_complete(Box::new(move || {
                    if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                        if let Some(launch) = lock(&launch).take() {
                            launch();
                        }
                    }
                }));
            }
        }

        TaskHandle { id, slot, cancel }
    }

    /// Block until every handle has an outcome; outcomes come back in handle order
    pub fn collect<R>(&self, handles: Vec<TaskHandle<R>>) -> Vec<Result<R, TaskFailure>> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        handles
            .into_iter()
            .map(|handle| match handle.slot.wait(deadline) {
                Wait::Done(outcome) => outcome,
                Wait::Elapsed => {
                    handle.cancel();
                    let timeout = self.timeout.unwrap_or_default();
                    tracing::warn!(task = handle.id, ?timeout, "task timed out, cancelling");
                    Err(TaskFailure::TimedOut {
                        id: handle.id,
                        timeout,
                    })
                }
            })
            .collect()
    }
}

fn gather<A>(id: TaskId, upstream: &[Arc<Slot<A>>]) -> Result<Vec<A>, TaskFailure> {
    let mut inputs = Vec::with_capacity(upstream.len());
    let mut first_failure = None;
    // Drain every slot even after a failure so no result stays parked
    for dependency in upstream {
        match dependency.take() {
            Ok(value) => inputs.push(value),
            Err(failure) => {
                first_failure.get_or_insert(TaskFailure::DependencyFailed {
                    id,
                    dependency: failure.task_id(),
                });
            }
        }
    }
    match first_failure {
        Some(failure) => Err(failure),
        None => Ok(inputs),
    }
}

/// Run `job` for ids `0..num_tasks` on rayon's global pool
///
/// Convenience wrapper for the common case; outcomes come back in id order.
pub fn run_parallel<R, E, F>(num_tasks: usize, job: F) -> Vec<Result<R, TaskFailure>>
where
    R: Send + 'static,
    E: fmt::Display,
    F: Fn(usize) -> Result<R, E> + Send + Sync + 'static,
{
    let dispatcher = Dispatcher::default();
    let handles = dispatcher.submit(job, (0..num_tasks).collect());
    dispatcher.collect(handles)
}

/// Progress callback that logs every `interval` completed tasks
pub fn simple_progress_reporter(interval: usize) -> impl Fn(usize, usize) + Send + Sync {
    let interval = interval.max(1);
    move |completed, total| {
        if completed % interval == 0 || completed == total {
            tracing::info!("Completed {}/{} tasks", completed, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn square(x: u64) -> Result<u64, String> {
        Ok(x * x)
    }

    #[test]
    fn test_parallel_basic() {
        let results = run_parallel(10, |id| Ok::<_, String>(id * 2));

        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result, &Ok(i * 2));
        }
    }

    #[test]
    fn test_parallel_determinism() {
        let run1 = run_parallel(20, |id| Ok::<_, String>(id as u64 * 7919 % 101));
        let run2 = run_parallel(20, |id| Ok::<_, String>(id as u64 * 7919 % 101));
        assert_eq!(run1, run2);
    }

    #[test]
    fn test_parallel_panic_isolation() {
        let results = run_parallel(10, |id| {
            if id == 5 {
                panic!("Test panic");
            }
            Ok::<_, String>(id)
        });

        assert_eq!(results.len(), 10);
        match &results[5] {
            Err(TaskFailure::Panicked { message, .. }) => assert_eq!(message, "Test panic"),
            other => panic!("expected panic failure, got {:?}", other),
        }
        for (i, result) in results.iter().enumerate() {
            if i != 5 {
                assert!(result.is_ok());
            }
        }
    }

    #[test]
    fn test_task_error_is_reported() {
        let dispatcher = Dispatcher::default();
        let handles = dispatcher.submit(
            |x: i32| if x < 0 { Err("negative") } else { Ok(x) },
            vec![1, -1],
        );
        let results = dispatcher.collect(handles);

        assert_eq!(results[0], Ok(1));
        assert!(matches!(&results[1], Err(TaskFailure::Failed { message, .. }) if message == "negative"));
    }

    #[test]
    fn test_parallel_progress_callback() {
        let completed = Arc::new(Mutex::new(0));
        let completed_clone = Arc::clone(&completed);

        let dispatcher = Dispatcher::builder()
            .progress(move |count, _total| {
                let mut seen = completed_clone.lock().unwrap();
                *seen = (*seen).max(count);
            })
            .build()
            .unwrap();
        let handles = dispatcher.submit(square, vec![1, 2, 3, 4, 5]);
        dispatcher.collect(handles);

        // The final tick may land just after collect returns
        for _ in 0..100 {
            if *completed.lock().unwrap() == 5 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*completed.lock().unwrap(), 5);
    }

    #[test]
    fn test_parallel_custom_threads() {
        let dispatcher = Dispatcher::builder().num_threads(2).build().unwrap();
        let handles = dispatcher.submit(square, (0..8).collect());
        let results = dispatcher.collect(handles);

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_empty_submission() {
        let results = run_parallel(0, |id| Ok::<_, String>(id));
        assert!(results.is_empty());
    }

    #[test]
    fn test_result_ordering_preserved() {
        let dispatcher = Dispatcher::builder().num_threads(4).build().unwrap();
        // Earlier inputs sleep longer so they finish last
        let handles = dispatcher.submit(
            |i: u64| {
                thread::sleep(Duration::from_millis(20 - i));
                Ok::<_, String>(i)
            },
            (0..20).collect(),
        );
        let results = dispatcher.collect(handles);

        for (i, result) in results.iter().enumerate() {
            assert_eq!(result, &Ok(i as u64), "Result ordering not preserved");
        }
    }

    #[test]
    fn dependent_sees_outputs_in_submission_order() {
        let dispatcher = Dispatcher::builder().num_threads(3).build().unwrap();
        let handles = dispatcher.submit(
            |i: u64| {
                thread::sleep(Duration::from_millis(30 - 10 * i));
                Ok::<_, String>(i)
            },
            vec![0, 1, 2],
        );
        let joined = dispatcher.submit_dependent(|values: Vec<u64>| Ok::<_, String>(values), handles);

        assert_eq!(dispatcher.collect(vec![joined]), vec![Ok(vec![0, 1, 2])]);
    }

    #[test]
    fn dependent_waits_for_every_dependency() {
        let dispatcher = Dispatcher::builder().num_threads(4).build().unwrap();
        let finished = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&finished);
        let handles = dispatcher.submit(
            move |ms: u64| {
                thread::sleep(Duration::from_millis(ms));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(ms)
            },
            vec![40, 5, 20, 1],
        );

        let observed = Arc::clone(&finished);
        let barrier = dispatcher.submit_dependent(
            move |values: Vec<u64>| Ok::<_, String>((observed.load(Ordering::SeqCst), values.len())),
            handles,
        );

        assert_eq!(dispatcher.collect(vec![barrier]), vec![Ok((4, 4))]);
    }

    #[test]
    fn dependent_without_dependencies_runs() {
        let dispatcher = Dispatcher::default();
        let handle = dispatcher.submit_dependent(
            |values: Vec<u8>| Ok::<_, String>(values.len()),
            Vec::<TaskHandle<u8>>::new(),
        );
        assert_eq!(dispatcher.collect(vec![handle]), vec![Ok(0)]);
    }

    #[test]
    fn failed_dependency_propagates() {
        let dispatcher = Dispatcher::default();
        let handles = dispatcher.submit(
            |x: i32| if x == 2 { Err("bad input") } else { Ok(x) },
            vec![1, 2, 3],
        );
        let failing_id = handles[1].id();
        let joined = dispatcher.submit_dependent(|values: Vec<i32>| Ok::<_, String>(values.len()), handles);
        let joined_id = joined.id();

        let results = dispatcher.collect(vec![joined]);
        assert_eq!(
            results[0],
            Err(TaskFailure::DependencyFailed {
                id: joined_id,
                dependency: failing_id,
            })
        );
    }

    #[test]
    fn straggler_times_out_without_blocking_the_rest() {
        let dispatcher = Dispatcher::builder()
            .num_threads(2)
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let handles = dispatcher.submit(
            |ms: u64| {
                thread::sleep(Duration::from_millis(ms));
                Ok::<_, String>(ms)
            },
            vec![1, 500],
        );
        let results = dispatcher.collect(handles);

        assert_eq!(results[0], Ok(1));
        assert!(matches!(results[1], Err(TaskFailure::TimedOut { .. })));
    }

    #[test]
    fn cancelled_task_does_not_run() {
        let dispatcher = Dispatcher::builder().num_threads(1).build().unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        // Occupy the only worker so the second task stays queued
        let blocker = dispatcher.submit(
            |ms: u64| {
                thread::sleep(Duration::from_millis(ms));
                Ok::<_, String>(())
            },
            vec![50],
        );
        let flag = Arc::clone(&ran);
        let queued = dispatcher.submit(
            move |_: ()| {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, String>(())
            },
            vec![()],
        );
        queued[0].cancel();

        dispatcher.collect(blocker);
        let results = dispatcher.collect(queued);

        assert!(matches!(results[0], Err(TaskFailure::Cancelled { .. })));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_simple_progress_reporter() {
        let reporter = simple_progress_reporter(10);
        reporter(10, 100);
        reporter(100, 100);
    }
}
