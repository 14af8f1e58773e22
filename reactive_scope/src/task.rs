//! Asynchronous tasks that are superseded whenever their arguments change.
//!
//! An [`AsyncTask`] runs a unary async operation against an argument value.
//! Every run gets a fresh [`CancellationContext`]; starting a new run
//! disposes the previous run's context first, so at most one run is ever
//! current and only the current run may write the task's result and error
//! cells.

use crate::{
    cancel::CancellationContext,
    error::{Error, Result},
    scope::{Disposable, ResourceScope},
    signal::{ArcSignal, LoadingGuard},
};
use any_spawner::Executor;
use futures::{channel::oneshot, future::LocalBoxFuture, FutureExt};
use or_poisoned::OrPoisoned;
use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, RwLock},
    task::{Context, Poll},
};

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPhase {
    /// Nothing has run yet, or the last run stopped of its own accord.
    #[default]
    Idle,
    /// A run is in flight.
    Running,
    /// The current run produced a value.
    Resolved,
    /// The current run failed.
    Rejected,
}

/// How a single run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run produced a value, which is now the task's result.
    Resolved,
    /// The run failed, and its error is now the task's error.
    Rejected,
    /// The operation observed its own cancellation and stopped.
    Canceled,
    /// A newer run started, or the task was disposed, before this one
    /// settled. Nothing it produced was kept.
    Superseded,
}

/// Resolves once the run it was returned for settles or is superseded.
#[must_use = "futures do nothing unless polled"]
pub struct RunCompletion {
    rx: Option<oneshot::Receiver<RunOutcome>>,
}

impl RunCompletion {
    fn superseded() -> Self {
        Self { rx: None }
    }
}

impl Future for RunCompletion {
    type Output = RunOutcome;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<RunOutcome> {
        match self.rx.as_mut() {
            None => Poll::Ready(RunOutcome::Superseded),
            Some(rx) => rx
                .poll_unpin(cx)
                .map(|outcome| outcome.unwrap_or(RunOutcome::Superseded)),
        }
    }
}

type Operation<A, T> = Arc<
    dyn Fn(A, CancellationContext) -> LocalBoxFuture<'static, Result<T>>
        + Send
        + Sync,
>;
type ArgsEqual<A> = Arc<dyn Fn(&A, &A) -> bool + Send + Sync>;
type DefaultValue<T> = Arc<dyn Fn() -> Option<T> + Send + Sync>;

struct TaskInner<A, T> {
    operation: Operation<A, T>,
    args_equal: ArgsEqual<A>,
    keep_latest: bool,
    default_value: DefaultValue<T>,
    value: ArcSignal<Option<T>>,
    error: ArcSignal<Option<Error>>,
    phase: ArcSignal<TaskPhase>,
    loading_count: Option<ArcSignal<usize>>,
    scope: ResourceScope,
    state: RwLock<RunState<A>>,
}

struct RunState<A> {
    context: Option<CancellationContext>,
    current_args: Option<A>,
    source: Option<ArcSignal<Option<A>>>,
}

/// Runs an async operation against a changing argument value.
///
/// ```rust,no_run
/// # async fn demo() {
/// use reactive_scope::{
///     scope::ResourceScope, signal::ArcSignal, task::AsyncTask,
/// };
///
/// let scope = ResourceScope::new();
/// let user_id = ArcSignal::new(None::<u32>);
///
/// let profile = AsyncTask::builder(|id: u32, ctx| async move {
///     ctx.check()?;
///     Ok(format!("user #{id}"))
/// })
/// .args(&user_id)
/// .build(&scope);
///
/// // no run yet: the argument source is not ready
/// user_id.set(Some(7));
/// // a run for 7 is now in flight; setting another id supersedes it
/// user_id.set(Some(8));
/// # }
/// ```
pub struct AsyncTask<A, T> {
    inner: Arc<TaskInner<A, T>>,
}

impl<A, T> Clone for AsyncTask<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> AsyncTask<A, T>
where
    A: Clone + PartialEq + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Starts configuring a task around `operation`.
    ///
    /// The operation receives the arguments and the run's
    /// [`CancellationContext`]. Returning `Err(Error::Canceled)` marks a
    /// voluntary stop, which never populates the error cell.
    pub fn builder<F, Fut>(operation: F) -> AsyncTaskBuilder<A, T>
    where
        F: Fn(A, CancellationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        AsyncTaskBuilder {
            operation: Arc::new(move |args, ctx| {
                operation(args, ctx).boxed_local()
            }),
            args_equal: Arc::new(|a: &A, b: &A| a == b),
            keep_latest: false,
            default_value: Arc::new(|| None),
            loading_count: None,
            args: None,
        }
    }
}

impl<A, T> AsyncTask<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Supersedes any in-flight run and starts a new one with `args`.
    pub fn run(&self, args: A) -> RunCompletion {
        self.start(args)
    }

    /// Reruns with `args`, or with the most recent arguments when `None`.
    ///
    /// Falls back to the current value of the argument source if nothing has
    /// run yet. Fails with [`Error::InvalidState`] when no arguments are
    /// available at all.
    pub fn restart(&self, args: Option<A>) -> Result<RunCompletion> {
        let args = match args {
            Some(args) => Some(args),
            None => {
                let state = self.inner.state.read().or_poisoned();
                state.current_args.clone().or_else(|| {
                    state.source.as_ref().and_then(|source| source.get())
                })
            }
        };
        match args {
            Some(args) => Ok(self.start(args)),
            None => Err(Error::InvalidState(
                "restarting an async task requires arguments, but none have \
                 been supplied"
                    .into(),
            )),
        }
    }

    /// Follows `source`: whenever it yields arguments that differ from the
    /// previous ones, a new run starts. `None` means "not ready" and skips
    /// execution without clearing earlier results.
    ///
    /// The current value is applied immediately.
    pub fn watch_args(&self, source: &ArcSignal<Option<A>>) {
        self.inner.state.write().or_poisoned().source = Some(source.clone());
        let last = Arc::new(Mutex::new(None::<A>));
        let weak = Arc::downgrade(&self.inner);
        let on_change = Arc::new(move |next: &Option<A>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let previous = std::mem::replace(
                &mut *last.lock().or_poisoned(),
                next.clone(),
            );
            let Some(next) = next else {
                return;
            };
            if let Some(previous) = previous {
                if (inner.args_equal)(&previous, next) {
                    return;
                }
            }
            _ = AsyncTask { inner }.start(next.clone());
        });
        on_change(&source.get());
        source.watch(&self.inner.scope, move |value| on_change(value));
    }

    /// The result of the latest resolved run, or the default value.
    pub fn value(&self) -> ArcSignal<Option<T>> {
        self.inner.value.clone()
    }

    /// The error of the latest failed run.
    pub fn error(&self) -> ArcSignal<Option<Error>> {
        self.inner.error.clone()
    }

    pub fn phase(&self) -> ArcSignal<TaskPhase> {
        self.inner.phase.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.phase.get() == TaskPhase::Running
    }

    /// Cancels the current run and stops following the argument source.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
        if self.inner.phase.get() == TaskPhase::Running {
            self.inner.phase.set(TaskPhase::Idle);
        }
    }

    fn start(&self, args: A) -> RunCompletion {
        let inner = &self.inner;
        if inner.scope.is_disposed() {
            return RunCompletion::superseded();
        }

        let context = CancellationContext::child_of(&inner.scope);
        let previous = {
            let mut state = inner.state.write().or_poisoned();
            state.current_args = Some(args.clone());
            state.context.replace(context.clone())
        };
        if let Some(previous) = previous {
            if !previous.is_disposed() {
                tracing::debug!("superseding in-flight async task run");
            }
            previous.dispose();
        }

        inner.error.set(None);
        if !inner.keep_latest {
            inner.value.set((inner.default_value)());
        }
        inner.phase.set(TaskPhase::Running);

        let loading = inner.loading_count.as_ref().map(|counter| {
            let guard = Arc::new(Mutex::new(LoadingGuard::new(counter)));
            context.scope().register({
                let guard = Arc::clone(&guard);
                move || guard.lock().or_poisoned().release()
            });
            guard
        });

        let fut = (inner.operation)(args, context.clone());
        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(inner);
        Executor::spawn_local(async move {
            let result = context.run(fut).await;
            if let Some(loading) = loading {
                loading.lock().or_poisoned().release();
            }
            let outcome = match weak.upgrade() {
                Some(inner) => inner.settle(&context, result),
                None => RunOutcome::Superseded,
            };
            _ = tx.send(outcome);
        });
        RunCompletion { rx: Some(rx) }
    }
}

impl<A, T> TaskInner<A, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn settle(
        &self,
        context: &CancellationContext,
        result: Result<Result<T>, crate::cancel::Canceled>,
    ) -> RunOutcome {
        // only the current run may write observable state
        if context.is_disposed() {
            return RunOutcome::Superseded;
        }
        match result {
            Err(_) => RunOutcome::Superseded,
            Ok(Ok(value)) => {
                self.value.set(Some(value));
                self.phase.set(TaskPhase::Resolved);
                RunOutcome::Resolved
            }
            Ok(Err(err)) if err.is_cancellation() => {
                self.phase.set(TaskPhase::Idle);
                RunOutcome::Canceled
            }
            Ok(Err(err)) => {
                tracing::error!("error in async task: {err}");
                self.error.set(Some(err));
                self.phase.set(TaskPhase::Rejected);
                RunOutcome::Rejected
            }
        }
    }
}

impl<A, T> Disposable for AsyncTask<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) {
        AsyncTask::dispose(self)
    }
}

impl<A, T> Debug for AsyncTask<A, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTask")
            .field("scope", &self.inner.scope)
            .field("keep_latest", &self.inner.keep_latest)
            .finish_non_exhaustive()
    }
}

/// Configures an [`AsyncTask`].
pub struct AsyncTaskBuilder<A, T> {
    operation: Operation<A, T>,
    args_equal: ArgsEqual<A>,
    keep_latest: bool,
    default_value: DefaultValue<T>,
    loading_count: Option<ArcSignal<usize>>,
    args: Option<ArcSignal<Option<A>>>,
}

impl<A, T> AsyncTaskBuilder<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Replaces the equality used to decide whether new arguments from the
    /// source warrant a new run.
    pub fn args_equal(
        mut self,
        args_equal: impl Fn(&A, &A) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.args_equal = Arc::new(args_equal);
        self
    }

    /// Keeps the previous result visible while a new run is in flight,
    /// instead of resetting it to the default value.
    pub fn keep_latest(mut self, keep_latest: bool) -> Self {
        self.keep_latest = keep_latest;
        self
    }

    /// The value the result cell holds before the first run resolves, and
    /// after every reset.
    pub fn default_value(
        mut self,
        default_value: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        self.default_value = Arc::new(move || Some(default_value()));
        self
    }

    /// A counter shared with other tasks, incremented once per pending run.
    pub fn loading_count(mut self, counter: &ArcSignal<usize>) -> Self {
        self.loading_count = Some(counter.clone());
        self
    }

    /// Runs automatically whenever `source` yields new arguments.
    pub fn args(mut self, source: &ArcSignal<Option<A>>) -> Self {
        self.args = Some(source.clone());
        self
    }

    /// Creates the task inside a child of `scope`. The task stays alive
    /// until `scope` is disposed, even if every handle is dropped.
    pub fn build(self, scope: &ResourceScope) -> AsyncTask<A, T> {
        let task = AsyncTask {
            inner: Arc::new(TaskInner {
                operation: self.operation,
                args_equal: self.args_equal,
                keep_latest: self.keep_latest,
                value: ArcSignal::new((self.default_value)()),
                default_value: self.default_value,
                error: ArcSignal::new(None),
                phase: ArcSignal::new(TaskPhase::Idle),
                loading_count: self.loading_count,
                scope: scope.open_child(),
                state: RwLock::new(RunState {
                    context: None,
                    current_args: None,
                    source: None,
                }),
            }),
        };
        if let Some(source) = &self.args {
            task.watch_args(source);
        }
        scope.own(task)
    }
}
