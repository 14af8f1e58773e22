//! Self-rescheduling update loops.
//!
//! A [`PollingLoop`] runs an async update, waits for it, and asks a
//! [`Scheduler`] when to run it again. Each cycle gets its own
//! [`CancellationContext`], and starting a cycle disposes the previous one,
//! so at most one iteration is ever in flight.

use crate::{
    cancel::{CancellationContext, Canceled},
    error::{Error, OperationError, Result},
    scope::{Disposable, ResourceScope},
    signal::ArcSignal,
    timer::set_timeout,
};
use any_spawner::Executor;
use futures::{future::LocalBoxFuture, FutureExt};
use or_poisoned::OrPoisoned;
use reactive_scope_config::RuntimeOptions;
use std::{
    fmt::Debug,
    future::Future,
    ops::ControlFlow,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};
use tokio::time::Instant;

/// A continuation waiting to be scheduled.
pub type Continuation = Box<dyn FnOnce() + 'static>;

/// Decides when the next cycle of a [`PollingLoop`] runs.
///
/// The continuation must be tied to `scope`: once `scope` is disposed it
/// must never run. Returning an error stops the loop.
pub trait Scheduler: Send + Sync {
    fn schedule(
        &self,
        scope: &ResourceScope,
        next: Continuation,
    ) -> Result<(), OperationError>;
}

impl<F> Scheduler for F
where
    F: Fn(&ResourceScope, Continuation) -> Result<(), OperationError>
        + Send
        + Sync,
{
    fn schedule(
        &self,
        scope: &ResourceScope,
        next: Continuation,
    ) -> Result<(), OperationError> {
        self(scope, next)
    }
}

/// Runs the next cycle at the next multiple of a fixed frame interval.
#[derive(Debug, Clone, Copy)]
pub struct FrameScheduler {
    interval: Duration,
    origin: Instant,
}

impl FrameScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            origin: Instant::now(),
        }
    }

    fn delay(&self) -> Duration {
        let interval = self.interval.as_micros().max(1);
        let elapsed = self.origin.elapsed().as_micros();
        let remaining = interval - elapsed % interval;
        Duration::from_micros(remaining as u64)
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(RuntimeOptions::default().frame_interval())
    }
}

impl Scheduler for FrameScheduler {
    fn schedule(
        &self,
        scope: &ResourceScope,
        next: Continuation,
    ) -> Result<(), OperationError> {
        _ = set_timeout(scope, self.delay(), next);
        Ok(())
    }
}

/// Runs the next cycle a fixed time after the previous one finished.
#[derive(Debug, Clone, Copy)]
pub struct IntervalScheduler(pub Duration);

impl Scheduler for IntervalScheduler {
    fn schedule(
        &self,
        scope: &ResourceScope,
        next: Continuation,
    ) -> Result<(), OperationError> {
        _ = set_timeout(scope, self.0, next);
        Ok(())
    }
}

/// Waits exponentially longer before each cycle, up to a ceiling.
///
/// Call [`BackoffScheduler::reset`] (for example after a successful update)
/// to return to the base delay. Clones share the attempt counter, so the
/// update can keep a clone to reset it.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    base: Duration,
    max: Duration,
    factor: u32,
    attempt: Arc<AtomicU32>,
}

impl BackoffScheduler {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            factor: 2,
            attempt: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::Relaxed);
    }

    /// The delay the next call to `schedule` will use.
    pub fn next_delay(&self) -> Duration {
        let attempt = self.attempt.load(Ordering::Relaxed);
        self.factor
            .checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Scheduler for BackoffScheduler {
    fn schedule(
        &self,
        scope: &ResourceScope,
        next: Continuation,
    ) -> Result<(), OperationError> {
        let delay = self.next_delay();
        self.attempt.fetch_add(1, Ordering::Relaxed);
        _ = set_timeout(scope, delay, next);
        Ok(())
    }
}

type Update = Arc<
    dyn Fn(CancellationContext) -> LocalBoxFuture<'static, Result<()>>
        + Send
        + Sync,
>;
type OnError = Arc<dyn Fn(&Error) -> ControlFlow<()> + Send + Sync>;

struct LoopInner {
    update: Update,
    scheduler: Arc<dyn Scheduler>,
    on_error: OnError,
    paused: ArcSignal<bool>,
    scope: ResourceScope,
    state: Mutex<LoopState>,
}

#[derive(Default)]
struct LoopState {
    /// Lives from one resume to the next pause, and parents every cycle.
    session: Option<ResourceScope>,
    active: Option<CancellationContext>,
}

/// A loop that repeatedly runs an async update until it is paused or
/// disposed.
#[derive(Clone)]
pub struct PollingLoop {
    inner: Arc<LoopInner>,
}

impl PollingLoop {
    /// Starts building a loop around `update`.
    pub fn builder<F, Fut>(update: F) -> PollingLoopBuilder
    where
        F: Fn(CancellationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        PollingLoopBuilder {
            update: Arc::new(move |ctx| update(ctx).boxed_local()),
            scheduler: None,
            on_error: None,
            paused: None,
        }
    }

    /// Pauses the loop, canceling the cycle in flight.
    pub fn pause(&self) {
        self.set_paused(true);
    }

    /// Resumes the loop with a fresh cycle. Also restarts a loop that was
    /// halted by an error.
    pub fn resume(&self) {
        self.set_paused(false);
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.paused.set(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Whether a cycle is running or scheduled.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().or_poisoned().session.is_some()
    }

    /// Stops the loop for good.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }
}

impl LoopInner {
    fn on_pause_changed(this: &Arc<Self>, paused: bool) {
        if paused {
            tracing::trace!("polling loop paused");
            this.halt();
        } else {
            Self::begin_session(this);
        }
    }

    fn begin_session(this: &Arc<Self>) {
        let session = {
            let mut state = this.state.lock().or_poisoned();
            if state.session.is_some() {
                return;
            }
            let session = this.scope.open_child();
            if session.is_disposed() {
                return;
            }
            state.session = Some(session.clone());
            session
        };
        Self::cycle(this, session);
    }

    fn halt(&self) {
        let (session, active) = {
            let mut state = self.state.lock().or_poisoned();
            (state.session.take(), state.active.take())
        };
        if let Some(active) = active {
            active.dispose();
        }
        if let Some(session) = session {
            session.dispose();
        }
    }

    fn cycle(this: &Arc<Self>, session: ResourceScope) {
        let ctx = CancellationContext::child_of(&session);
        if ctx.is_disposed() {
            return;
        }
        let previous =
            this.state.lock().or_poisoned().active.replace(ctx.clone());
        if let Some(previous) = previous {
            previous.dispose();
        }

        let fut = (this.update)(ctx.clone());
        let weak = Arc::downgrade(this);
        Executor::spawn_local(async move {
            let result = ctx.run(fut).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            if ctx.is_disposed() {
                // paused, disposed, or replaced while the update ran
                return;
            }
            match result {
                Err(Canceled) => return,
                Ok(Err(err)) if err.is_cancellation() => {
                    tracing::trace!("polling cycle stopped itself");
                }
                Ok(Err(err)) => {
                    tracing::error!("polling cycle failed: {err}");
                    if (this.on_error)(&err).is_break() {
                        this.halt();
                        return;
                    }
                }
                Ok(Ok(())) => {}
            }
            Self::schedule_next(&this, session, ctx);
        });
    }

    fn schedule_next(
        this: &Arc<Self>,
        session: ResourceScope,
        ctx: CancellationContext,
    ) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let next_session = session.clone();
        let scheduled = this.scheduler.schedule(
            ctx.scope(),
            Box::new(move || {
                if let Some(this) = weak.upgrade() {
                    Self::cycle(&this, next_session);
                }
            }),
        );
        if let Err(err) = scheduled {
            ctx.dispose();
            let err = Error::Scheduling(err);
            tracing::error!("polling loop stopped: {err}");
            this.halt();
            _ = (this.on_error)(&err);
        }
    }
}

impl Disposable for PollingLoop {
    fn dispose(&self) {
        PollingLoop::dispose(self)
    }
}

impl Debug for PollingLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingLoop")
            .field("paused", &self.is_paused())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Configures and starts a [`PollingLoop`].
#[must_use]
pub struct PollingLoopBuilder {
    update: Update,
    scheduler: Option<Arc<dyn Scheduler>>,
    on_error: Option<OnError>,
    paused: Option<ArcSignal<bool>>,
}

impl PollingLoopBuilder {
    /// Replaces the default [`FrameScheduler`].
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Uses a [`FrameScheduler`] with the configured frame interval.
    pub fn options(mut self, options: &RuntimeOptions) -> Self {
        self.scheduler =
            Some(Arc::new(FrameScheduler::new(options.frame_interval())));
        self
    }

    /// Decides what happens after a cycle fails. Returning
    /// [`ControlFlow::Break`] stops the loop; the default logs the error and
    /// continues.
    pub fn on_error(
        mut self,
        on_error: impl Fn(&Error) -> ControlFlow<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Drives pausing from an external flag.
    pub fn paused(mut self, paused: &ArcSignal<bool>) -> Self {
        self.paused = Some(paused.clone());
        self
    }

    /// Starts the loop inside a child of `scope`, which keeps it alive until
    /// disposed. Unless the pause flag is set, the first cycle starts
    /// immediately.
    pub fn start(self, scope: &ResourceScope) -> PollingLoop {
        let inner = Arc::new(LoopInner {
            update: self.update,
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(FrameScheduler::default())),
            on_error: self
                .on_error
                .unwrap_or_else(|| Arc::new(|_| ControlFlow::Continue(()))),
            paused: self.paused.unwrap_or_default(),
            scope: scope.open_child(),
            state: Default::default(),
        });
        inner.scope.register({
            let weak = Arc::downgrade(&inner);
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.halt();
                }
            }
        });
        inner.paused.watch(&inner.scope, {
            let weak = Arc::downgrade(&inner);
            move |paused| {
                if let Some(inner) = weak.upgrade() {
                    LoopInner::on_pause_changed(&inner, *paused);
                }
            }
        });
        if !inner.paused.get() {
            LoopInner::begin_session(&inner);
        }
        scope.own(PollingLoop { inner })
    }
}
