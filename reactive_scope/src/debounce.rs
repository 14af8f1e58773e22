//! Leading/trailing/max-wait debouncing.
//!
//! The debouncer is a small state machine:
//!
//! ```text
//!            call (leading)              call
//!   Idle ──────────────────▶ PendingLeading ──────▶ PendingTrailing
//!    ▲                            │                     │  ▲   │
//!    │         quiet period       │                     │  └───┘ call
//!    ├────────────────────────────┘                     │
//!    │          quiet period (applies the pending value)│
//!    └──────────────────────────────────────────────────┘
//! ```
//!
//! Two timers drive it: the quiet-period timer, restarted by every call, and
//! the max-wait timer, which forces the pending value through when a burst
//! lasts longer than `max_wait`.

use crate::{
    scope::{Disposable, ResourceScope},
    timer::set_timeout,
};
use or_poisoned::OrPoisoned;
use reactive_scope_config::DebounceOptions;
use std::{
    fmt::Debug,
    mem,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use tokio::time::Instant;

/// When a [`Debouncer`] applies the values it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    /// Quiet period that ends a burst.
    pub wait: Duration,
    /// Longest a pending value may wait during a sustained burst.
    pub max_wait: Option<Duration>,
    /// Apply the first value of a burst immediately.
    pub leading: bool,
    /// Apply the last value of a burst when it ends.
    pub trailing: bool,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self::from(&DebounceOptions::default())
    }
}

impl From<&DebounceOptions> for DebouncePolicy {
    fn from(options: &DebounceOptions) -> Self {
        Self {
            wait: options.wait(),
            max_wait: Some(options.max_wait()),
            leading: options.leading,
            trailing: options.trailing,
        }
    }
}

impl DebouncePolicy {
    /// Only the last value of each burst is applied.
    pub fn trailing(wait: Duration) -> Self {
        Self {
            wait,
            max_wait: None,
            leading: false,
            trailing: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebouncePhase {
    /// No burst in progress.
    #[default]
    Idle,
    /// A burst is in progress and nothing is waiting to be applied.
    PendingLeading,
    /// A burst is in progress and a value is waiting for the trailing edge.
    PendingTrailing,
}

struct DebounceState<T> {
    phase: DebouncePhase,
    pending: Option<T>,
    quiet: Option<ResourceScope>,
    max: Option<ResourceScope>,
    last_applied: Option<Instant>,
}

impl<T> Default for DebounceState<T> {
    fn default() -> Self {
        Self {
            phase: DebouncePhase::Idle,
            pending: None,
            quiet: None,
            max: None,
            last_applied: None,
        }
    }
}

struct DebounceInner<T> {
    policy: DebouncePolicy,
    apply: Arc<dyn Fn(T) + Send + Sync>,
    scope: ResourceScope,
    state: Mutex<DebounceState<T>>,
}

/// Rate-limits calls to an `apply` function according to a
/// [`DebouncePolicy`].
pub struct Debouncer<T> {
    inner: Arc<DebounceInner<T>>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debouncer<T>
where
    T: Send + 'static,
{
    /// Creates a debouncer whose timers live in a child of `scope`.
    pub fn new(
        scope: &ResourceScope,
        policy: DebouncePolicy,
        apply: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                policy,
                apply: Arc::new(apply),
                scope: scope.open_child(),
                state: Default::default(),
            }),
        }
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.inner.policy
    }

    pub fn phase(&self) -> DebouncePhase {
        self.inner.state.lock().or_poisoned().phase
    }

    /// Feeds a new value into the debouncer.
    pub fn call(&self, value: T) {
        let inner = &self.inner;
        if inner.scope.is_disposed() {
            return;
        }
        let policy = inner.policy;
        let now = Instant::now();
        let mut stale = Vec::new();
        let mut apply_now = None;
        {
            let mut state = inner.state.lock().or_poisoned();
            match state.phase {
                DebouncePhase::Idle => {
                    state.phase = DebouncePhase::PendingLeading;
                    if policy.leading {
                        tracing::trace!("debounce: leading edge");
                        state.last_applied = Some(now);
                        apply_now = Some(value);
                    } else {
                        state.pending = Some(value);
                        state.phase = DebouncePhase::PendingTrailing;
                    }
                    if let Some(max_wait) = policy.max_wait {
                        stale.extend(state.max.replace(arm(
                            inner,
                            max_wait,
                            DebounceInner::on_max_wait,
                        )));
                    }
                }
                DebouncePhase::PendingLeading
                | DebouncePhase::PendingTrailing => {
                    state.pending = Some(value);
                    state.phase = DebouncePhase::PendingTrailing;
                    let max_wait =
                        policy.max_wait.filter(|_| state.max.is_none());
                    if let Some(max_wait) = max_wait {
                        let since = state
                            .last_applied
                            .map(|at| now.saturating_duration_since(at))
                            .unwrap_or_default();
                        state.max = Some(arm(
                            inner,
                            max_wait.saturating_sub(since),
                            DebounceInner::on_max_wait,
                        ));
                    }
                }
            }
            stale.extend(state.quiet.replace(arm(
                inner,
                policy.wait,
                DebounceInner::on_quiet,
            )));
        }
        for timer in stale {
            timer.dispose();
        }
        if let Some(value) = apply_now {
            (inner.apply)(value);
        }
    }

    /// Drops any pending value and returns to idle.
    pub fn cancel(&self) {
        let state = mem::take(&mut *self.inner.state.lock().or_poisoned());
        state.dispose_timers();
    }

    /// Applies the pending value now, if there is one, and returns to idle.
    pub fn flush(&self) {
        let state = mem::take(&mut *self.inner.state.lock().or_poisoned());
        state.dispose_timers();
        if let Some(value) = state.pending {
            (self.inner.apply)(value);
        }
    }

    /// Cancels pending work and stops accepting values.
    pub fn dispose(&self) {
        self.cancel();
        self.inner.scope.dispose();
    }
}

impl<T> DebounceState<T> {
    fn dispose_timers(&self) {
        for timer in self.quiet.iter().chain(self.max.iter()) {
            timer.dispose();
        }
    }
}

impl<T: Send + 'static> DebounceInner<T> {
    fn on_quiet(this: &Arc<Self>) {
        let (pending, max) = {
            let mut state = this.state.lock().or_poisoned();
            state.quiet = None;
            state.phase = DebouncePhase::Idle;
            let pending = state.pending.take().filter(|_| this.policy.trailing);
            if pending.is_some() {
                state.last_applied = Some(Instant::now());
            }
            (pending, state.max.take())
        };
        if let Some(max) = max {
            max.dispose();
        }
        if let Some(value) = pending {
            tracing::trace!("debounce: trailing edge");
            (this.apply)(value);
        }
    }

    fn on_max_wait(this: &Arc<Self>) {
        let pending = {
            let mut state = this.state.lock().or_poisoned();
            state.max = None;
            let pending = state.pending.take();
            if pending.is_some() {
                state.phase = DebouncePhase::PendingLeading;
                state.last_applied = Some(Instant::now());
                if let Some(max_wait) = this.policy.max_wait {
                    state.max =
                        Some(arm(this, max_wait, DebounceInner::on_max_wait));
                }
            }
            pending
        };
        if let Some(value) = pending {
            tracing::trace!("debounce: max wait elapsed");
            (this.apply)(value);
        }
    }
}

fn arm<T: Send + 'static>(
    inner: &Arc<DebounceInner<T>>,
    delay: Duration,
    fire: fn(&Arc<DebounceInner<T>>),
) -> ResourceScope {
    let weak: Weak<DebounceInner<T>> = Arc::downgrade(inner);
    set_timeout(&inner.scope, delay, move || {
        if let Some(inner) = weak.upgrade() {
            fire(&inner);
        }
    })
}

impl<T: Send + 'static> Disposable for Debouncer<T> {
    fn dispose(&self) {
        Debouncer::dispose(self)
    }
}

impl<T> Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}
