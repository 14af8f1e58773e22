//! A reactive "now" that only changes when something needs it to.

use crate::{
    clock::{MonotonicClock, TimePoint},
    scope::{Disposable, ResourceScope},
    signal::ArcSignal,
    timer::set_timeout,
};
use or_poisoned::OrPoisoned;
use slotmap::{new_key_type, SlotMap};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

new_key_type! {
    struct ScheduleKey;
}

struct CurrentTimeInner {
    clock: MonotonicClock,
    now: ArcSignal<TimePoint>,
    scheduled: Mutex<SlotMap<ScheduleKey, (TimePoint, ResourceScope)>>,
    timer: Mutex<Option<ResourceScope>>,
    scope: ResourceScope,
}

/// Holds the current time, refreshed on demand and at scheduled points.
///
/// Code that displays relative times ("3 minutes ago") schedules the next
/// point at which its output would change instead of refreshing on a fixed
/// tick.
#[derive(Clone)]
pub struct CurrentTime {
    inner: Arc<CurrentTimeInner>,
}

impl CurrentTime {
    pub fn new(scope: &ResourceScope) -> Self {
        Self::with_clock(scope, MonotonicClock::system())
    }

    pub fn with_clock(scope: &ResourceScope, clock: MonotonicClock) -> Self {
        let now = ArcSignal::new(clock.now());
        let inner = Arc::new(CurrentTimeInner {
            clock,
            now,
            scheduled: Default::default(),
            timer: Default::default(),
            scope: scope.open_child(),
        });
        // handles may live in other scopes
        inner.scope.register({
            let weak = Arc::downgrade(&inner);
            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let handles = inner
                    .scheduled
                    .lock()
                    .or_poisoned()
                    .drain()
                    .map(|(_, (_, handle))| handle)
                    .collect::<Vec<_>>();
                for handle in handles {
                    handle.dispose();
                }
            }
        });
        CurrentTime { inner }
    }

    /// The cell holding the time of the last refresh.
    pub fn now(&self) -> ArcSignal<TimePoint> {
        self.inner.now.clone()
    }

    pub fn get(&self) -> TimePoint {
        self.inner.now.get()
    }

    /// Reads the clock, releases scheduled points that have passed, and arms
    /// a timer for the next one.
    pub fn refresh(&self) {
        let inner = &self.inner;
        if inner.scope.is_disposed() {
            return;
        }
        let now = inner.clock.now();
        let mut passed = Vec::new();
        inner.scheduled.lock().or_poisoned().retain(|_, (at, handle)| {
            if *at > now {
                return true;
            }
            passed.push(handle.clone());
            false
        });
        inner.now.set(now);
        for handle in passed {
            handle.dispose();
        }
        self.rearm();
    }

    /// Refreshes at (or just after) `at`. A point that has already passed
    /// refreshes immediately.
    ///
    /// Disposing the returned scope unschedules the point. The scope is
    /// disposed once the point has fired.
    pub fn schedule(&self, at: TimePoint) -> ResourceScope {
        self.schedule_in(&self.inner.scope, at)
    }

    /// Refreshes at `at`, unless `scope` is disposed first.
    pub fn refresh_on(&self, scope: &ResourceScope, at: TimePoint) {
        _ = self.schedule_in(scope, at);
    }

    fn schedule_in(
        &self,
        owner: &ResourceScope,
        at: TimePoint,
    ) -> ResourceScope {
        let inner = &self.inner;
        let handle = owner.open_child();
        if inner.scope.is_disposed() {
            handle.dispose();
        }
        if handle.is_disposed() {
            return handle;
        }
        if at <= inner.clock.now() {
            self.refresh();
            handle.dispose();
            return handle;
        }
        let key = inner
            .scheduled
            .lock()
            .or_poisoned()
            .insert((at, handle.clone()));
        handle.register({
            let weak = Arc::downgrade(inner);
            move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let removed = inner.scheduled.lock().or_poisoned().remove(key);
                if removed.is_some() {
                    CurrentTime { inner }.rearm();
                }
            }
        });
        self.rearm();
        handle
    }

    /// Keeps one refresh scheduled at whatever point `at` holds.
    pub fn refresh_on_signal(
        &self,
        scope: &ResourceScope,
        at: &ArcSignal<Option<TimePoint>>,
    ) {
        let current = Arc::new(Mutex::new(None::<ResourceScope>));
        let reschedule = {
            let this = self.clone();
            let current = Arc::clone(&current);
            move |at: &Option<TimePoint>| {
                let next = at.map(|at| this.schedule(at));
                let previous =
                    std::mem::replace(&mut *current.lock().or_poisoned(), next);
                if let Some(previous) = previous {
                    previous.dispose();
                }
            }
        };
        reschedule(&at.get());
        at.watch(scope, reschedule);
        scope.register(move || {
            if let Some(previous) = current.lock().or_poisoned().take() {
                previous.dispose();
            }
        });
    }

    /// The earliest scheduled point still in the future.
    pub fn next_scheduled(&self) -> Option<TimePoint> {
        let now = self.inner.now.get();
        self.inner
            .scheduled
            .lock()
            .or_poisoned()
            .values()
            .map(|(at, _)| *at)
            .filter(|at| *at > now)
            .reduce(|a, b| if b < a { b } else { a })
    }

    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }

    fn rearm(&self) {
        let inner = &self.inner;
        let next = self.next_scheduled();
        let timer = next.filter(|_| !inner.scope.is_disposed()).map(|at| {
            let delay = at.saturating_duration_since(&inner.clock.now());
            let weak = Arc::downgrade(inner);
            set_timeout(&inner.scope, delay, move || {
                if let Some(inner) = weak.upgrade() {
                    CurrentTime { inner }.refresh();
                }
            })
        });
        let previous =
            std::mem::replace(&mut *inner.timer.lock().or_poisoned(), timer);
        if let Some(previous) = previous {
            previous.dispose();
        }
    }
}

impl Disposable for CurrentTime {
    fn dispose(&self) {
        CurrentTime::dispose(self)
    }
}

impl Debug for CurrentTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentTime")
            .field("now", &self.inner.now.get())
            .field(
                "scheduled",
                &self.inner.scheduled.lock().or_poisoned().len(),
            )
            .finish()
    }
}
