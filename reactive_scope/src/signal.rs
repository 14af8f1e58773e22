//! Observable cells.
//!
//! An [`ArcSignal`] holds a value and notifies its watchers synchronously
//! whenever the value is written. Signals are the reactive inputs of the
//! runtime (task arguments, subscription parameters, pause flags) and its
//! reactive outputs (results, errors, loading counters).

use crate::scope::ResourceScope;
use or_poisoned::OrPoisoned;
use slotmap::{new_key_type, SlotMap};
use std::{
    fmt::Debug,
    sync::{Arc, RwLock, Weak},
};

new_key_type! {
    /// Identifies a watcher registered with [`ArcSignal::subscribe`].
    pub struct WatcherKey;
}

type Watcher<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SignalInner<T> {
    value: RwLock<T>,
    watchers: RwLock<SlotMap<WatcherKey, Watcher<T>>>,
}

/// A reference-counted, observable value.
///
/// ```rust
/// use reactive_scope::{scope::ResourceScope, signal::ArcSignal};
/// use std::sync::{Arc, Mutex};
///
/// let scope = ResourceScope::new();
/// let count = ArcSignal::new(0);
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// count.watch(&scope, {
///     let seen = Arc::clone(&seen);
///     move |n| seen.lock().unwrap().push(*n)
/// });
///
/// count.set(1);
/// count.update(|n| *n += 1);
/// scope.dispose();
/// count.set(3);
/// assert_eq!(*seen.lock().unwrap(), [1, 2]);
/// ```
pub struct ArcSignal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for ArcSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for ArcSignal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> ArcSignal<T> {
    /// Creates a signal holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                value: RwLock::new(value),
                watchers: Default::default(),
            }),
        }
    }

    /// Applies `fun` to the current value without cloning it.
    pub fn with<U>(&self, fun: impl FnOnce(&T) -> U) -> U {
        fun(&self.inner.value.read().or_poisoned())
    }

    /// Whether two handles refer to the same signal.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().or_poisoned().len()
    }

    /// Removes a watcher added with [`ArcSignal::subscribe`].
    pub fn unsubscribe(&self, key: WatcherKey) {
        self.inner.watchers.write().or_poisoned().remove(key);
    }
}

impl<T> ArcSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.read().or_poisoned().clone()
    }

    /// Replaces the value and notifies watchers.
    pub fn set(&self, value: T) {
        *self.inner.value.write().or_poisoned() = value;
        self.notify();
    }

    /// Mutates the value in place and notifies watchers.
    pub fn update(&self, fun: impl FnOnce(&mut T)) {
        fun(&mut self.inner.value.write().or_poisoned());
        self.notify();
    }

    /// Registers a watcher that runs after every write, until it is removed
    /// with [`ArcSignal::unsubscribe`].
    pub fn subscribe(
        &self,
        watcher: impl Fn(&T) + Send + Sync + 'static,
    ) -> WatcherKey {
        self.inner
            .watchers
            .write()
            .or_poisoned()
            .insert(Arc::new(watcher))
    }

    /// Registers a watcher that is removed when `scope` is disposed.
    ///
    /// The watcher is not called with the current value; callers that need
    /// that read it with [`ArcSignal::get`] first.
    pub fn watch(
        &self,
        scope: &ResourceScope,
        watcher: impl Fn(&T) + Send + Sync + 'static,
    ) {
        let key = self.subscribe(watcher);
        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        scope.register(move || {
            if let Some(inner) = weak.upgrade() {
                inner.watchers.write().or_poisoned().remove(key);
            }
        });
    }

    fn notify(&self) {
        let watchers = self
            .inner
            .watchers
            .read()
            .or_poisoned()
            .values()
            .cloned()
            .collect::<Vec<_>>();
        if watchers.is_empty() {
            return;
        }
        let value = self.get();
        for watcher in watchers {
            watcher(&value);
        }
    }
}

impl<T> ArcSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Writes `value` only if it differs from the current value. Returns
    /// whether watchers were notified.
    pub fn set_if_changed(&self, value: T) -> bool {
        {
            let mut lock = self.inner.value.write().or_poisoned();
            if *lock == value {
                return false;
            }
            *lock = value;
        }
        self.notify();
        true
    }
}

impl<T: Debug> Debug for ArcSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArcSignal")
            .field("value", &*self.inner.value.read().or_poisoned())
            .finish()
    }
}

/// Holds one increment of a shared loading counter.
///
/// The counter is incremented when the guard is created and decremented
/// exactly once, either by [`LoadingGuard::release`] or when the guard is
/// dropped.
#[derive(Debug)]
#[must_use]
pub struct LoadingGuard {
    counter: Option<ArcSignal<usize>>,
}

impl LoadingGuard {
    pub fn new(counter: &ArcSignal<usize>) -> Self {
        counter.update(|n| *n += 1);
        Self {
            counter: Some(counter.clone()),
        }
    }

    pub fn release(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.update(|n| *n = n.saturating_sub(1));
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.release();
    }
}
