//! Cancellation signals and the contexts that own them.
//!
//! A [`CancellationContext`] pairs a [`ResourceScope`] with a lazily-created
//! [`CancellationSignal`]. Disposing the context fires the signal; nothing
//! else does. Most units of work never ask for the signal, so it is only
//! built on first access.

use crate::scope::{Disposable, ResourceScope};
use futures::task::AtomicWaker;
use or_poisoned::OrPoisoned;
use pin_project_lite::pin_project;
use slotmap::{new_key_type, SlotMap};
use std::{
    fmt::Debug,
    future::Future,
    mem,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    task::{Context, Poll},
};
use thiserror::Error;

/// Returned when a unit of work stops because its context was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation was canceled")]
pub struct Canceled;

new_key_type! {
    /// Identifies a listener registered with [`CancellationSignal::on_cancel`].
    pub struct CancelListenerKey;
}

type Listener = Box<dyn FnOnce() + Send + Sync>;

#[derive(Default)]
struct SignalInner {
    canceled: AtomicBool,
    listeners: Mutex<SlotMap<CancelListenerKey, Listener>>,
}

/// An observable flag indicating that a unit of work has been abandoned.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

impl CancellationSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether the signal has fired.
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Returns `Err(Canceled)` once the signal has fired.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    /// Runs `listener` when the signal fires, or immediately if it already
    /// has.
    pub fn on_cancel(
        &self,
        listener: impl FnOnce() + Send + Sync + 'static,
    ) -> CancelListenerKey {
        let mut listeners = self.inner.listeners.lock().or_poisoned();
        if self.is_canceled() {
            drop(listeners);
            listener();
            CancelListenerKey::default()
        } else {
            listeners.insert(Box::new(listener))
        }
    }

    /// Removes a listener that has not run yet.
    pub fn remove_listener(&self, key: CancelListenerKey) {
        self.inner.listeners.lock().or_poisoned().remove(key);
    }

    /// A future that resolves once the signal fires.
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            signal: self.clone(),
            registration: None,
        }
    }

    pub(crate) fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        let listeners =
            mem::take(&mut *self.inner.listeners.lock().or_poisoned());
        for (_, listener) in listeners {
            listener();
        }
    }
}

impl Debug for CancellationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Future returned by [`CancellationSignal::cancelled`].
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled {
    signal: CancellationSignal,
    registration: Option<(CancelListenerKey, Arc<AtomicWaker>)>,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.is_canceled() {
            return Poll::Ready(());
        }
        match &self.registration {
            Some((_, waker)) => waker.register(cx.waker()),
            None => {
                let waker = Arc::new(AtomicWaker::new());
                waker.register(cx.waker());
                let key = self.signal.on_cancel({
                    let waker = Arc::clone(&waker);
                    move || waker.wake()
                });
                self.registration = Some((key, waker));
            }
        }
        // the signal may have fired between the first check and registration
        if self.signal.is_canceled() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Drop for Cancelled {
    fn drop(&mut self) {
        if let Some((key, _)) = self.registration.take() {
            self.signal.remove_listener(key);
        }
    }
}

pin_project! {
    /// A future raced against a cancellation signal.
    ///
    /// Resolves to `Err(Canceled)` as soon as the signal fires; the inner
    /// future is not polled again after that.
    #[must_use = "futures do nothing unless polled"]
    pub struct WithCancel<F> {
        #[pin]
        fut: F,
        cancelled: Cancelled,
    }
}

impl<F> Future for WithCancel<F>
where
    F: Future,
{
    type Output = Result<F::Output, Canceled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if Pin::new(this.cancelled).poll(cx).is_ready() {
            return Poll::Ready(Err(Canceled));
        }
        this.fut.poll(cx).map(Ok)
    }
}

/// Races `fut` against `signal`.
pub fn with_cancel<F: Future>(
    fut: F,
    signal: &CancellationSignal,
) -> WithCancel<F> {
    WithCancel {
        fut,
        cancelled: signal.cancelled(),
    }
}

/// A [`ResourceScope`] paired with a lazily-created [`CancellationSignal`].
///
/// One context is created per task run, poll cycle or live subscription, and
/// disposed when that unit of work is superseded or its owner goes away.
#[derive(Clone, Default)]
#[must_use]
pub struct CancellationContext {
    scope: ResourceScope,
    signal: Arc<OnceLock<CancellationSignal>>,
}

impl CancellationContext {
    /// Creates a context with its own root scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose scope is a child of `parent`, so disposing the
    /// parent cancels it.
    pub fn child_of(parent: &ResourceScope) -> Self {
        Self {
            scope: parent.open_child(),
            signal: Default::default(),
        }
    }

    /// The scope owned by this context. Resources acquired by the unit of
    /// work should be registered here.
    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }

    /// Returns the cancellation signal, creating it on first use.
    ///
    /// If the context has already been disposed, the returned signal has
    /// already fired.
    pub fn signal(&self) -> CancellationSignal {
        self.signal
            .get_or_init(|| {
                let signal = CancellationSignal::new();
                self.scope.register({
                    let signal = signal.clone();
                    move || signal.cancel()
                });
                signal
            })
            .clone()
    }

    /// Whether the context has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }

    /// Returns `Err(Canceled)` once the context has been disposed.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_disposed() {
            Err(Canceled)
        } else {
            Ok(())
        }
    }

    /// Runs `fut` until it completes or this context is disposed.
    pub fn run<F: Future>(&self, fut: F) -> WithCancel<F> {
        with_cancel(fut, &self.signal())
    }

    /// Disposes the owned scope, firing the signal if it exists.
    pub fn dispose(&self) {
        self.scope.dispose();
    }
}

impl Disposable for CancellationContext {
    fn dispose(&self) {
        CancellationContext::dispose(self)
    }
}

impl Debug for CancellationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationContext")
            .field("scope", &self.scope)
            .field("signal", &self.signal.get())
            .finish()
    }
}
