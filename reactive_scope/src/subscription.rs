//! Live subscriptions that follow reactive parameters.
//!
//! A [`LiveSubscription`] keeps exactly one subscription current for the
//! latest parameters. Parameter changes are debounced. When new parameters
//! are applied, the new subscription is opened first and the previous one
//! is torn down only after a short grace period, so there is never a gap in
//! delivery. Consumers must tolerate the duplicate items that can arrive
//! while both are live.

use crate::{
    backend::{OperationDescriptor, Subscribe},
    cancel::{CancellationContext, Canceled},
    debounce::{DebouncePolicy, Debouncer},
    error::{Error, Result},
    scope::{Disposable, ResourceScope},
    signal::ArcSignal,
    timer::set_timeout,
};
use any_spawner::Executor;
use futures::{stream::LocalBoxStream, Stream, StreamExt};
use or_poisoned::OrPoisoned;
use reactive_scope_config::RuntimeOptions;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex, OnceLock, Weak},
    time::Duration,
};

type Open<P, T> = Arc<
    dyn Fn(&P) -> Result<LocalBoxStream<'static, Result<T>>> + Send + Sync,
>;
type OnNext<T> = Arc<dyn Fn(T) + Send + Sync>;
type OnError = Arc<dyn Fn(&Error) + Send + Sync>;

/// One physical subscription.
#[derive(Clone)]
pub struct SubscriptionHandle<P> {
    params: P,
    context: CancellationContext,
}

impl<P> SubscriptionHandle<P> {
    pub fn params(&self) -> &P {
        &self.params
    }

    pub fn is_live(&self) -> bool {
        !self.context.is_disposed()
    }

    pub fn dispose(&self) {
        self.context.dispose();
    }
}

impl<P: Debug> Debug for SubscriptionHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("params", &self.params)
            .field("live", &self.is_live())
            .finish()
    }
}

struct ManagerState<P> {
    current: Option<SubscriptionHandle<P>>,
    handles: Vec<SubscriptionHandle<P>>,
    requested: Option<P>,
}

impl<P> Default for ManagerState<P> {
    fn default() -> Self {
        Self {
            current: None,
            handles: Vec::new(),
            requested: None,
        }
    }
}

struct ManagerInner<P, T> {
    open: Open<P, T>,
    on_next: OnNext<T>,
    on_error: OnError,
    grace: Duration,
    scope: ResourceScope,
    debouncer: OnceLock<Debouncer<P>>,
    state: Mutex<ManagerState<P>>,
}

/// Keeps one subscription current for the latest parameters.
pub struct LiveSubscription<P, T> {
    inner: Arc<ManagerInner<P, T>>,
}

impl<P, T> Clone for LiveSubscription<P, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, T> LiveSubscription<P, T>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    T: 'static,
{
    /// Starts configuring a subscription manager.
    ///
    /// `open` is called with each applied set of parameters and returns the
    /// stream of items for them. Dropping the stream must end the
    /// subscription.
    pub fn builder<F, S>(open: F) -> LiveSubscriptionBuilder<P, T>
    where
        F: Fn(&P) -> Result<S> + Send + Sync + 'static,
        S: Stream<Item = Result<T>> + 'static,
    {
        LiveSubscriptionBuilder {
            open: Arc::new(move |params| {
                open(params).map(StreamExt::boxed_local)
            }),
            on_next: Arc::new(|_| {}),
            on_error: Arc::new(|_| {}),
            policy: DebouncePolicy::default(),
            grace: RuntimeOptions::default().handoff_grace(),
            params: None,
        }
    }

    /// Requests a subscription for `params`, or none at all.
    ///
    /// New parameters go through the debouncer. `None` cancels anything
    /// still waiting in the debouncer and disposes the current subscription
    /// immediately.
    pub fn set_params(&self, params: Option<P>) {
        let inner = &self.inner;
        if inner.scope.is_disposed() {
            return;
        }
        match params {
            None => {
                if let Some(debouncer) = inner.debouncer.get() {
                    debouncer.cancel();
                }
                let current = {
                    let mut state = inner.state.lock().or_poisoned();
                    state.requested = None;
                    state.current.take()
                };
                if let Some(current) = current {
                    tracing::debug!("subscription parameters cleared");
                    current.dispose();
                }
            }
            Some(params) => {
                {
                    let mut state = inner.state.lock().or_poisoned();
                    // a failed current subscription may be reopened
                    let duplicate = state.requested.as_ref() == Some(&params)
                        && state
                            .current
                            .as_ref()
                            .is_none_or(SubscriptionHandle::is_live);
                    if duplicate {
                        return;
                    }
                    state.requested = Some(params.clone());
                }
                if let Some(debouncer) = inner.debouncer.get() {
                    debouncer.call(params);
                }
            }
        }
    }

    /// The subscription that is currently conceptually active.
    pub fn current(&self) -> Option<SubscriptionHandle<P>> {
        self.inner
            .state
            .lock()
            .or_poisoned()
            .current
            .clone()
            .filter(SubscriptionHandle::is_live)
    }

    pub fn current_params(&self) -> Option<P> {
        self.current().map(|handle| handle.params)
    }

    /// The number of physically live subscriptions, including any that are
    /// still inside their handoff grace period.
    pub fn handle_count(&self) -> usize {
        let mut state = self.inner.state.lock().or_poisoned();
        state.handles.retain(SubscriptionHandle::is_live);
        state.handles.len()
    }

    /// Tears down every live subscription and stops following parameters.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }
}

impl<P, T> ManagerInner<P, T>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    T: 'static,
{
    fn apply(&self, params: P) {
        if self.scope.is_disposed() {
            return;
        }
        {
            let state = self.state.lock().or_poisoned();
            if state.requested.as_ref() != Some(&params) {
                // cleared while the debouncer was flushing
                return;
            }
            if state.current.as_ref().is_some_and(|current| {
                current.is_live() && current.params == params
            }) {
                return;
            }
        }

        let opened = self.open_handle(params);
        let previous = {
            let mut state = self.state.lock().or_poisoned();
            state.handles.retain(SubscriptionHandle::is_live);
            if let Ok(handle) = &opened {
                state.handles.push(handle.clone());
            }
            let next = opened.as_ref().ok().cloned();
            std::mem::replace(&mut state.current, next)
        };

        match (previous, opened) {
            (Some(previous), Ok(_)) if previous.is_live() => {
                tracing::debug!(
                    "new subscription established, retiring the previous \
                     one in {:?}",
                    self.grace
                );
                let retiring = previous.context.clone();
                _ = set_timeout(
                    previous.context.scope(),
                    self.grace,
                    move || retiring.dispose(),
                );
            }
            (previous, Err(err)) => {
                self.state.lock().or_poisoned().requested = None;
                if let Some(previous) = previous {
                    previous.dispose();
                }
                tracing::error!("failed to open subscription: {err}");
                (self.on_error)(&err);
            }
            _ => {}
        }
    }

    fn open_handle(&self, params: P) -> Result<SubscriptionHandle<P>> {
        let mut stream = (self.open)(&params)?;
        let context = CancellationContext::child_of(&self.scope);
        let on_next = Arc::clone(&self.on_next);
        let on_error = Arc::clone(&self.on_error);
        let pump = context.clone();
        Executor::spawn_local(async move {
            loop {
                let item = match pump.run(stream.next()).await {
                    Err(Canceled) | Ok(None) => break,
                    Ok(Some(item)) => item,
                };
                if pump.is_disposed() {
                    break;
                }
                match item {
                    Ok(item) => on_next(item),
                    Err(err) if err.is_cancellation() => break,
                    Err(err) => {
                        pump.dispose();
                        tracing::error!("subscription failed: {err}");
                        on_error(&err);
                        break;
                    }
                }
            }
            pump.dispose();
        });
        Ok(SubscriptionHandle { params, context })
    }
}

impl<P, T> Disposable for LiveSubscription<P, T>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    T: 'static,
{
    fn dispose(&self) {
        LiveSubscription::dispose(self)
    }
}

impl<P: Debug, T> Debug for LiveSubscription<P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("current", &self.inner.state.lock().or_poisoned().current)
            .field("grace", &self.inner.grace)
            .finish_non_exhaustive()
    }
}

/// Configures a [`LiveSubscription`].
#[must_use]
pub struct LiveSubscriptionBuilder<P, T> {
    open: Open<P, T>,
    on_next: OnNext<T>,
    on_error: OnError,
    policy: DebouncePolicy,
    grace: Duration,
    params: Option<ArcSignal<Option<P>>>,
}

impl<P, T> LiveSubscriptionBuilder<P, T>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    T: 'static,
{
    /// Called for every item of every live subscription.
    pub fn on_next(
        mut self,
        on_next: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        self.on_next = Arc::new(on_next);
        self
    }

    /// Called when opening a subscription fails or a live one reports an
    /// error. The failed subscription is not retried.
    pub fn on_error(
        mut self,
        on_error: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Arc::new(on_error);
        self
    }

    pub fn policy(mut self, policy: DebouncePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// How long the previous subscription overlaps the new one.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Takes the debounce policy and grace period from `options`.
    pub fn options(mut self, options: &RuntimeOptions) -> Self {
        self.policy = DebouncePolicy::from(&options.debounce);
        self.grace = options.handoff_grace();
        self
    }

    /// Follows `source`, applying its current value immediately.
    pub fn params(mut self, source: &ArcSignal<Option<P>>) -> Self {
        self.params = Some(source.clone());
        self
    }

    /// Starts the manager inside a child of `scope`, which keeps it alive
    /// until disposed.
    pub fn start(self, scope: &ResourceScope) -> LiveSubscription<P, T> {
        let manager_scope = scope.open_child();
        let inner = Arc::new(ManagerInner {
            open: self.open,
            on_next: self.on_next,
            on_error: self.on_error,
            grace: self.grace,
            scope: manager_scope.clone(),
            debouncer: OnceLock::new(),
            state: Default::default(),
        });
        let weak: Weak<ManagerInner<P, T>> = Arc::downgrade(&inner);
        _ = inner.debouncer.set(Debouncer::new(
            &manager_scope,
            self.policy,
            move |params| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(params);
                }
            },
        ));
        let manager = LiveSubscription { inner };
        if let Some(source) = self.params {
            manager.set_params(source.get());
            source.watch(&manager_scope, {
                let weak = Arc::downgrade(&manager.inner);
                move |params| {
                    if let Some(inner) = weak.upgrade() {
                        LiveSubscription { inner }.set_params(params.clone());
                    }
                }
            });
        }
        scope.own(manager)
    }
}

/// Adapts a [`Subscribe`] capability into the `open` function of a
/// [`LiveSubscription`], converting parameters and items through JSON.
pub fn subscribe_operation<P, T>(
    client: Arc<dyn Subscribe>,
    operation: OperationDescriptor,
) -> impl Fn(&P) -> Result<LocalBoxStream<'static, Result<T>>> + Send + Sync
where
    P: Serialize,
    T: DeserializeOwned + 'static,
{
    move |params| {
        let variables =
            serde_json::to_value(params).map_err(Error::operation)?;
        let stream = client.subscribe(&operation, variables)?;
        Ok(stream
            .map(|item| {
                item.and_then(|value| {
                    serde_json::from_value(value).map_err(Error::operation)
                })
            })
            .boxed_local())
    }
}
