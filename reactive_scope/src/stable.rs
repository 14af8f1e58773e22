//! Suppressing redundant reactions to structurally unchanged values.
//!
//! Recomputing a value (re-fetching a record, re-deriving a filter) often
//! produces something equal to what was there before. Handing downstream
//! consumers the *previous* allocation in that case lets them skip work by
//! comparing pointers instead of contents.

use crate::{scope::ResourceScope, signal::ArcSignal};
use std::{fmt::Debug, ops::Deref, sync::Arc};

/// Returns `previous` if it is equal to `candidate`, otherwise `candidate`.
///
/// A missing `previous` never matches, so the first call always returns the
/// candidate. Equality is the pointee's [`PartialEq`]: plain data compares
/// structurally, and values wrapped in [`ByAddress`] compare by identity.
///
/// ```rust
/// use reactive_scope::stable::reconcile;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let previous = Arc::new(json!({ "a": 1, "b": [1, 2] }));
///
/// let same = reconcile(Arc::new(json!({ "a": 1, "b": [1, 2] })), Some(&previous));
/// assert!(Arc::ptr_eq(&same, &previous));
///
/// let changed = reconcile(Arc::new(json!({ "a": 1, "b": [1, 3] })), Some(&previous));
/// assert!(!Arc::ptr_eq(&changed, &previous));
/// ```
pub fn reconcile<R>(candidate: R, previous: Option<&R>) -> R
where
    R: Deref + Clone,
    R::Target: PartialEq,
{
    match previous {
        Some(previous) if **previous == *candidate => previous.clone(),
        _ => candidate,
    }
}

/// Remembers the last value it produced and reuses it while new candidates
/// stay equal.
#[derive(Debug, Clone)]
pub struct StableMemo<T> {
    last: Option<Arc<T>>,
}

impl<T> Default for StableMemo<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: PartialEq> StableMemo<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stable version of `candidate`.
    pub fn reconcile(&mut self, candidate: T) -> Arc<T> {
        let next = reconcile(Arc::new(candidate), self.last.as_ref());
        self.last = Some(Arc::clone(&next));
        next
    }

    /// The last value produced, if any.
    pub fn last(&self) -> Option<&Arc<T>> {
        self.last.as_ref()
    }
}

/// Derives a signal from `source` that only notifies when the derived value
/// changes structurally.
///
/// The derivation stops following `source` when `scope` is disposed.
pub fn stable_map<S, U>(
    scope: &ResourceScope,
    source: &ArcSignal<S>,
    fun: impl Fn(&S) -> U + Send + Sync + 'static,
) -> ArcSignal<Arc<U>>
where
    S: Clone + Send + Sync + 'static,
    U: PartialEq + Send + Sync + 'static,
{
    let derived = ArcSignal::new(source.with(|value| Arc::new(fun(value))));
    source.watch(scope, {
        let derived = derived.clone();
        move |value| {
            let previous = derived.get();
            let next = reconcile(Arc::new(fun(value)), Some(&previous));
            if !Arc::ptr_eq(&next, &previous) {
                derived.set(next);
            }
        }
    });
    derived
}

/// Compares by identity rather than by contents.
///
/// Use this for values that are not plain data, such as handles to live
/// resources, so that [`reconcile`] never treats two distinct instances as
/// interchangeable.
pub struct ByAddress<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> Clone for ByAddress<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for ByAddress<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for ByAddress<T> {}

impl<T: ?Sized> Deref for ByAddress<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + Debug> Debug for ByAddress<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ByAddress").field(&&*self.0).finish()
    }
}
