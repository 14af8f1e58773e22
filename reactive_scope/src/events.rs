//! Scoped event listeners.
//!
//! Anything that can register and remove named event listeners implements
//! [`EventTarget`]. [`listen`] attaches a batch of listeners whose removal is
//! owned by a scope, and [`watch_target`] keeps them attached to whatever
//! target a cell currently holds.

use crate::{
    scope::{Disposable, ResourceScope},
    signal::ArcSignal,
};
use or_poisoned::OrPoisoned;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex, RwLock},
};

new_key_type! {
    /// Identifies a listener registered with an [`EventTarget`].
    pub struct ListenerKey;
}

/// An event handler.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A source of named events.
pub trait EventTarget: Send + Sync {
    type Event;

    fn add_event_listener(
        &self,
        event: &str,
        handler: Handler<Self::Event>,
    ) -> ListenerKey;

    fn remove_event_listener(&self, event: &str, key: ListenerKey);
}

/// An in-memory [`EventTarget`].
pub struct EventEmitter<E> {
    listeners: RwLock<FxHashMap<String, SlotMap<ListenerKey, Handler<E>>>>,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            listeners: Default::default(),
        }
    }
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls every listener registered for `name`.
    ///
    /// Listeners added or removed by a handler take effect from the next
    /// emission.
    pub fn emit(&self, name: &str, event: &E) {
        let handlers = self
            .listeners
            .read()
            .or_poisoned()
            .get(name)
            .map(|handlers| handlers.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .read()
            .or_poisoned()
            .get(name)
            .map_or(0, SlotMap::len)
    }
}

impl<E> EventTarget for EventEmitter<E>
where
    E: 'static,
{
    type Event = E;

    fn add_event_listener(
        &self,
        event: &str,
        handler: Handler<E>,
    ) -> ListenerKey {
        self.listeners
            .write()
            .or_poisoned()
            .entry(event.to_owned())
            .or_default()
            .insert(handler)
    }

    fn remove_event_listener(&self, event: &str, key: ListenerKey) {
        let mut listeners = self.listeners.write().or_poisoned();
        if let Some(handlers) = listeners.get_mut(event) {
            handlers.remove(key);
            if handlers.is_empty() {
                listeners.remove(event);
            }
        }
    }
}

impl<E> Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().or_poisoned();
        f.debug_map()
            .entries(listeners.iter().map(|(name, set)| (name, set.len())))
            .finish()
    }
}

/// Registers listeners on one target for the lifetime of a scope.
pub struct Listeners<T: EventTarget + ?Sized> {
    target: Arc<T>,
    scope: ResourceScope,
}

impl<T> Listeners<T>
where
    T: EventTarget + ?Sized + 'static,
{
    /// Adds a listener that is removed when the scope is disposed.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&T::Event) + Send + Sync + 'static,
    ) -> &Self {
        if self.scope.is_disposed() {
            return self;
        }
        let key = self.target.add_event_listener(event, Arc::new(handler));
        let target = Arc::clone(&self.target);
        let event = event.to_owned();
        self.scope
            .register(move || target.remove_event_listener(&event, key));
        self
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    pub fn scope(&self) -> &ResourceScope {
        &self.scope
    }
}

/// Attaches the listeners added by `init` to `target`, inside a child of
/// `scope`. Disposing the returned scope removes them.
///
/// ```rust
/// use reactive_scope::{
///     events::{listen, EventEmitter},
///     scope::ResourceScope,
/// };
/// use std::sync::{
///     atomic::{AtomicUsize, Ordering},
///     Arc,
/// };
///
/// let scope = ResourceScope::new();
/// let target = Arc::new(EventEmitter::<u32>::new());
/// let total = Arc::new(AtomicUsize::new(0));
/// let listening = listen(&scope, &target, {
///     let total = Arc::clone(&total);
///     move |listeners| {
///         listeners.on("tick", move |n| {
///             total.fetch_add(*n as usize, Ordering::SeqCst);
///         });
///     }
/// });
///
/// target.emit("tick", &2);
/// listening.dispose();
/// target.emit("tick", &5);
/// assert_eq!(total.load(Ordering::SeqCst), 2);
/// assert_eq!(target.listener_count("tick"), 0);
/// ```
pub fn listen<T>(
    scope: &ResourceScope,
    target: &Arc<T>,
    init: impl FnOnce(&Listeners<T>),
) -> ResourceScope
where
    T: EventTarget + ?Sized + 'static,
{
    let listeners = Listeners {
        target: Arc::clone(target),
        scope: scope.open_child(),
    };
    init(&listeners);
    listeners.scope
}

/// Keeps the listeners added by `init` attached to whatever target `cell`
/// holds.
///
/// When the cell changes, the listeners on the old target are removed
/// before `init` runs against the new one. An empty cell leaves nothing
/// attached. Disposing `scope`, or the returned scope, removes everything.
pub fn watch_target<T>(
    scope: &ResourceScope,
    cell: &ArcSignal<Option<Arc<T>>>,
    init: impl Fn(&Listeners<T>) + Send + Sync + 'static,
) -> ResourceScope
where
    T: EventTarget + ?Sized + 'static,
{
    let scope = scope.open_child();
    let current = Arc::new(Mutex::new(None::<(Arc<T>, ResourceScope)>));
    let rebind = {
        let scope = scope.clone();
        let current = Arc::clone(&current);
        move |target: &Option<Arc<T>>| {
            let unchanged = match (&*current.lock().or_poisoned(), target) {
                (Some((old, _)), Some(new)) => Arc::ptr_eq(old, new),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }
            let previous = current.lock().or_poisoned().take();
            if let Some((_, listening)) = previous {
                listening.dispose();
            }
            if let Some(target) = target {
                let listening = listen(&scope, target, &init);
                *current.lock().or_poisoned() =
                    Some((Arc::clone(target), listening));
            }
        }
    };
    rebind(&cell.get());
    cell.watch(&scope, rebind);
    scope.register(move || {
        if let Some((_, listening)) = current.lock().or_poisoned().take() {
            listening.dispose();
        }
    });
    scope
}

impl<T: EventTarget + ?Sized> Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<T: EventTarget + ?Sized> Disposable for Listeners<T> {
    fn dispose(&self) {
        self.scope.dispose();
    }
}
