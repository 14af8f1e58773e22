//! Nested, disposable ownership of external resources.

use or_poisoned::OrPoisoned;
use std::{
    any::Any,
    fmt::Debug,
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, RwLock},
};

/// Something that can be torn down.
///
/// Disposal is idempotent: disposing a value more than once has the same
/// effect as disposing it once.
pub trait Disposable {
    /// Releases everything owned by this value.
    fn dispose(&self);
}

type Release = Box<dyn FnOnce() + Send + Sync>;

enum Entry {
    Release(Release),
    Child(ResourceScope),
}

#[derive(Default)]
struct ScopeInner {
    entries: Vec<Entry>,
    disposed: bool,
}

/// A stack-like container of release actions.
///
/// Resources are registered together with the action that releases them.
/// Disposing the scope runs every registered action exactly once, in reverse
/// registration order. Child scopes opened with [`ResourceScope::open_child`]
/// are disposed along with their parent, but can also be disposed earlier on
/// their own.
///
/// A scope is a cheap handle: clones refer to the same scope. A parent keeps
/// its children alive until they are disposed. When the last handle to a
/// root scope is dropped, the scope is disposed.
///
/// ```rust
/// use reactive_scope::scope::ResourceScope;
/// use std::sync::{Arc, Mutex};
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let scope = ResourceScope::new();
/// for n in 0..3 {
///     let log = Arc::clone(&log);
///     scope.register(move || log.lock().unwrap().push(n));
/// }
/// scope.dispose();
/// scope.dispose();
/// assert_eq!(*log.lock().unwrap(), [2, 1, 0]);
/// ```
#[derive(Clone, Default)]
#[must_use]
pub struct ResourceScope {
    inner: Arc<RwLock<ScopeInner>>,
}

impl ResourceScope {
    /// Creates a new, empty root scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`ResourceScope::dispose`] has run, either directly or through
    /// a parent.
    pub fn is_disposed(&self) -> bool {
        self.inner.read().or_poisoned().disposed
    }

    /// Registers a release action.
    ///
    /// If the scope has already been disposed, the action runs immediately.
    pub fn register(&self, release: impl FnOnce() + Send + Sync + 'static) {
        let mut lock = self.inner.write().or_poisoned();
        if lock.disposed {
            drop(lock);
            run_release(Box::new(release));
        } else {
            lock.entries.push(Entry::Release(Box::new(release)));
        }
    }

    /// Registers `release(resource)` as a release action and hands the
    /// resource back, so acquisition can be written inline.
    pub fn adopt<R>(
        &self,
        resource: R,
        release: impl FnOnce(R) + Send + Sync + 'static,
    ) -> R
    where
        R: Clone + Send + Sync + 'static,
    {
        let owned = resource.clone();
        self.register(move || release(owned));
        resource
    }

    /// Takes ownership of the disposal of another [`Disposable`].
    pub fn own<D>(&self, disposable: D) -> D
    where
        D: Disposable + Clone + Send + Sync + 'static,
    {
        self.adopt(disposable, |d| d.dispose())
    }

    /// Opens a nested scope that is disposed when this scope is disposed.
    ///
    /// Opening a child of an already-disposed scope yields a disposed scope.
    pub fn open_child(&self) -> ResourceScope {
        let child = ResourceScope::new();
        let mut lock = self.inner.write().or_poisoned();
        if lock.disposed {
            drop(lock);
            child.dispose();
            return child;
        }
        // forget children that were disposed on their own
        lock.entries.retain(|entry| match entry {
            Entry::Release(_) => true,
            Entry::Child(child) => !child.is_disposed(),
        });
        lock.entries.push(Entry::Child(child.clone()));
        child
    }

    /// Runs all release actions in reverse registration order.
    ///
    /// A panicking release action is logged and does not prevent the
    /// remaining actions from running. Later calls do nothing.
    pub fn dispose(&self) {
        let entries = {
            let mut lock = self.inner.write().or_poisoned();
            if lock.disposed {
                return;
            }
            lock.disposed = true;
            mem::take(&mut lock.entries)
        };
        run_entries(entries);
    }

    /// Returns a unique identifier for this scope, for debugging.
    pub fn debug_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Disposable for ResourceScope {
    fn dispose(&self) {
        ResourceScope::dispose(self)
    }
}

impl PartialEq for ResourceScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ResourceScope {}

impl Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lock = self.inner.read().or_poisoned();
        f.debug_struct("ResourceScope")
            .field("id", &self.debug_id())
            .field("disposed", &lock.disposed)
            .field("entries", &lock.entries.len())
            .finish()
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if !self.disposed {
            self.disposed = true;
            run_entries(mem::take(&mut self.entries));
        }
    }
}

fn run_entries(entries: Vec<Entry>) {
    for entry in entries.into_iter().rev() {
        match entry {
            Entry::Release(release) => run_release(release),
            Entry::Child(child) => child.dispose(),
        }
    }
}

fn run_release(release: Release) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(release)) {
        tracing::error!(
            "release action panicked during disposal: {}",
            panic_message(&*payload)
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
