//! JSON values persisted in a key-value store.

use crate::{
    error::{Error, Result},
    events::{listen, EventEmitter},
    scope::{Disposable, ResourceScope},
    signal::ArcSignal,
    stable::StableMemo,
};
use or_poisoned::OrPoisoned;
use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex, RwLock},
};

/// Name of the event a [`KeyValueStorage`] emits when another writer
/// changes it.
pub const STORAGE_EVENT: &str = "storage";

/// A change made to a storage area by another writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// The key that changed, or `None` if the whole area was cleared.
    pub key: Option<String>,
    pub new_value: Option<String>,
}

/// A string key-value store, such as browser local storage.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str);

    /// Where changes made by other writers are announced, if anywhere.
    fn changes(&self) -> Option<Arc<EventEmitter<StorageEvent>>> {
        None
    }
}

/// An in-memory [`KeyValueStorage`].
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<FxHashMap<String, String>>,
    changes: Arc<EventEmitter<StorageEvent>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a write made by another writer and announces it, the way a
    /// browser reports a change made from another tab.
    pub fn apply_external(&self, key: &str, value: Option<&str>) {
        {
            let mut items = self.items.write().or_poisoned();
            match value {
                Some(value) => {
                    items.insert(key.to_owned(), value.to_owned());
                }
                None => {
                    items.remove(key);
                }
            }
        }
        self.changes.emit(
            STORAGE_EVENT,
            &StorageEvent {
                key: Some(key.to_owned()),
                new_value: value.map(str::to_owned),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.items.read().or_poisoned().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.items.read().or_poisoned().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.items
            .write()
            .or_poisoned()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.items.write().or_poisoned().remove(key);
    }

    fn changes(&self) -> Option<Arc<EventEmitter<StorageEvent>>> {
        Some(Arc::clone(&self.changes))
    }
}

impl Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("items", &*self.items.read().or_poisoned())
            .finish()
    }
}

type DefaultValue<T> = Arc<dyn Fn() -> T + Send + Sync>;

struct CellInner<T> {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    default: DefaultValue<T>,
    buffer: Mutex<Option<T>>,
    memo: Mutex<StableMemo<T>>,
    model: ArcSignal<Arc<T>>,
    scope: ResourceScope,
}

/// A value stored as JSON under one key of a [`KeyValueStorage`].
///
/// The [`StorageCell::model`] cell holds the stored value, or the default
/// when nothing (or nothing readable) is stored, and only notifies when that
/// value actually changes. Changes announced by the storage for the same key
/// are picked up automatically.
pub struct StorageCell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for StorageCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> StorageCell<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    /// Loads the value stored under `key` and starts following changes to
    /// it until `scope` is disposed.
    pub fn new(
        scope: &ResourceScope,
        storage: Arc<dyn KeyValueStorage>,
        key: impl Into<String>,
        default: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        let default: DefaultValue<T> = Arc::new(default);
        let mut memo = StableMemo::new();
        let model = ArcSignal::new(memo.reconcile(default()));
        let cell = StorageCell {
            inner: Arc::new(CellInner {
                storage,
                key: key.into(),
                default,
                buffer: Mutex::new(None),
                memo: Mutex::new(memo),
                model,
                scope: scope.open_child(),
            }),
        };
        if let Some(changes) = cell.inner.storage.changes() {
            let weak = Arc::downgrade(&cell.inner);
            _ = listen(&cell.inner.scope, &changes, move |listeners| {
                listeners.on(STORAGE_EVENT, move |event: &StorageEvent| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let matches = event
                        .key
                        .as_deref()
                        .is_none_or(|key| key == inner.key);
                    if matches {
                        StorageCell { inner }.reload();
                    }
                });
            });
        }
        cell.reload();
        cell
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The stored value, or the default.
    pub fn get(&self) -> Arc<T> {
        self.inner.model.get()
    }

    /// The cell behind [`StorageCell::get`].
    pub fn model(&self) -> ArcSignal<Arc<T>> {
        self.inner.model.clone()
    }

    /// Stores `value`, or removes the key when `None`.
    pub fn set(&self, value: Option<T>) -> Result<()> {
        *self.inner.buffer.lock().or_poisoned() = value;
        self.flush()
    }

    /// Writes the buffered value to storage and reads it back.
    pub fn flush(&self) -> Result<()> {
        let buffered = self.inner.buffer.lock().or_poisoned().clone();
        let written = match buffered {
            None => {
                self.inner.storage.remove(&self.inner.key);
                Ok(())
            }
            Some(value) => serde_json::to_string(&value)
                .map_err(Error::operation)
                .and_then(|text| {
                    self.inner.storage.set(&self.inner.key, &text)
                }),
        };
        self.reload();
        written
    }

    /// Removes the stored value.
    pub fn clear(&self) -> Result<()> {
        self.set(None)
    }

    /// Rereads the stored value. Text that does not parse reads as absent.
    pub fn reload(&self) -> Option<T> {
        let inner = &self.inner;
        let value = inner.storage.get(&inner.key).and_then(|text| {
            serde_json::from_str::<T>(&text)
                .inspect_err(|err| {
                    tracing::debug!(
                        "ignoring unreadable value stored under {:?}: {err}",
                        inner.key
                    )
                })
                .ok()
        });
        *inner.buffer.lock().or_poisoned() = value.clone();

        let candidate = value.clone().unwrap_or_else(|| (inner.default)());
        let next = inner.memo.lock().or_poisoned().reconcile(candidate);
        if !Arc::ptr_eq(&inner.model.get(), &next) {
            inner.model.set(next);
        }
        value
    }

    /// Stops following storage changes.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }
}

impl<T> Disposable for StorageCell<T>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        StorageCell::dispose(self)
    }
}

impl<T: Debug> Debug for StorageCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCell")
            .field("key", &self.inner.key)
            .field("model", &self.inner.model)
            .finish()
    }
}
