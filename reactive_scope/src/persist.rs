//! Persisting a cache snapshot into key-value storage.

use crate::{
    debounce::{DebouncePolicy, Debouncer},
    error::{Error, Result},
    scope::{Disposable, ResourceScope},
    storage::KeyValueStorage,
};
use reactive_scope_config::CacheOptions;
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, sync::Arc};

/// Saves snapshots of a cache under one storage key, at most once per
/// quiet period, and restores them on startup.
///
/// Snapshots whose serialized form is larger than the configured maximum
/// are never written, and stored snapshots over the limit are discarded
/// instead of restored.
pub struct CachePersister<T> {
    storage: Arc<dyn KeyValueStorage>,
    key: Arc<str>,
    max_size: usize,
    saver: Debouncer<Arc<T>>,
}

impl<T> Clone for CachePersister<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            key: Arc::clone(&self.key),
            max_size: self.max_size,
            saver: self.saver.clone(),
        }
    }
}

impl<T> CachePersister<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        scope: &ResourceScope,
        storage: Arc<dyn KeyValueStorage>,
        key: impl Into<Arc<str>>,
        options: &CacheOptions,
    ) -> Self {
        let key = key.into();
        let max_size = options.max_size;
        let saver = Debouncer::new(
            scope,
            DebouncePolicy::trailing(options.save_debounce()),
            {
                let storage = Arc::clone(&storage);
                let key = Arc::clone(&key);
                move |snapshot: Arc<T>| {
                    if let Err(err) =
                        save(&*storage, &key, max_size, &*snapshot)
                    {
                        tracing::error!("failed to persist cache: {err}");
                    }
                }
            },
        );
        Self {
            storage,
            key,
            max_size,
            saver,
        }
    }

    /// Reads the stored snapshot.
    ///
    /// An oversized or unreadable snapshot is removed from storage and
    /// `None` is returned.
    pub fn restore(&self) -> Option<T> {
        let text = self.storage.get(&self.key)?;
        if text.len() > self.max_size {
            tracing::debug!(
                "stored cache is {} bytes, over the {} byte limit; discarding",
                text.len(),
                self.max_size
            );
            self.storage.remove(&self.key);
            return None;
        }
        match serde_json::from_str(&text) {
            Ok(snapshot) => {
                tracing::debug!("restored cache from {:?}", self.key);
                Some(snapshot)
            }
            Err(err) => {
                tracing::error!("failed to restore cache: {err}");
                self.storage.remove(&self.key);
                None
            }
        }
    }

    /// Saves `snapshot` once no newer snapshot has been scheduled for the
    /// save debounce period.
    pub fn schedule_save(&self, snapshot: Arc<T>) {
        self.saver.call(snapshot);
    }

    /// Saves the pending snapshot now, if there is one.
    pub fn flush(&self) {
        self.saver.flush();
    }

    /// Drops the pending snapshot.
    pub fn dispose(&self) {
        self.saver.dispose();
    }
}

fn save<T: Serialize + ?Sized>(
    storage: &dyn KeyValueStorage,
    key: &str,
    max_size: usize,
    snapshot: &T,
) -> Result<()> {
    let text = serde_json::to_string(snapshot).map_err(Error::operation)?;
    if text.len() > max_size {
        tracing::debug!(
            "cache snapshot is {} bytes, over the {max_size} byte limit; not \
             saving",
            text.len()
        );
        return Ok(());
    }
    storage.set(key, &text)
}

impl<T> Disposable for CachePersister<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn dispose(&self) {
        CachePersister::dispose(self)
    }
}

impl<T> Debug for CachePersister<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePersister")
            .field("key", &self.key)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}
