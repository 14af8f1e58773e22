//! Transient notifications for surfaced errors and other messages.

use crate::{
    backend::error_message,
    error::Error,
    scope::{Disposable, ResourceScope},
    signal::ArcSignal,
    timer::set_timeout,
};
use indexmap::IndexSet;
use reactive_scope_config::NotificationOptions;
use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Error,
    Success,
    Info,
    Warning,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationKind::Error => "error",
            NotificationKind::Success => "success",
            NotificationKind::Info => "info",
            NotificationKind::Warning => "warning",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub kind: NotificationKind,
    pub message: String,
    /// How long the notification stays up. `None` keeps it until removed.
    pub duration: Option<Duration>,
}

struct CenterInner {
    options: NotificationOptions,
    items: ArcSignal<Vec<Notification>>,
    next_id: AtomicU64,
    scope: ResourceScope,
}

/// The list of notifications currently shown.
#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<CenterInner>,
}

impl NotificationCenter {
    pub fn new(scope: &ResourceScope, options: &NotificationOptions) -> Self {
        Self {
            inner: Arc::new(CenterInner {
                options: options.clone(),
                items: ArcSignal::new(Vec::new()),
                next_id: AtomicU64::new(1),
                scope: scope.open_child(),
            }),
        }
    }

    /// The notifications currently shown, oldest first.
    pub fn notifications(&self) -> ArcSignal<Vec<Notification>> {
        self.inner.items.clone()
    }

    /// Shows `message`. A zero `duration` keeps it until it is removed.
    pub fn show(
        &self,
        message: impl Into<String>,
        kind: NotificationKind,
        duration: Duration,
    ) -> u64 {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let duration = (!duration.is_zero()).then_some(duration);
        inner.items.update(|items| {
            items.push(Notification {
                id,
                kind,
                message: message.into(),
                duration,
            })
        });
        if let Some(duration) = duration {
            let weak = Arc::downgrade(inner);
            _ = set_timeout(&inner.scope, duration, move || {
                if let Some(inner) = weak.upgrade() {
                    NotificationCenter { inner }.remove(id);
                }
            });
        }
        id
    }

    pub fn show_error(&self, message: impl Into<String>) -> u64 {
        let duration = self.inner.options.error_duration();
        self.show(message, NotificationKind::Error, duration)
    }

    pub fn show_success(&self, message: impl Into<String>) -> u64 {
        let duration = self.inner.options.default_duration();
        self.show(message, NotificationKind::Success, duration)
    }

    pub fn show_info(&self, message: impl Into<String>) -> u64 {
        let duration = self.inner.options.default_duration();
        self.show(message, NotificationKind::Info, duration)
    }

    pub fn show_warning(&self, message: impl Into<String>) -> u64 {
        let duration = self.inner.options.default_duration();
        self.show(message, NotificationKind::Warning, duration)
    }

    pub fn remove(&self, id: u64) {
        let shown = self
            .inner
            .items
            .with(|items| items.iter().any(|item| item.id == id));
        if shown {
            self.inner.items.update(|items| items.retain(|n| n.id != id));
        }
    }

    pub fn clear(&self) {
        self.inner.items.set(Vec::new());
    }

    /// Shows one error notification per distinct message in `errors`.
    ///
    /// Cancellation is never shown. Backend errors use their translation
    /// for `lang` when they carry one.
    pub fn report_errors<'a>(
        &self,
        errors: impl IntoIterator<Item = &'a Error>,
        lang: &str,
    ) -> Vec<u64> {
        let messages = errors
            .into_iter()
            .filter(|err| !err.is_cancellation())
            .map(|err| error_message(err, lang))
            .collect::<IndexSet<_>>();
        messages
            .into_iter()
            .map(|message| self.show_error(message))
            .collect()
    }

    /// Removes pending expiry timers. Shown notifications stay.
    pub fn dispose(&self) {
        self.inner.scope.dispose();
    }
}

impl Disposable for NotificationCenter {
    fn dispose(&self) {
        NotificationCenter::dispose(self)
    }
}

impl Debug for NotificationCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationCenter")
            .field("items", &self.inner.items)
            .finish_non_exhaustive()
    }
}
