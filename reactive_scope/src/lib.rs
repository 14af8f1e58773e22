//! Scoped, cancellable asynchronous work bound to reactive inputs.
//!
//! Long-lived interactive applications constantly start work whose result
//! may no longer matter by the time it arrives: a search for text the user
//! has since changed, a poll for a page they have left, a live subscription
//! for a filter they have replaced. This crate gives that work an owner.
//!
//! 1. **Scopes** ([`ResourceScope`](scope::ResourceScope)) own release
//!    actions and child scopes, and run them exactly once, in reverse order,
//!    when disposed.
//! 2. **Cancellation contexts** ([`CancellationContext`](cancel::CancellationContext))
//!    pair one unit of work with a scope and a lazily-created signal that
//!    fires when the scope is disposed.
//! 3. **Coordinators** build on those two:
//!    - [`AsyncTask`](task::AsyncTask) reruns an operation when its
//!      arguments change, and only ever lets the latest run write results;
//!    - [`PollingLoop`](poll::PollingLoop) repeats an update with at most
//!      one iteration in flight, and can be paused;
//!    - [`LiveSubscription`](subscription::LiveSubscription) follows
//!      debounced parameters with a gap-free handoff between subscriptions.
//!
//! Inputs and outputs are [`ArcSignal`](signal::ArcSignal)s: cells that
//! notify their watchers synchronously when written.
//!
//! ```rust
//! # tokio_test::block_on(async {
//! # let local = tokio::task::LocalSet::new();
//! # local.run_until(async {
//! # _ = any_spawner::Executor::init_tokio();
//! use reactive_scope::prelude::*;
//!
//! let scope = ResourceScope::new();
//! let query = ArcSignal::new(None::<String>);
//!
//! let results = AsyncTask::builder(|text: String, _| async move {
//!     Ok(text.len())
//! })
//! .args(&query)
//! .build(&scope);
//!
//! query.set(Some("rust".into()));
//! let outcome = results.restart(None).unwrap().await;
//! assert_eq!(outcome, RunOutcome::Resolved);
//! assert_eq!(results.value().get(), Some(4));
//!
//! // disposing the scope cancels anything still running
//! scope.dispose();
//! # }).await;
//! # });
//! ```
//!
//! ## Execution model
//! All background work is spawned with
//! [`Executor::spawn_local`](any_spawner::Executor::spawn_local), so
//! operation futures do not need to be `Send`. The host initializes
//! `any_spawner` once, for example with `Executor::init_tokio()` inside a
//! `tokio::task::LocalSet`. Timers use `tokio::time`.
#![forbid(unsafe_code)]

pub mod backend;
pub mod cancel;
pub mod clock;
pub mod current_time;
pub mod debounce;
pub mod error;
pub mod events;
pub mod notify;
pub mod persist;
pub mod poll;
pub mod query;
pub mod scope;
pub mod signal;
pub mod stable;
pub mod storage;
pub mod subscription;
pub mod task;
pub mod timer;

pub use error::{Error, OperationError, Result};
pub use reactive_scope_config::RuntimeOptions;

/// Reexports the types most programs need.
pub mod prelude {
    pub use crate::{
        cancel::{CancellationContext, CancellationSignal},
        error::{Error, Result},
        poll::PollingLoop,
        scope::{Disposable, ResourceScope},
        signal::ArcSignal,
        subscription::LiveSubscription,
        task::{AsyncTask, RunOutcome, TaskPhase},
    };
}
