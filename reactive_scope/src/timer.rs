//! Timeouts owned by a [`ResourceScope`].

use crate::{
    cancel::{CancellationContext, Canceled},
    scope::ResourceScope,
};
use any_spawner::Executor;
use std::time::Duration;

/// Runs `fun` once after `delay`, unless `scope` (or the returned timer
/// scope) is disposed first.
///
/// The timer lives in its own child scope, which is disposed after the
/// callback runs.
pub fn set_timeout(
    scope: &ResourceScope,
    delay: Duration,
    fun: impl FnOnce() + 'static,
) -> ResourceScope {
    let timer = CancellationContext::child_of(scope);
    if timer.is_disposed() {
        return timer.scope().clone();
    }
    let handle = timer.scope().clone();
    Executor::spawn_local(async move {
        let elapsed = timer.run(tokio::time::sleep(delay)).await;
        if elapsed.is_ok() && !timer.is_disposed() {
            fun();
        }
        timer.dispose();
    });
    handle
}

/// Sleeps for `delay`, returning early with `Err(Canceled)` if `context` is
/// disposed.
pub async fn sleep(
    context: &CancellationContext,
    delay: Duration,
) -> Result<(), Canceled> {
    context.run(tokio::time::sleep(delay)).await
}
