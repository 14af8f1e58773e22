use any_spawner::Executor;
use reactive_scope::{
    error::Error,
    scope::ResourceScope,
    signal::ArcSignal,
    task::{AsyncTask, RunOutcome, TaskPhase},
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{task::LocalSet, time::sleep};

async fn run_local<F: Future>(fut: F) -> F::Output {
    _ = Executor::init_tokio();
    LocalSet::new().run_until(fut).await
}

/// Sleeps for `millis`, then echoes it back.
fn delayed_echo(scope: &ResourceScope) -> AsyncTask<u64, u64> {
    AsyncTask::builder(|millis: u64, _| async move {
        sleep(Duration::from_millis(millis)).await;
        Ok(millis)
    })
    .build(scope)
}

#[tokio::test(start_paused = true)]
async fn run_resolves_into_the_value_cell() {
    run_local(async {
        let scope = ResourceScope::new();
        let task = delayed_echo(&scope);
        assert_eq!(task.phase().get(), TaskPhase::Idle);

        let done = task.run(10);
        assert!(task.is_pending());
        assert_eq!(done.await, RunOutcome::Resolved);
        assert_eq!(task.value().get(), Some(10));
        assert_eq!(task.phase().get(), TaskPhase::Resolved);
        assert!(task.error().get().is_none());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn only_the_latest_run_writes_results() {
    run_local(async {
        let scope = ResourceScope::new();
        let writes = Arc::new(Mutex::new(Vec::new()));
        let task = delayed_echo(&scope);
        task.value().watch(&scope, {
            let writes = Arc::clone(&writes);
            move |value| writes.lock().unwrap().push(*value)
        });

        // the first run would finish later than the second if it were kept
        let first = task.run(50);
        let second = task.run(20);
        assert_eq!(second.await, RunOutcome::Resolved);
        assert_eq!(first.await, RunOutcome::Superseded);
        sleep(Duration::from_millis(100)).await;

        assert_eq!(task.value().get(), Some(20));
        assert_eq!(*writes.lock().unwrap(), [None, None, Some(20)]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn superseded_failures_are_discarded() {
    run_local(async {
        let scope = ResourceScope::new();
        let task = AsyncTask::builder(|fail: bool, _| async move {
            sleep(Duration::from_millis(10)).await;
            if fail {
                Err(Error::msg("boom"))
            } else {
                Ok("fine")
            }
        })
        .build(&scope);

        let failing = task.run(true);
        let passing = task.run(false);
        assert_eq!(failing.await, RunOutcome::Superseded);
        assert_eq!(passing.await, RunOutcome::Resolved);
        assert!(task.error().get().is_none());
        assert_eq!(task.value().get(), Some("fine"));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn failures_populate_the_error_cell() {
    run_local(async {
        let scope = ResourceScope::new();
        let task = AsyncTask::builder(|_: (), _| async move {
            Err::<u8, _>(Error::msg("backend unavailable"))
        })
        .default_value(|| 0)
        .build(&scope);

        assert_eq!(task.run(()).await, RunOutcome::Rejected);
        assert_eq!(task.phase().get(), TaskPhase::Rejected);
        assert_eq!(
            task.error().get().map(|err| err.to_string()),
            Some("backend unavailable".to_owned())
        );
        assert_eq!(task.value().get(), Some(0));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn voluntary_cancellation_is_not_an_error() {
    run_local(async {
        let scope = ResourceScope::new();
        let task = AsyncTask::builder(|_: (), ctx| async move {
            // a run that notices it should stop and bails out
            ctx.dispose();
            ctx.check()?;
            Ok(1)
        })
        .build(&scope);
        let outcome = task.run(()).await;
        assert_eq!(outcome, RunOutcome::Superseded);
        assert!(task.error().get().is_none());

        let task = AsyncTask::builder(|_: (), _| async move {
            Err::<u8, _>(Error::Canceled)
        })
        .build(&scope);
        assert_eq!(task.run(()).await, RunOutcome::Canceled);
        assert!(task.error().get().is_none());
        assert_eq!(task.phase().get(), TaskPhase::Idle);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn loading_count_balances_across_runs() {
    run_local(async {
        let scope = ResourceScope::new();
        let loading = ArcSignal::new(0_usize);
        let observed = Arc::new(Mutex::new(Vec::new()));
        loading.watch(&scope, {
            let observed = Arc::clone(&observed);
            move |n| observed.lock().unwrap().push(*n)
        });
        let task = AsyncTask::builder(|fail: bool, _| async move {
            sleep(Duration::from_millis(10)).await;
            if fail {
                Err(Error::msg("failed"))
            } else {
                Ok(())
            }
        })
        .loading_count(&loading)
        .build(&scope);

        let a = task.run(false);
        let b = task.run(true);
        // superseding releases the first run's share right away
        assert_eq!(loading.get(), 1);
        let c = task.run(false);
        assert_eq!(loading.get(), 1);
        assert_eq!(a.await, RunOutcome::Superseded);
        assert_eq!(b.await, RunOutcome::Superseded);
        assert_eq!(c.await, RunOutcome::Resolved);
        assert_eq!(loading.get(), 0);

        assert_eq!(task.run(true).await, RunOutcome::Rejected);
        assert_eq!(loading.get(), 0);
        assert!(observed.lock().unwrap().iter().all(|n| *n <= 1));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn keep_latest_shows_stale_data_while_refreshing() {
    run_local(async {
        let scope = ResourceScope::new();
        let task = AsyncTask::builder(|n: u32, _| async move {
            sleep(Duration::from_millis(10)).await;
            Ok(n * 2)
        })
        .keep_latest(true)
        .build(&scope);

        assert_eq!(task.run(1).await, RunOutcome::Resolved);
        let rerun = task.run(2);
        assert_eq!(task.value().get(), Some(2));
        assert_eq!(rerun.await, RunOutcome::Resolved);
        assert_eq!(task.value().get(), Some(4));

        let plain = delayed_echo(&scope);
        assert_eq!(plain.run(5).await, RunOutcome::Resolved);
        let rerun = plain.run(6);
        assert_eq!(plain.value().get(), None);
        assert_eq!(rerun.await, RunOutcome::Resolved);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn restart_needs_arguments() {
    run_local(async {
        let scope = ResourceScope::new();
        let task = delayed_echo(&scope);

        assert!(matches!(task.restart(None), Err(Error::InvalidState(_))));

        assert_eq!(task.restart(Some(3)).unwrap().await, RunOutcome::Resolved);
        assert_eq!(task.restart(None).unwrap().await, RunOutcome::Resolved);
        assert_eq!(task.value().get(), Some(3));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn reactive_arguments_drive_runs() {
    run_local(async {
        let scope = ResourceScope::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let args = ArcSignal::new(None::<u64>);
        let task = AsyncTask::builder({
            let calls = Arc::clone(&calls);
            move |millis: u64, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    sleep(Duration::from_millis(millis)).await;
                    Ok(millis)
                }
            }
        })
        .args(&args)
        .build(&scope);

        // not ready yet
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        args.set(Some(5));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(task.value().get(), Some(5));

        // equal arguments do not rerun
        args.set(Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // "not ready" keeps the previous result
        args.set(None);
        assert_eq!(task.value().get(), Some(5));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        args.set(Some(7));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(task.value().get(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // restart falls back to the latest arguments
        assert_eq!(task.restart(None).unwrap().await, RunOutcome::Resolved);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn custom_argument_equality() {
    run_local(async {
        let scope = ResourceScope::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let args = ArcSignal::new(Some("Rust".to_owned()));
        let _task = AsyncTask::builder({
            let calls = Arc::clone(&calls);
            move |_: String, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }
        })
        .args_equal(|a, b| a.eq_ignore_ascii_case(b))
        .args(&args)
        .build(&scope);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        args.set(Some("RUST".to_owned()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        args.set(Some("Go".to_owned()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn disposing_the_scope_cancels_the_run() {
    run_local(async {
        let scope = ResourceScope::new();
        let loading = ArcSignal::new(0_usize);
        let args = ArcSignal::new(Some(50_u64));
        let task = AsyncTask::builder(|millis: u64, ctx| async move {
            ctx.run(sleep(Duration::from_millis(millis))).await?;
            Ok(millis)
        })
        .loading_count(&loading)
        .args(&args)
        .build(&scope);
        assert_eq!(loading.get(), 1);

        scope.dispose();
        assert_eq!(loading.get(), 0);
        assert_eq!(task.phase().get(), TaskPhase::Idle);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(task.value().get(), None);

        // the argument watch is gone as well
        args.set(Some(1));
        assert_eq!(loading.get(), 0);
        assert_eq!(task.run(1).await, RunOutcome::Superseded);
    })
    .await;
}
