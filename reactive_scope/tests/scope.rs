use any_spawner::Executor;
use reactive_scope::{
    cancel::{with_cancel, CancellationContext, Canceled},
    scope::ResourceScope,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::Poll,
    time::Duration,
};
use tokio::task::LocalSet;

type Log = Arc<Mutex<Vec<&'static str>>>;
type Release = Box<dyn FnOnce() + Send + Sync>;

fn recorder() -> (Log, impl Fn(&'static str) -> Release) {
    let log = Log::default();
    let record = {
        let log = Arc::clone(&log);
        move |name: &'static str| -> Release {
            let log = Arc::clone(&log);
            Box::new(move || log.lock().unwrap().push(name))
        }
    };
    (log, record)
}

#[test]
fn dispose_runs_each_release_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let scope = ResourceScope::new();
    for _ in 0..3 {
        let count = Arc::clone(&count);
        scope.register(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
    }

    for _ in 0..5 {
        scope.dispose();
    }
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(scope.is_disposed());
}

#[test]
fn releases_run_in_reverse_order() {
    let (log, record) = recorder();
    let scope = ResourceScope::new();
    scope.register(record("first"));
    scope.register(record("second"));
    scope.register(record("third"));

    scope.dispose();
    assert_eq!(*log.lock().unwrap(), ["third", "second", "first"]);
}

#[test]
fn register_after_dispose_runs_immediately() {
    let (log, record) = recorder();
    let scope = ResourceScope::new();
    scope.dispose();

    scope.register(record("late"));
    assert_eq!(*log.lock().unwrap(), ["late"]);
}

#[test]
fn adopt_hands_the_resource_back() {
    let released = Arc::new(Mutex::new(None));
    let scope = ResourceScope::new();
    let handle = scope.adopt(42_u32, {
        let released = Arc::clone(&released);
        move |value| *released.lock().unwrap() = Some(value)
    });
    assert_eq!(handle, 42);
    assert_eq!(*released.lock().unwrap(), None);

    scope.dispose();
    assert_eq!(*released.lock().unwrap(), Some(42));
}

#[test]
fn disposing_a_parent_cascades_to_children() {
    let (log, record) = recorder();
    let parent = ResourceScope::new();
    parent.register(record("parent"));
    let child = parent.open_child();
    child.register(record("child"));
    let grandchild = child.open_child();
    grandchild.register(record("grandchild"));

    parent.dispose();
    assert!(child.is_disposed());
    assert!(grandchild.is_disposed());
    assert_eq!(*log.lock().unwrap(), ["grandchild", "child", "parent"]);
}

#[test]
fn children_can_be_disposed_early() {
    let (log, record) = recorder();
    let parent = ResourceScope::new();
    let child = parent.open_child();
    child.register(record("child"));

    child.dispose();
    assert!(!parent.is_disposed());
    parent.dispose();
    assert_eq!(*log.lock().unwrap(), ["child"]);
}

#[test]
fn children_of_disposed_scopes_start_disposed() {
    let parent = ResourceScope::new();
    parent.dispose();
    assert!(parent.open_child().is_disposed());
}

#[test]
fn panicking_release_does_not_stop_the_others() {
    let (log, record) = recorder();
    let scope = ResourceScope::new();
    scope.register(record("first"));
    scope.register(|| panic!("release failed"));
    scope.register(record("last"));

    scope.dispose();
    assert_eq!(*log.lock().unwrap(), ["last", "first"]);
}

#[test]
fn dropping_the_last_handle_disposes_a_root_scope() {
    let (log, record) = recorder();
    let scope = ResourceScope::new();
    scope.register(record("dropped"));
    let clone = scope.clone();
    drop(scope);
    assert!(log.lock().unwrap().is_empty());

    drop(clone);
    assert_eq!(*log.lock().unwrap(), ["dropped"]);
}

#[test]
fn signal_is_created_lazily_and_fires_on_dispose() {
    let ctx = CancellationContext::new();
    ctx.dispose();
    // asked for after disposal: already fired
    assert!(ctx.signal().is_canceled());

    let ctx = CancellationContext::new();
    let signal = ctx.signal();
    assert!(!signal.is_canceled());
    assert_eq!(signal.check(), Ok(()));
    let fired = Arc::new(AtomicUsize::new(0));
    signal.on_cancel({
        let fired = Arc::clone(&fired);
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    });

    ctx.dispose();
    ctx.dispose();
    assert!(signal.is_canceled());
    assert_eq!(signal.check(), Err(Canceled));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.check(), Err(Canceled));
}

#[test]
fn child_contexts_are_canceled_with_their_parent() {
    let parent = ResourceScope::new();
    let ctx = CancellationContext::child_of(&parent);
    let signal = ctx.signal();

    parent.dispose();
    assert!(ctx.is_disposed());
    assert!(signal.is_canceled());
}

#[test]
fn cancelled_future_resolves_on_dispose() {
    let ctx = CancellationContext::new();
    let mut cancelled = tokio_test::task::spawn(ctx.signal().cancelled());
    assert_eq!(cancelled.poll(), Poll::Pending);

    ctx.dispose();
    assert!(cancelled.is_woken());
    assert_eq!(cancelled.poll(), Poll::Ready(()));
}

#[test]
fn with_cancel_stops_polling_the_inner_future() {
    let ctx = CancellationContext::new();
    let mut raced = tokio_test::task::spawn(with_cancel(
        std::future::pending::<()>(),
        &ctx.signal(),
    ));
    assert_eq!(raced.poll(), Poll::Pending);

    ctx.dispose();
    assert_eq!(raced.poll(), Poll::Ready(Err(Canceled)));
}

#[tokio::test(start_paused = true)]
async fn run_returns_early_when_disposed() {
    _ = Executor::init_tokio();
    LocalSet::new()
        .run_until(async {
            let ctx = CancellationContext::new();
            let finished = Arc::new(AtomicUsize::new(0));
            Executor::spawn_local({
                let ctx = ctx.clone();
                let finished = Arc::clone(&finished);
                async move {
                    let result = ctx
                        .run(tokio::time::sleep(Duration::from_secs(60)))
                        .await;
                    assert_eq!(result, Err(Canceled));
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            });

            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx.dispose();
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(finished.load(Ordering::SeqCst), 1);
        })
        .await;
}
