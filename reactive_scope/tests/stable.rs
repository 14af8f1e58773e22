use reactive_scope::{
    scope::ResourceScope,
    signal::ArcSignal,
    stable::{reconcile, stable_map, ByAddress, StableMemo},
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

#[test]
fn structurally_equal_results_reuse_the_previous_allocation() {
    let mut memo = StableMemo::new();
    let first = memo.reconcile(json!({ "user": { "id": 1, "tags": ["a"] } }));
    let second = memo.reconcile(json!({ "user": { "id": 1, "tags": ["a"] } }));
    assert!(Arc::ptr_eq(&first, &second));

    let third = memo.reconcile(json!({ "user": { "id": 1, "tags": ["b"] } }));
    assert!(!Arc::ptr_eq(&second, &third));
    assert!(Arc::ptr_eq(memo.last().unwrap(), &third));
}

#[test]
fn identity_wrapped_values_never_match_other_instances() {
    let a = ByAddress(Arc::new(Mutex::new(1)));
    let b = ByAddress(Arc::new(Mutex::new(1)));
    let previous = Arc::new(a.clone());

    let kept = reconcile(Arc::new(a), Some(&previous));
    assert!(Arc::ptr_eq(&kept, &previous));

    // equal contents, different instance
    let replaced = reconcile(Arc::new(b), Some(&previous));
    assert!(!Arc::ptr_eq(&replaced, &previous));
}

#[test]
fn derived_signals_only_notify_on_real_changes() {
    let scope = ResourceScope::new();
    let source = ArcSignal::new((3_u32, "ignored"));
    let derived = stable_map(&scope, &source, |&(n, _)| vec![n; 2]);
    let notified = Arc::new(AtomicUsize::new(0));
    derived.watch(&scope, {
        let notified = Arc::clone(&notified);
        move |_| {
            notified.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert_eq!(*derived.get(), [3, 3]);
    let before = derived.get();
    source.set((3, "changed, but not in the derived part"));
    assert!(Arc::ptr_eq(&before, &derived.get()));
    assert_eq!(notified.load(Ordering::SeqCst), 0);

    source.set((4, "changed"));
    assert_eq!(*derived.get(), [4, 4]);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    scope.dispose();
    source.set((5, "unfollowed"));
    assert_eq!(*derived.get(), [4, 4]);
}
