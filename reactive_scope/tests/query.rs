use any_spawner::Executor;
use futures::{future::LocalBoxFuture, FutureExt};
use reactive_scope::{
    backend::{
        Execute, GraphqlError, OperationContext, OperationDescriptor,
        OperationKind, Transport,
    },
    error::{Error, Result},
    query::{mutate, query, Query},
    scope::ResourceScope,
    signal::ArcSignal,
    task::RunOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{task::LocalSet, time::sleep};

const USER: OperationDescriptor = OperationDescriptor::new(
    "User",
    OperationKind::Query,
    "query User($id: Int!) { user(id: $id) { id name } }",
);

const RENAME: OperationDescriptor = OperationDescriptor::new(
    "Rename",
    OperationKind::Mutation,
    "mutation Rename($id: Int!) { rename(id: $id) { id name } }",
);

#[derive(Debug, Clone, PartialEq, Serialize)]
struct UserVars {
    id: u32,
}

#[derive(Debug, PartialEq, Deserialize)]
struct User {
    id: u32,
    name: String,
}

/// Answers every operation after 10ms. Id 404 fails.
#[derive(Default)]
struct FakeApi {
    calls: AtomicUsize,
    transports: Mutex<Vec<String>>,
}

impl Execute for FakeApi {
    fn execute(
        &self,
        operation: &OperationDescriptor,
        variables: Value,
        context: &OperationContext,
    ) -> LocalBoxFuture<'static, Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transports
            .lock()
            .unwrap()
            .push(format!("{}:{}", operation.name, context.transport));
        async move {
            sleep(Duration::from_millis(10)).await;
            let id = variables["id"].as_u64().unwrap_or_default();
            if id == 404 {
                return Err(Error::from(GraphqlError::new("no such user")));
            }
            Ok(json!({ "id": id, "name": format!("user {id}") }))
        }
        .boxed_local()
    }
}

async fn run_local<F: Future>(fut: F) -> F::Output {
    _ = Executor::init_tokio();
    LocalSet::new().run_until(fut).await
}

#[tokio::test(start_paused = true)]
async fn one_shot_operations_check_their_kind() {
    run_local(async {
        let api = FakeApi::default();
        let context = OperationContext::default()
            .with_transport(Transport::BatchHttp(Some("users".into())));

        let user: User = query(&api, &USER, &UserVars { id: 7 }, &context)
            .await
            .unwrap();
        assert_eq!(
            user,
            User {
                id: 7,
                name: "user 7".into()
            }
        );

        let renamed: User =
            mutate(&api, &RENAME, &UserVars { id: 8 }, &context)
                .await
                .unwrap();
        assert_eq!(renamed.id, 8);

        let wrong_kind =
            mutate::<_, User>(&api, &USER, &UserVars { id: 9 }, &context)
                .await;
        assert!(matches!(wrong_kind, Err(Error::InvalidState(_))));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *api.transports.lock().unwrap(),
            ["User:batch-http:users", "Rename:batch-http:users"]
        );

        let missing = query::<_, User>(
            &api,
            &USER,
            &UserVars { id: 404 },
            &OperationContext::default(),
        )
        .await;
        let Err(Error::Operation(err)) = missing else {
            panic!("expected an operation error");
        };
        assert!(err.downcast_ref::<GraphqlError>().is_some());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn queries_follow_their_variables() {
    run_local(async {
        let scope = ResourceScope::new();
        let api = Arc::new(FakeApi::default());
        let variables = ArcSignal::new(None::<UserVars>);
        let loading = ArcSignal::new(0_usize);
        let user = Query::<_, User>::builder(api.clone(), USER)
            .variables(&variables)
            .loading_count(&loading)
            .build(&scope);
        let notified = Arc::new(AtomicUsize::new(0));
        user.data().watch(&scope, {
            let notified = Arc::clone(&notified);
            move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            }
        });

        // no variables yet
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert!(!user.is_loading());
        assert!(matches!(user.refetch(), Err(Error::InvalidState(_))));

        variables.set(Some(UserVars { id: 1 }));
        assert!(user.is_loading());
        assert_eq!(loading.get(), 1);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(loading.get(), 0);
        let first = user.data().get().unwrap();
        assert_eq!(first.name, "user 1");
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        // identical data keeps the same allocation and notifies nobody
        let refetched = user.refetch().unwrap();
        assert!(Arc::ptr_eq(&first, &user.data().get().unwrap()));
        assert_eq!(refetched.await, RunOutcome::Resolved);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&first, &user.data().get().unwrap()));
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        variables.set(Some(UserVars { id: 2 }));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(user.data().get().unwrap().name, "user 2");
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        variables.set(None);
        assert_eq!(user.data().get(), None);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn query_errors_are_exposed() {
    run_local(async {
        let scope = ResourceScope::new();
        let api = Arc::new(FakeApi::default());
        let variables = ArcSignal::new(Some(UserVars { id: 404 }));
        let user = Query::<_, User>::builder(api, USER)
            .variables(&variables)
            .build(&scope);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(
            user.error().get().map(|err| err.to_string()),
            Some("no such user".to_owned())
        );
        assert_eq!(user.data().get(), None);

        variables.set(Some(UserVars { id: 3 }));
        assert!(user.error().get().is_none());
        sleep(Duration::from_millis(20)).await;
        assert_eq!(user.data().get().unwrap().id, 3);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn disposed_queries_stop_fetching() {
    run_local(async {
        let scope = ResourceScope::new();
        let api = Arc::new(FakeApi::default());
        let variables = ArcSignal::new(Some(UserVars { id: 1 }));
        let user = Query::<_, User>::builder(api.clone(), USER)
            .variables(&variables)
            .build(&scope);

        // canceled before the backend was ever reached
        user.dispose();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(user.data().get(), None);

        variables.set(Some(UserVars { id: 2 }));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(user.data().get(), None);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn queries_without_variables_run_right_away() {
    run_local(async {
        let scope = ResourceScope::new();
        let api = Arc::new(FakeApi::default());
        let user = Query::<UserVars, User>::builder(api.clone(), USER)
            .build(&scope);

        assert!(user.is_loading());
        sleep(Duration::from_millis(20)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(user.data().get().unwrap().name, "user 0");

        let refetched = user.refetch().unwrap();
        assert_eq!(refetched.await, RunOutcome::Resolved);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    })
    .await;
}
