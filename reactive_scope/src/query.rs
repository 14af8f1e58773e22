//! Queries and mutations over an [`Execute`] capability.

use crate::{
    backend::{Execute, OperationContext, OperationDescriptor, OperationKind},
    error::{Error, Result},
    scope::{Disposable, ResourceScope},
    signal::ArcSignal,
    stable::reconcile,
    task::{AsyncTask, RunCompletion, TaskPhase},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Map;
use std::{fmt::Debug, marker::PhantomData, sync::Arc};

async fn execute<V, T>(
    client: &dyn Execute,
    operation: &OperationDescriptor,
    expected: OperationKind,
    variables: &V,
    context: &OperationContext,
) -> Result<T>
where
    V: Serialize + ?Sized,
    T: DeserializeOwned,
{
    if operation.kind != expected {
        return Err(Error::InvalidState(
            format!(
                "`{}` is a {:?} operation, expected {:?}",
                operation.name, operation.kind, expected
            )
            .into(),
        ));
    }
    let variables =
        serde_json::to_value(variables).map_err(Error::operation)?;
    let data = client.execute(operation, variables, context).await?;
    serde_json::from_value(data).map_err(Error::operation)
}

/// Runs a query once.
pub async fn query<V, T>(
    client: &dyn Execute,
    operation: &OperationDescriptor,
    variables: &V,
    context: &OperationContext,
) -> Result<T>
where
    V: Serialize + ?Sized,
    T: DeserializeOwned,
{
    execute(client, operation, OperationKind::Query, variables, context).await
}

/// Runs a mutation once.
pub async fn mutate<V, T>(
    client: &dyn Execute,
    operation: &OperationDescriptor,
    variables: &V,
    context: &OperationContext,
) -> Result<T>
where
    V: Serialize + ?Sized,
    T: DeserializeOwned,
{
    execute(client, operation, OperationKind::Mutation, variables, context)
        .await
}

/// A query that reruns whenever its variables change.
///
/// While a rerun is in flight the previous data stays visible, and a
/// result equal to the data already shown does not notify watchers of
/// [`Query::data`].
pub struct Query<V, T> {
    task: AsyncTask<Option<V>, Arc<T>>,
    data: ArcSignal<Option<Arc<T>>>,
    scope: ResourceScope,
}

impl<V, T> Clone for Query<V, T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            data: self.data.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<V, T> Query<V, T>
where
    V: Clone + PartialEq + Serialize + Send + Sync + 'static,
    T: DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    pub fn builder(
        client: Arc<dyn Execute>,
        operation: OperationDescriptor,
    ) -> QueryBuilder<V, T> {
        QueryBuilder {
            client,
            operation,
            context: OperationContext::default(),
            variables: None,
            loading_count: None,
            ty: PhantomData,
        }
    }

    /// The latest data, kept while variables change and cleared when they
    /// become absent.
    pub fn data(&self) -> ArcSignal<Option<Arc<T>>> {
        self.data.clone()
    }

    pub fn error(&self) -> ArcSignal<Option<Error>> {
        self.task.error()
    }

    pub fn is_loading(&self) -> bool {
        self.task.phase().get() == TaskPhase::Running
    }

    /// Reruns with the current variables.
    pub fn refetch(&self) -> Result<RunCompletion> {
        self.task.restart(None)
    }

    /// Cancels the query in flight and stops following the variables.
    pub fn dispose(&self) {
        self.scope.dispose();
    }
}

impl<V, T> Disposable for Query<V, T>
where
    V: Clone + PartialEq + Serialize + Send + Sync + 'static,
    T: DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    fn dispose(&self) {
        Query::dispose(self)
    }
}

impl<V, T: Debug> Debug for Query<V, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("task", &self.task)
            .field("data", &self.data)
            .finish()
    }
}

/// Configures a [`Query`].
#[must_use]
pub struct QueryBuilder<V, T> {
    client: Arc<dyn Execute>,
    operation: OperationDescriptor,
    context: OperationContext,
    variables: Option<ArcSignal<Option<V>>>,
    loading_count: Option<ArcSignal<usize>>,
    ty: PhantomData<fn() -> T>,
}

impl<V, T> QueryBuilder<V, T>
where
    V: Clone + PartialEq + Serialize + Send + Sync + 'static,
    T: DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    pub fn context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    /// Where the variables come from. `None` means "not ready yet".
    pub fn variables(mut self, variables: &ArcSignal<Option<V>>) -> Self {
        self.variables = Some(variables.clone());
        self
    }

    pub fn loading_count(mut self, counter: &ArcSignal<usize>) -> Self {
        self.loading_count = Some(counter.clone());
        self
    }

    /// Creates the query inside a child of `scope`. A query with variables
    /// runs as soon as they are present; one without runs right away.
    pub fn build(self, scope: &ResourceScope) -> Query<V, T> {
        let Self {
            client,
            operation,
            context,
            variables,
            loading_count,
            ..
        } = self;
        let scope = scope.open_child();
        let data = ArcSignal::new(None::<Arc<T>>);

        let mut task =
            AsyncTask::<Option<V>, Arc<T>>::builder(move |vars, _| {
                let client = Arc::clone(&client);
                let operation = operation.clone();
                let context = context.clone();
                async move {
                    let value: T = match &vars {
                        Some(vars) => {
                            query(&*client, &operation, vars, &context).await?
                        }
                        None => {
                            query(&*client, &operation, &Map::new(), &context)
                                .await?
                        }
                    };
                    Ok(Arc::new(value))
                }
            })
            .keep_latest(true);
        if let Some(counter) = &loading_count {
            task = task.loading_count(counter);
        }
        // `Some(None)` is a ready query without variables
        let args = match &variables {
            Some(variables) => {
                let args = ArcSignal::new(variables.get().map(Some));
                variables.watch(&scope, {
                    let data = data.clone();
                    let args = args.clone();
                    move |vars| {
                        if vars.is_none() {
                            data.set(None);
                        }
                        args.set(vars.clone().map(Some));
                    }
                });
                args
            }
            None => ArcSignal::new(Some(None)),
        };
        task = task.args(&args);
        let task = task.build(&scope);

        task.value().watch(&scope, {
            let data = data.clone();
            move |value| {
                let Some(value) = value else {
                    return;
                };
                let previous = data.get();
                let next = reconcile(Arc::clone(value), previous.as_ref());
                let changed = previous
                    .is_none_or(|previous| !Arc::ptr_eq(&previous, &next));
                if changed {
                    data.set(Some(next));
                }
            }
        });
        Query { task, data, scope }
    }
}
