//! Capabilities the runtime consumes from a data backend.
//!
//! The runtime never talks to a network itself. Queries and mutations go
//! through an [`Execute`] implementation and live updates through a
//! [`Subscribe`] implementation; both exchange JSON values.

use crate::error::{OperationError, Result};
use futures::{future::LocalBoxFuture, stream::LocalBoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{borrow::Cow, error, fmt};

/// What an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// A named operation document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationDescriptor {
    pub name: Cow<'static, str>,
    pub kind: OperationKind,
    pub document: Cow<'static, str>,
}

impl OperationDescriptor {
    pub const fn new(
        name: &'static str,
        kind: OperationKind,
        document: &'static str,
    ) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind,
            document: Cow::Borrowed(document),
        }
    }
}

/// Which channel an operation should prefer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Transport {
    #[default]
    Http,
    /// Batched HTTP, optionally keyed so that only operations with the same
    /// key share a batch.
    BatchHttp(Option<Cow<'static, str>>),
    WebSocket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Http => f.write_str("http"),
            Transport::BatchHttp(None) => f.write_str("batch-http"),
            Transport::BatchHttp(Some(key)) => write!(f, "batch-http:{key}"),
            Transport::WebSocket => f.write_str("ws"),
        }
    }
}

/// Hints passed along with an operation. The runtime does not interpret
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub transport: Transport,
    /// Do not show notifications for errors of this operation.
    pub suppress_error: bool,
    /// Send the full document instead of relying on a persisted query.
    pub include_query: bool,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            suppress_error: false,
            include_query: true,
        }
    }
}

impl OperationContext {
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn suppress_error(mut self, suppress: bool) -> Self {
        self.suppress_error = suppress;
        self
    }
}

/// Runs queries and mutations.
pub trait Execute: Send + Sync {
    fn execute(
        &self,
        operation: &OperationDescriptor,
        variables: Value,
        context: &OperationContext,
    ) -> LocalBoxFuture<'static, Result<Value>>;
}

/// Opens live subscriptions. Dropping the stream tears the subscription
/// down.
pub trait Subscribe: Send + Sync {
    fn subscribe(
        &self,
        operation: &OperationDescriptor,
        variables: Value,
    ) -> Result<LocalBoxStream<'static, Result<Value>>>;
}

/// An error reported by the backend for a single operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: Map::new(),
        }
    }

    /// Adds a translation of the message under `extensions.locales`.
    pub fn with_locale(
        mut self,
        lang: &str,
        message: impl Into<String>,
    ) -> Self {
        let locales = self
            .extensions
            .entry("locales")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(locales) = locales {
            locales.insert(lang.to_owned(), Value::String(message.into()));
        }
        self
    }

    /// The message translated into `lang`, falling back to the plain
    /// message.
    pub fn localized_message(&self, lang: &str) -> &str {
        self.extensions
            .get("locales")
            .and_then(|locales| locales.get(lang))
            .and_then(Value::as_str)
            .unwrap_or(&self.message)
    }
}

impl fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl error::Error for GraphqlError {}

impl From<GraphqlError> for OperationError {
    fn from(value: GraphqlError) -> Self {
        OperationError::new(value)
    }
}

impl From<GraphqlError> for crate::Error {
    fn from(value: GraphqlError) -> Self {
        crate::Error::Operation(value.into())
    }
}

/// The message of `err` as it should be shown in `lang`.
pub fn error_message(err: &crate::Error, lang: &str) -> String {
    match err {
        crate::Error::Operation(inner) | crate::Error::Scheduling(inner) => {
            match inner.downcast_ref::<GraphqlError>() {
                Some(graphql) => graphql.localized_message(lang).to_owned(),
                None => inner.to_string(),
            }
        }
        other => other.to_string(),
    }
}
