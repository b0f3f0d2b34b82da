//! The unit of work built from one request: raw parameters and the validated operation.

use std::sync::Arc;
use std::time::SystemTime;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::validation::Valid;
use http::HeaderMap;

use crate::context::Context;
use crate::graphql;
use crate::json_ext::Object;
use crate::upload::Uploads;

/// A parsed and validated document, as stored in the query cache.
pub type CachedDocument = Arc<Valid<ExecutableDocument>>;

/// Start and end of a step of the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceTiming {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl TraceTiming {
    /// A zero length timing at the current instant.
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            start: now,
            end: now,
        }
    }

    /// A timing that started at `start` and ends now.
    pub fn since(start: SystemTime) -> Self {
        Self {
            start,
            end: SystemTime::now(),
        }
    }
}

impl Default for TraceTiming {
    fn default() -> Self {
        Self::now()
    }
}

/// Wire level parameters extracted by a transport.
///
/// Consumed once by [`Executor::create_operation_context`](crate::Executor::create_operation_context).
#[derive(Clone, Debug, Default)]
pub struct RawParams {
    pub query: Option<String>,
    pub operation_name: Option<String>,
    pub variables: Object,
    pub extensions: Object,
    pub headers: HeaderMap,
    pub read_time: TraceTiming,
    pub uploads: Uploads,
    pub context: Context,
}

impl RawParams {
    pub fn new(request: graphql::Request, read_time: TraceTiming) -> Self {
        Self {
            query: request.query.filter(|query| !query.is_empty()),
            operation_name: request.operation_name.filter(|name| !name.is_empty()),
            variables: request.variables,
            extensions: request.extensions,
            read_time,
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Timings and extension specific statistics for one operation.
#[derive(Clone, Debug)]
pub struct Stats {
    pub operation_start: SystemTime,
    pub read: TraceTiming,
    pub parsing: TraceTiming,
    pub validation: TraceTiming,
    extensions: http::Extensions,
}

impl Stats {
    pub(crate) fn new(read: TraceTiming) -> Self {
        Self {
            operation_start: read.start,
            read,
            parsing: TraceTiming::now(),
            validation: TraceTiming::now(),
            extensions: http::Extensions::new(),
        }
    }

    /// Attaches statistics recorded by an extension.
    pub fn set_extension<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(value);
    }

    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }
}

/// A validated operation ready to execute.
///
/// Built by [`Executor::create_operation_context`](crate::Executor::create_operation_context),
/// mutated by extensions while it is built, then shared read-only for the rest of the request.
#[derive(Clone, Debug)]
pub struct OperationContext {
    pub raw_query: String,
    pub operation_name: Option<String>,
    /// Variables coerced to the types the operation declares.
    pub variables: Object,
    /// The request `extensions`.
    pub extensions: Object,
    pub headers: HeaderMap,
    pub document: Option<CachedDocument>,
    pub operation: Option<Node<Operation>>,
    pub disable_introspection: bool,
    pub stats: Stats,
    pub uploads: Uploads,
    pub context: Context,
}

impl OperationContext {
    pub(crate) fn new(params: &RawParams) -> Self {
        Self {
            raw_query: params.query.clone().unwrap_or_default(),
            operation_name: params.operation_name.clone(),
            variables: Object::new(),
            extensions: params.extensions.clone(),
            headers: params.headers.clone(),
            document: None,
            operation: None,
            disable_introspection: true,
            stats: Stats::new(params.read_time),
            uploads: params.uploads.clone(),
            context: params.context.clone(),
        }
    }

    pub fn operation_type(&self) -> Option<OperationType> {
        self.operation
            .as_ref()
            .map(|operation| operation.operation_type)
    }
}

/// Failure to build an [`OperationContext`].
///
/// The partially built context is kept so response middleware can still observe the request.
#[derive(Debug)]
pub struct OperationError {
    pub context: OperationContext,
    pub errors: Vec<graphql::Error>,
}

impl OperationError {
    pub(crate) fn new(context: OperationContext, errors: Vec<graphql::Error>) -> Box<Self> {
        Box::new(Self { context, errors })
    }
}
