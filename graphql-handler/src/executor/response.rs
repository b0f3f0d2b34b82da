use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json_bytes::ByteString;
use tower::BoxError;

use crate::execution::ExecutionError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::middleware::Chain;
use crate::operation::OperationContext;

/// Turns any error into the error shown to clients.
///
/// The operation is `None` for failures caught before any operation was read.
pub type ErrorPresenter = Arc<
    dyn Fn(Option<&OperationContext>, Option<&Path>, BoxError) -> graphql::Error + Send + Sync,
>;

/// Turns a panic payload into an error.
pub type RecoverFunc =
    Arc<dyn Fn(Option<&OperationContext>, Box<dyn Any + Send>) -> BoxError + Send + Sync>;

/// Keeps a [`graphql::Error`] as is, filling in the path when it has none. Any other error
/// becomes an error carrying its message.
pub fn default_error_presenter() -> ErrorPresenter {
    Arc::new(|_operation, path, error| {
        let error = match error.downcast::<graphql::Error>() {
            Ok(error) => *error,
            Err(error) => graphql::Error::builder().message(error.to_string()).build(),
        };
        error.or_path(path)
    })
}

/// Logs the panic and hides it behind a generic message.
pub fn default_recover_func() -> RecoverFunc {
    Arc::new(|operation, payload| {
        let message = panic_message(payload.as_ref());
        let operation_name = operation.and_then(|operation| operation.operation_name.as_deref());
        tracing::error!(panic = %message, operation_name, "recovered from a panic");
        "internal system error".into()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Default)]
struct Errors {
    list: Vec<graphql::Error>,
    // how many were already copied into the response
    flushed: usize,
}

/// Errors and response extensions accumulated while one response is produced.
pub struct ResponseContext {
    pub operation: Arc<OperationContext>,
    errors: Mutex<Errors>,
    extensions: Mutex<Object>,
    presenter: ErrorPresenter,
    recover_func: RecoverFunc,
}

impl ResponseContext {
    pub(crate) fn new(
        operation: Arc<OperationContext>,
        presenter: ErrorPresenter,
        recover_func: RecoverFunc,
    ) -> Self {
        Self {
            operation,
            errors: Mutex::new(Errors::default()),
            extensions: Mutex::new(Object::new()),
            presenter,
            recover_func,
        }
    }

    /// Presents `error` and appends it to the response errors.
    pub fn add_error(&self, path: Option<&Path>, error: BoxError) {
        let error = (self.presenter)(Some(self.operation.as_ref()), path, error);
        self.errors.lock().list.push(error);
    }

    pub(crate) fn add_execution_error(&self, path: &Path, error: ExecutionError) {
        match error {
            ExecutionError::Resolver(error) => self.add_error(Some(path), error),
            ExecutionError::Recovered(error) => self.errors.lock().list.push(error),
        }
    }

    /// Converts a panic payload into a presented error.
    pub fn recover(&self, path: Option<&Path>, payload: Box<dyn Any + Send>) -> graphql::Error {
        let operation = Some(self.operation.as_ref());
        (self.presenter)(operation, path, (self.recover_func)(operation, payload))
    }

    /// Every error reported so far.
    pub fn errors(&self) -> Vec<graphql::Error> {
        self.errors.lock().list.clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().list.is_empty()
    }

    /// Sets a key of the response `extensions`.
    pub fn register_extension(&self, key: impl Into<ByteString>, value: impl Into<Value>) {
        self.extensions.lock().insert(key.into(), value.into());
    }

    pub fn extension(&self, key: &str) -> Option<Value> {
        self.extensions.lock().get(key).cloned()
    }

    /// Copies the errors not yet flushed and the registered extensions into `response`.
    pub(crate) fn flush_into(&self, response: &mut graphql::Response) {
        {
            let mut errors = self.errors.lock();
            let flushed = errors.flushed;
            response.errors.extend(errors.list[flushed..].iter().cloned());
            errors.flushed = errors.list.len();
        }
        for (key, value) in self.extensions.lock().iter() {
            response
                .extensions
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

impl fmt::Debug for ResponseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseContext")
            .field("operation", &self.operation.operation_name)
            .field("errors", &self.errors.lock().list)
            .finish()
    }
}

/// Produces the response of a dispatched operation.
///
/// Returned by operation middleware; calling it runs field execution.
pub struct ResponseHandler {
    inner: Box<dyn FnOnce(Arc<ResponseContext>) -> BoxFuture<'static, graphql::Response> + Send>,
}

impl ResponseHandler {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: FnOnce(Arc<ResponseContext>) -> Fut + Send + 'static,
        Fut: Future<Output = graphql::Response> + Send + 'static,
    {
        Self {
            inner: Box::new(move |response| handler(response).boxed()),
        }
    }

    /// A handler answering with a fixed response.
    pub fn from_response(response: graphql::Response) -> Self {
        Self::new(move |_| async move { response })
    }

    pub fn call(self, response: Arc<ResponseContext>) -> BoxFuture<'static, graphql::Response> {
        (self.inner)(response)
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandler").finish()
    }
}

/// The deferred result of [`Executor::dispatch_operation`](super::Executor::dispatch_operation).
///
/// Field resolution happens in [`ResponseProducer::produce`].
pub struct ResponseProducer {
    pub(crate) operation: Arc<OperationContext>,
    pub(crate) handler: ResponseHandler,
    pub(crate) response_middleware: Chain<Arc<ResponseContext>, graphql::Response>,
    pub(crate) presenter: ErrorPresenter,
    pub(crate) recover_func: RecoverFunc,
}

impl ResponseProducer {
    /// The operation context as it reached the innermost operation middleware.
    pub fn operation(&self) -> &Arc<OperationContext> {
        &self.operation
    }

    /// Runs the response middleware around the handler.
    pub async fn produce(self) -> graphql::Response {
        let context = Arc::new(ResponseContext::new(
            self.operation,
            self.presenter,
            self.recover_func,
        ));
        respond(context, &self.response_middleware, self.handler).await
    }
}

/// Runs `chain` around `handler`.
///
/// Errors and extensions queued on `context` only reach the response when the chain calls
/// through to `handler`; a middleware answering on its own gets exactly what it returned.
pub(crate) async fn respond(
    context: Arc<ResponseContext>,
    chain: &Chain<Arc<ResponseContext>, graphql::Response>,
    handler: ResponseHandler,
) -> graphql::Response {
    let reached = Arc::new(AtomicBool::new(false));
    let endpoint_reached = reached.clone();
    let produced = AssertUnwindSafe(chain.run(
        context.clone(),
        move |context: Arc<ResponseContext>| async move {
            endpoint_reached.store(true, Ordering::Release);
            let mut response = handler.call(context.clone()).await;
            context.flush_into(&mut response);
            response
        },
    ))
    .catch_unwind()
    .await;
    let mut response = match produced {
        Ok(response) => response,
        Err(payload) => graphql::Response::from_errors(vec![context.recover(None, payload)]),
    };
    if reached.load(Ordering::Acquire) {
        // errors added by response middleware after the handler returned
        context.flush_into(&mut response);
    }
    response
}
