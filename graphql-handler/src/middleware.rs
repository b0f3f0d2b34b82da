//! Around-operation, around-response and around-field middleware chains.
//!
//! A middleware receives the request scoped context and a [`Next`] continuation. Calling
//! [`Next::run`] hands control to the following middleware, and eventually to the wrapped
//! stage; not calling it short-circuits everything inside. Middleware run in registration
//! order: the first registered sees the context first and the result last.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::BoxError;

use crate::execution::FieldContext;
use crate::execution::ResolvedValue;
use crate::executor::ResponseContext;
use crate::executor::ResponseHandler;
use crate::graphql;
use crate::operation::OperationContext;

/// A middleware wrapping a stage that turns a `C` into an `R`.
pub type Middleware<C, R> = Arc<dyn Fn(C, Next<C, R>) -> BoxFuture<'static, R> + Send + Sync>;

type Endpoint<C, R> = Box<dyn FnOnce(C) -> BoxFuture<'static, R> + Send>;

/// Wraps dispatch: from a built [`OperationContext`] to a [`ResponseHandler`].
pub type OperationMiddleware = Middleware<Arc<OperationContext>, ResponseHandler>;
pub type OperationNext = Next<Arc<OperationContext>, ResponseHandler>;

/// Wraps response production: from the [`ResponseContext`] to the final response.
pub type ResponseMiddleware = Middleware<Arc<ResponseContext>, graphql::Response>;
pub type ResponseNext = Next<Arc<ResponseContext>, graphql::Response>;

/// What a field resolver, or a field middleware in its place, produces.
pub type FieldResult = Result<ResolvedValue, BoxError>;

/// Wraps the resolution of one field.
pub type FieldMiddleware = Middleware<Arc<FieldContext>, FieldResult>;
pub type FieldNext = Next<Arc<FieldContext>, FieldResult>;

/// Builds a [`Middleware`] out of an async closure.
pub fn from_fn<C, R, F, Fut>(f: F) -> Middleware<C, R>
where
    F: Fn(C, Next<C, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    Arc::new(move |context, next| f(context, next).boxed())
}

/// An ordered list of middleware, fixed at registration.
pub struct Chain<C, R> {
    middleware: Arc<[Middleware<C, R>]>,
}

impl<C, R> Clone for Chain<C, R> {
    fn clone(&self) -> Self {
        Self {
            middleware: self.middleware.clone(),
        }
    }
}

impl<C, R> Default for Chain<C, R> {
    fn default() -> Self {
        Self {
            middleware: Arc::new([]),
        }
    }
}

impl<C, R> Chain<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    /// Appends `middleware`, it will run inside every middleware already registered.
    pub fn push(&mut self, middleware: Middleware<C, R>) {
        let mut list = self.middleware.to_vec();
        list.push(middleware);
        self.middleware = list.into();
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Runs the chain around `endpoint`.
    pub fn run<F, Fut>(&self, context: C, endpoint: F) -> BoxFuture<'static, R>
    where
        F: FnOnce(C) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        Next {
            chain: self.middleware.clone(),
            index: 0,
            endpoint: Box::new(move |context| endpoint(context).boxed()),
        }
        .run(context)
    }
}

/// The remainder of a chain, handed to each middleware.
pub struct Next<C, R> {
    chain: Arc<[Middleware<C, R>]>,
    index: usize,
    endpoint: Endpoint<C, R>,
}

impl<C, R> Next<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    /// Invokes the next middleware, or the wrapped stage once the chain is exhausted.
    pub fn run(self, context: C) -> BoxFuture<'static, R> {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => middleware(
                context,
                Next {
                    chain: self.chain,
                    index: self.index + 1,
                    endpoint: self.endpoint,
                },
            ),
            None => (self.endpoint)(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Middleware<u32, u32> {
        let log = log.clone();
        from_fn(move |context: u32, next: Next<u32, u32>| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{name} in"));
                let result = next.run(context + 1).await;
                log.lock().push(format!("{name} out"));
                result * 10
            }
        })
    }

    #[tokio::test]
    async fn runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = Chain::default();
        chain.push(recording(&log, "A"));
        chain.push(recording(&log, "B"));

        let endpoint_log = log.clone();
        let result = chain
            .run(0, move |context| async move {
                endpoint_log.lock().push("endpoint".to_string());
                context
            })
            .await;

        assert_eq!(result, 200);
        assert_eq!(
            *log.lock(),
            vec!["A in", "B in", "endpoint", "B out", "A out"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain: Chain<u32, u32> = Chain::default();
        chain.push(from_fn(|_context: u32, _next: Next<u32, u32>| async { 42 }));
        chain.push(recording(&log, "B"));

        let endpoint_log = log.clone();
        let result = chain
            .run(0, move |context| async move {
                endpoint_log.lock().push("endpoint".to_string());
                context
            })
            .await;

        assert_eq!(result, 42);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_chain_calls_endpoint() {
        let chain: Chain<u32, u32> = Chain::default();
        assert!(chain.is_empty());
        assert_eq!(chain.run(3, |context| async move { context * 2 }).await, 6);
    }
}
