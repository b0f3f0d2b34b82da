//! The HTTP entry point: transport selection in front of an [`Executor`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Router;
use axum::routing::any;
use displaydoc::Display;
use futures::FutureExt;
use http::StatusCode;
use thiserror::Error;
use tower::BoxError;

use crate::cache::DEFAULT_APQ_CACHE_CAPACITY;
use crate::cache::DEFAULT_QUERY_CACHE_CAPACITY;
use crate::cache::LruQueryCache;
use crate::cache::QueryCache;
use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::execution::ExecutableSchema;
use crate::executor::ErrorPresenter;
use crate::executor::Executor;
use crate::executor::HandlerExtension;
use crate::executor::RecoverFunc;
use crate::graphql;
use crate::middleware::FieldMiddleware;
use crate::middleware::OperationMiddleware;
use crate::middleware::ResponseMiddleware;
use crate::operation::CachedDocument;
use crate::plugins::ApolloTracing;
use crate::plugins::AutomaticPersistedQuery;
use crate::plugins::ComplexityLimit;
use crate::plugins::Introspection;
use crate::transport;
use crate::transport::Body;
use crate::transport::Transport;

const TRANSPORT_NOT_SUPPORTED: &str = "transport not supported";

/// Failures to build a [`Server`].
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ServerError {
    /// invalid configuration: {0}
    Configuration(#[from] ConfigurationError),

    /// could not install extension {name}: {error}
    Extension {
        name: &'static str,
        #[source]
        error: BoxError,
    },
}

impl From<ServerError> for graphql::Error {
    fn from(value: ServerError) -> Self {
        Self::builder().message(value.to_string()).build()
    }
}

/// Serves GraphQL over HTTP for one executable schema.
///
/// Requests go to the first registered transport that supports them.
pub struct Server {
    transports: Vec<Arc<dyn Transport>>,
    executor: Executor,
}

impl Server {
    /// A server without transports nor extensions.
    pub fn new(schema: Arc<dyn ExecutableSchema>) -> Self {
        Self {
            transports: Vec::new(),
            executor: Executor::new(schema),
        }
    }

    /// A server with the OPTIONS, GET, POST and multipart transports, a query cache,
    /// introspection and automatic persisted queries.
    pub fn new_default(schema: Arc<dyn ExecutableSchema>) -> Result<Self, ServerError> {
        let mut server = Self::new(schema);
        server.add_default_transports(transport::MultipartForm::default());
        server.set_query_cache(Arc::new(LruQueryCache::new(DEFAULT_QUERY_CACHE_CAPACITY)));
        server.use_extension(Arc::new(Introspection))?;
        server.use_extension(Arc::new(AutomaticPersistedQuery::new(Arc::new(
            LruQueryCache::new(DEFAULT_APQ_CACHE_CAPACITY),
        ))))?;
        Ok(server)
    }

    /// A server set up from `configuration`.
    pub fn from_configuration(
        schema: Arc<dyn ExecutableSchema>,
        configuration: &Configuration,
    ) -> Result<Self, ServerError> {
        configuration.validate()?;
        let mut server = Self::new(schema);
        server.add_default_transports((&configuration.multipart).into());
        if let Some(capacity) = configuration.query_cache_capacity() {
            server.set_query_cache(Arc::new(LruQueryCache::new(capacity)));
        }
        if configuration.introspection.enabled {
            server.use_extension(Arc::new(Introspection))?;
        }
        if configuration.persisted_queries.enabled {
            let capacity = configuration
                .persisted_queries
                .capacity
                .try_into()
                .unwrap_or(DEFAULT_APQ_CACHE_CAPACITY);
            server.use_extension(Arc::new(AutomaticPersistedQuery::new(Arc::new(
                LruQueryCache::new(capacity),
            ))))?;
        }
        if let Some(limit) = configuration.complexity.limit {
            server.use_extension(Arc::new(ComplexityLimit::fixed(limit)))?;
        }
        if configuration.apollo_tracing.enabled {
            server.use_extension(Arc::new(ApolloTracing))?;
        }
        Ok(server)
    }

    fn add_default_transports(&mut self, multipart: transport::MultipartForm) {
        self.add_transport(transport::Options);
        self.add_transport(transport::Get);
        self.add_transport(transport::Post);
        self.add_transport(multipart);
    }

    pub fn add_transport(&mut self, transport: impl Transport) {
        self.transports.push(Arc::new(transport));
    }

    pub fn use_extension(&mut self, extension: Arc<dyn HandlerExtension>) -> Result<(), ServerError> {
        let name = extension.name();
        self.executor
            .use_extension(extension)
            .map_err(|error| ServerError::Extension { name, error })
    }

    pub fn set_query_cache(&mut self, cache: Arc<dyn QueryCache<CachedDocument>>) {
        self.executor.set_query_cache(cache);
    }

    pub fn set_error_presenter(&mut self, presenter: ErrorPresenter) {
        self.executor.set_error_presenter(presenter);
    }

    pub fn set_recover_func(&mut self, recover_func: RecoverFunc) {
        self.executor.set_recover_func(recover_func);
    }

    pub fn around_operations(&mut self, middleware: OperationMiddleware) {
        self.executor.around_operations(middleware);
    }

    pub fn around_responses(&mut self, middleware: ResponseMiddleware) {
        self.executor.around_responses(middleware);
    }

    pub fn around_fields(&mut self, middleware: FieldMiddleware) {
        self.executor.around_fields(middleware);
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Answers one HTTP request.
    pub async fn serve(&self, request: http::Request<Body>) -> http::Response<Body> {
        let Some(transport) = self
            .transports
            .iter()
            .find(|transport| transport.supports(&request))
        else {
            tracing::warn!(
                method = %request.method(),
                "no transport supports the request"
            );
            return transport::write_json_error(StatusCode::BAD_REQUEST, TRANSPORT_NOT_SUPPORTED);
        };

        match AssertUnwindSafe(transport.handle(request, &self.executor))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(payload) => {
                let error = self.executor.present_recovered_error(payload);
                transport::write_json(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    &graphql::Response::from_errors(vec![error]),
                )
            }
        }
    }

    /// An axum router answering GraphQL requests of any method on `path`.
    pub fn into_router(self, path: &str) -> Router {
        let server = Arc::new(self);
        Router::new().route(
            path,
            any(move |request: axum::extract::Request| {
                let server = server.clone();
                async move { server.serve(request).await }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http::Method;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::testing::TestSchema;

    async fn json_body(response: http::Response<Body>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(method: Method, content_type: Option<&str>) -> http::Request<Body> {
        let mut builder = http::Request::builder().method(method).uri("/graphql");
        if let Some(content_type) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(r#"{"query": "{ name }"}"#)).unwrap()
    }

    #[tokio::test]
    async fn rejects_unsupported_transports() {
        let server = Server::new_default(TestSchema::arc()).unwrap();
        for request in [
            request(Method::POST, Some("text/plain")),
            request(Method::POST, None),
            request(Method::PUT, Some("application/json")),
        ] {
            let response = server.serve(request).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                json_body(response).await,
                json!({"errors": [{"message": "transport not supported"}], "data": null})
            );
        }
    }

    #[tokio::test]
    async fn picks_first_supporting_transport() {
        let server = Server::new_default(TestSchema::arc()).unwrap();
        let response = server
            .serve(request(Method::POST, Some("application/json; charset=utf-8")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"data": {"name": "test"}})
        );
    }

    struct PanickingTransport;

    #[async_trait]
    impl Transport for PanickingTransport {
        fn supports(&self, _request: &http::Request<Body>) -> bool {
            true
        }

        async fn handle(
            &self,
            _request: http::Request<Body>,
            _executor: &Executor,
        ) -> http::Response<Body> {
            panic!("transport panicked")
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn recovers_transport_faults() {
        let mut server = Server::new(TestSchema::arc());
        server.add_transport(PanickingTransport);
        let response = server.serve(request(Method::POST, None)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            json_body(response).await,
            json!({"errors": [{"message": "internal system error"}], "data": null})
        );
        assert!(logs_contain("transport panicked"));
    }

    #[tokio::test]
    async fn builds_from_configuration() {
        let configuration =
            Configuration::from_yaml("complexity:\n  limit: 1\nintrospection:\n  enabled: false\n")
                .unwrap();
        let server = Server::from_configuration(TestSchema::arc(), &configuration).unwrap();
        let response = server
            .serve(
                http::Request::post("/graphql")
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query": "{ a: name b: name }"}"#))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "errors": [{
                    "message": "operation has complexity 2, which exceeds the limit of 1",
                    "extensions": {"code": "COMPLEXITY_LIMIT_EXCEEDED"}
                }],
                "data": null
            })
        );
    }
}
