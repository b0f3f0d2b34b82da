//! The Apollo tracing response extension.
//!
//! Adds per-resolver timings under `extensions.tracing`, in the format described at
//! <https://github.com/apollographql/apollo-tracing>.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::execution::FieldContext;
use crate::executor::HandlerExtension;
use crate::executor::ResponseContext;
use crate::json_ext::Path;
use crate::middleware;
use crate::middleware::FieldMiddleware;
use crate::middleware::FieldNext;
use crate::middleware::ResponseMiddleware;
use crate::middleware::ResponseNext;
use crate::operation::TraceTiming;

const TRACING_VERSION: u8 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TracingExtension {
    version: u8,
    start_time: String,
    end_time: String,
    duration: u64,
    parsing: Span,
    validation: Span,
    execution: Execution,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Span {
    start_offset: u64,
    duration: u64,
}

impl Span {
    fn new(operation_start: SystemTime, timing: &TraceTiming) -> Self {
        Self {
            start_offset: nanos_between(operation_start, timing.start),
            duration: nanos_between(timing.start, timing.end),
        }
    }
}

#[derive(Debug, Serialize)]
struct Execution {
    resolvers: Vec<ResolverExecution>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolverExecution {
    path: Path,
    parent_type: String,
    field_name: String,
    return_type: String,
    start_offset: u64,
    duration: u64,
}

/// Resolver timings of one request, kept in the request [`Context`](crate::Context).
#[derive(Clone, Default)]
struct Resolvers(Arc<Mutex<Vec<ResolverExecution>>>);

/// Records resolver timings and reports them in the response extensions.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApolloTracing;

impl HandlerExtension for ApolloTracing {
    fn name(&self) -> &'static str {
        "ApolloTracing"
    }

    fn response_middleware(&self) -> Option<ResponseMiddleware> {
        Some(middleware::from_fn(
            |context: Arc<ResponseContext>, next: ResponseNext| async move {
                let resolvers = Resolvers::default();
                context
                    .operation
                    .context
                    .extensions()
                    .with_lock(|mut extensions| extensions.insert(resolvers.clone()));

                let mut response = next.run(context.clone()).await;

                let end = SystemTime::now();
                let stats = &context.operation.stats;
                let start = stats.operation_start;
                let extension = TracingExtension {
                    version: TRACING_VERSION,
                    start_time: rfc3339(start),
                    end_time: rfc3339(end),
                    duration: nanos_between(start, end),
                    parsing: Span::new(start, &stats.parsing),
                    validation: Span::new(start, &stats.validation),
                    execution: Execution {
                        resolvers: std::mem::take(&mut *resolvers.0.lock()),
                    },
                };
                match serde_json_bytes::to_value(&extension) {
                    Ok(value) => {
                        response.extensions.insert("tracing", value);
                    }
                    Err(error) => {
                        tracing::error!(%error, "could not serialize the tracing extension")
                    }
                }
                response
            },
        ))
    }

    fn field_middleware(&self) -> Option<FieldMiddleware> {
        Some(middleware::from_fn(
            |field: Arc<FieldContext>, next: FieldNext| async move {
                let Some(resolvers) = field
                    .operation
                    .context
                    .extensions()
                    .with_lock(|extensions| extensions.get::<Resolvers>().cloned())
                else {
                    return next.run(field).await;
                };
                let start = SystemTime::now();
                let result = next.run(field.clone()).await;
                let end = SystemTime::now();
                resolvers.0.lock().push(ResolverExecution {
                    path: field.path.clone(),
                    parent_type: field.object.to_string(),
                    field_name: field.name().to_string(),
                    return_type: field.return_type().to_string(),
                    start_offset: nanos_between(field.operation.stats.operation_start, start),
                    duration: nanos_between(start, end),
                });
                result
            },
        ))
    }
}

fn nanos_between(start: SystemTime, end: SystemTime) -> u64 {
    let elapsed = end.duration_since(start).unwrap_or_default();
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::Executor;
    use crate::graphql::Request;
    use crate::operation::RawParams;
    use crate::testing::TestSchema;

    fn executor() -> Executor {
        let mut executor = Executor::new(TestSchema::arc());
        executor.use_extension(Arc::new(ApolloTracing)).unwrap();
        executor
    }

    fn params(query: &str) -> RawParams {
        RawParams::new(Request::builder().query(query).build(), TraceTiming::now())
    }

    #[tokio::test]
    async fn reports_resolver_timings() {
        let executor = executor();
        let context = executor.create_operation_context(params("{ name }")).await.unwrap();
        let response = executor.dispatch_operation(context).await.produce().await;
        let response = serde_json::to_value(&response).unwrap();

        assert_eq!(response["data"], json!({"name": "test"}));
        let extension = &response["extensions"]["tracing"];
        assert_eq!(extension["version"], json!(1));
        assert!(extension["startTime"].as_str().unwrap().ends_with('Z'));
        assert!(extension["endTime"].is_string());
        assert!(extension["duration"].is_u64());
        assert!(extension["parsing"]["startOffset"].is_u64());
        assert!(extension["validation"]["duration"].is_u64());

        let resolvers = extension["execution"]["resolvers"].as_array().unwrap();
        assert_eq!(resolvers.len(), 1);
        assert_eq!(resolvers[0]["path"], json!(["name"]));
        assert_eq!(resolvers[0]["parentType"], json!("Query"));
        assert_eq!(resolvers[0]["fieldName"], json!("name"));
        assert_eq!(resolvers[0]["returnType"], json!("String!"));
        assert!(resolvers[0]["startOffset"].is_u64());
    }

    #[tokio::test]
    async fn reports_failed_operations_without_resolvers() {
        let executor = executor();
        let error = executor
            .create_operation_context(params("{ unknown }"))
            .await
            .unwrap_err();
        let response = executor.dispatch_error(error.context, error.errors).await;
        let response = serde_json::to_value(&response).unwrap();
        assert_eq!(response["errors"].as_array().unwrap().len(), 1);
        assert_eq!(
            response["extensions"]["tracing"]["execution"]["resolvers"],
            json!([])
        );
    }
}
