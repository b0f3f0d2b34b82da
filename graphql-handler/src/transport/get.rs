use std::time::SystemTime;

use apollo_compiler::ast;
use apollo_compiler::executable::OperationType;
use async_trait::async_trait;
use http::Method;
use http::StatusCode;

use super::Body;
use super::Transport;
use crate::executor::Executor;
use crate::graphql;
use crate::operation::RawParams;
use crate::operation::TraceTiming;

const QUERY_ONLY_MESSAGE: &str = "GET requests only allow query operations";

/// GraphQL parameters in the URL query string.
///
/// `variables` and `extensions` are JSON encoded. Only query operations run over GET.
#[derive(Clone, Copy, Debug, Default)]
pub struct Get;

#[async_trait]
impl Transport for Get {
    fn supports(&self, request: &http::Request<Body>) -> bool {
        !super::is_upgrade(request) && request.method() == Method::GET
    }

    async fn handle(
        &self,
        request: http::Request<Body>,
        executor: &Executor,
    ) -> http::Response<Body> {
        let start = SystemTime::now();
        let graphql_request =
            match graphql::Request::from_urlencoded_query(request.uri().query().unwrap_or_default())
            {
                Ok(graphql_request) => graphql_request,
                Err(error) => {
                    return super::write_json_error(StatusCode::BAD_REQUEST, error.to_string());
                }
            };

        // Mutations must not run even when they would fail validation later.
        if let Some(query) = &graphql_request.query {
            if requested_operation_type(query, graphql_request.operation_name.as_deref())
                .is_some_and(|operation_type| operation_type != OperationType::Query)
            {
                return super::write_json_error(StatusCode::NOT_ACCEPTABLE, QUERY_ONLY_MESSAGE);
            }
        }

        let params = RawParams::new(graphql_request, TraceTiming::since(start))
            .with_headers(request.headers().clone());
        match executor.create_operation_context(params).await {
            // A hash only request is resolved through the persisted queries first.
            Ok(context) if context.operation_type() != Some(OperationType::Query) => {
                super::write_json_error(StatusCode::NOT_ACCEPTABLE, QUERY_ONLY_MESSAGE)
            }
            Ok(context) => super::respond(executor, context).await,
            Err(error) => super::respond_error(executor, *error).await,
        }
    }
}

/// The type of the operation `query` would run, if it parses and names a single operation.
fn requested_operation_type(query: &str, operation_name: Option<&str>) -> Option<OperationType> {
    let document = ast::Document::parse(query, "query.graphql").ok()?;
    let mut operations = document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        });
    match operation_name {
        Some(name) => operations
            .find(|operation| operation.name.as_ref().is_some_and(|n| n.as_str() == name))
            .map(|operation| operation.operation_type),
        None => match (operations.next(), operations.next()) {
            (Some(operation), None) => Some(operation.operation_type),
            _ => None,
        },
    }
}
