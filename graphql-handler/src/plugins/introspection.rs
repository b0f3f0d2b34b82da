//! Enables `__schema` and `__type` for every operation.

use async_trait::async_trait;

use crate::execution::ExecutableSchema;
use crate::executor::HandlerExtension;
use crate::graphql;
use crate::operation::OperationContext;

/// Without this extension introspection fields resolve to `null` with an
/// `introspection disabled` error. `__typename` is always available.
#[derive(Clone, Copy, Debug, Default)]
pub struct Introspection;

#[async_trait]
impl HandlerExtension for Introspection {
    fn name(&self) -> &'static str {
        "Introspection"
    }

    async fn mutate_operation_context(
        &self,
        _schema: &dyn ExecutableSchema,
        context: &mut OperationContext,
    ) -> Result<(), graphql::Error> {
        context.disable_introspection = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json_bytes::json;

    use super::*;
    use crate::Executor;
    use crate::graphql::Request;
    use crate::operation::RawParams;
    use crate::operation::TraceTiming;
    use crate::testing::TestSchema;

    async fn run(executor: &Executor, query: &str) -> graphql::Response {
        let params = RawParams::new(Request::builder().query(query).build(), TraceTiming::now());
        let context = executor.create_operation_context(params).await.unwrap();
        executor.dispatch_operation(context).await.produce().await
    }

    #[tokio::test]
    async fn disabled_by_default() {
        let executor = Executor::new(TestSchema::arc());
        let response = run(&executor, r#"{ __type(name: "Element") { name } name }"#).await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "introspection disabled");
        assert_eq!(response.data, json!({"__type": null, "name": "test"}));

        // `__schema` is non-null, the whole data goes
        let response = run(&executor, "{ __schema { queryType { name } } name }").await;
        assert_eq!(response.errors[0].message, "introspection disabled");
        assert_eq!(response.data, json!(null));
    }

    #[tokio::test]
    async fn typename_without_introspection() {
        let executor = Executor::new(TestSchema::arc());
        let response = run(&executor, "{ __typename user { __typename id } }").await;
        assert!(response.errors.is_empty());
        assert_eq!(
            response.data,
            json!({"__typename": "Query", "user": {"__typename": "User", "id": "1"}})
        );
    }

    #[tokio::test]
    async fn serves_schema_when_enabled() {
        let mut executor = Executor::new(TestSchema::arc());
        executor.use_extension(Arc::new(Introspection)).unwrap();
        let response = run(
            &executor,
            r#"{ __schema { queryType { name } } element: __type(name: "Element") { name kind } name }"#,
        )
        .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            response.data,
            json!({
                "__schema": {"queryType": {"name": "Query"}},
                "element": {"name": "Element", "kind": "OBJECT"},
                "name": "test"
            })
        );
    }
}
