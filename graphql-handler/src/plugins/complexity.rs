//! Rejects operations whose estimated cost is above a limit, before any field executes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Implementers;
use async_trait::async_trait;

use crate::error::COMPLEXITY_LIMIT_EXCEEDED;
use crate::execution::ExecutableSchema;
use crate::execution::input_coercion::argument_values;
use crate::executor::HandlerExtension;
use crate::graphql;
use crate::json_ext::Object;
use crate::operation::OperationContext;

const INTROSPECTION_QUERY: &str = "IntrospectionQuery";

type LimitFn = Arc<dyn Fn(&OperationContext) -> u64 + Send + Sync>;

/// Complexity recorded for one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComplexityStats {
    /// The complexity of the operation.
    pub complexity: u64,
    /// The limit that applied to it.
    pub complexity_limit: u64,
}

impl ComplexityStats {
    pub fn get(context: &OperationContext) -> Option<&ComplexityStats> {
        context.stats.extension::<ComplexityStats>()
    }
}

/// Computes the complexity of every operation and rejects it when above the limit.
///
/// The per-field cost comes from [`ExecutableSchema::complexity`], a field without an
/// override costs one plus the cost of its selection set.
#[derive(Clone)]
pub struct ComplexityLimit {
    limit: LimitFn,
}

impl ComplexityLimit {
    /// The same limit for every operation.
    pub fn fixed(limit: u64) -> Self {
        Self::dynamic(move |_| limit)
    }

    /// A limit computed for each operation.
    pub fn dynamic<F>(limit: F) -> Self
    where
        F: Fn(&OperationContext) -> u64 + Send + Sync + 'static,
    {
        Self {
            limit: Arc::new(limit),
        }
    }
}

impl fmt::Debug for ComplexityLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexityLimit").finish()
    }
}

#[async_trait]
impl HandlerExtension for ComplexityLimit {
    fn name(&self) -> &'static str {
        "ComplexityLimit"
    }

    async fn mutate_operation_context(
        &self,
        schema: &dyn ExecutableSchema,
        context: &mut OperationContext,
    ) -> Result<(), graphql::Error> {
        let (Some(document), Some(operation)) = (&context.document, &context.operation) else {
            return Ok(());
        };
        let complexity_limit = (self.limit)(context);
        let complexity = if operation
            .name
            .as_ref()
            .is_some_and(|name| name.as_str() == INTROSPECTION_QUERY)
        {
            0
        } else {
            calculate(schema, document, operation, &context.variables)
        };
        tracing::debug!(complexity, complexity_limit, "operation complexity");
        context.stats.set_extension(ComplexityStats {
            complexity,
            complexity_limit,
        });

        if complexity > complexity_limit {
            return Err(graphql::Error::builder()
                .message(format!(
                    "operation has complexity {complexity}, which exceeds the limit of {complexity_limit}"
                ))
                .extension_code(COMPLEXITY_LIMIT_EXCEEDED)
                .build());
        }
        Ok(())
    }
}

/// The complexity of `operation`, saturating at [`u64::MAX`].
pub fn calculate(
    schema: &dyn ExecutableSchema,
    document: &ExecutableDocument,
    operation: &Operation,
    variables: &Object,
) -> u64 {
    let mut walker = Walker {
        schema,
        document,
        variables,
        implementers: schema.schema().implementers_map(),
        fragment_cache: HashMap::new(),
    };
    walker.selection_set(&operation.selection_set)
}

struct Walker<'a> {
    schema: &'a dyn ExecutableSchema,
    document: &'a ExecutableDocument,
    variables: &'a Object,
    implementers: apollo_compiler::collections::HashMap<Name, Implementers>,
    fragment_cache: HashMap<Name, u64>,
}

impl Walker<'_> {
    fn selection_set(&mut self, selection_set: &SelectionSet) -> u64 {
        let mut complexity: u64 = 0;
        for selection in &selection_set.selections {
            let cost = match selection {
                Selection::Field(field) => {
                    let field_type = field.ty().inner_named_type();
                    if field_type.as_str() == "__Schema" {
                        continue;
                    }
                    let child_complexity = match self.schema.schema().types.get(field_type) {
                        Some(
                            ExtendedType::Object(_)
                            | ExtendedType::Interface(_)
                            | ExtendedType::Union(_),
                        ) => self.selection_set(&field.selection_set),
                        _ => 0,
                    };
                    let arguments = argument_values(field, &field.definition, self.variables);
                    let cost = self.field_complexity(
                        &selection_set.ty,
                        field.name.as_str(),
                        child_complexity,
                        &arguments,
                    );
                    tracing::trace!(
                        parent = selection_set.ty.as_str(),
                        field = field.name.as_str(),
                        child_complexity,
                        cost,
                        "field complexity"
                    );
                    cost
                }
                Selection::InlineFragment(inline) => self.selection_set(&inline.selection_set),
                Selection::FragmentSpread(spread) => {
                    let name = &spread.fragment_name;
                    if let Some(cost) = self.fragment_cache.get(name) {
                        *cost
                    } else if let Some(fragment) = self.document.fragments.get(name) {
                        let cost = self.selection_set(&fragment.selection_set);
                        self.fragment_cache.insert(name.clone(), cost);
                        cost
                    } else {
                        0
                    }
                }
            };
            complexity = complexity.saturating_add(cost);
        }
        complexity
    }

    fn field_complexity(
        &self,
        parent: &Name,
        field: &str,
        child_complexity: u64,
        arguments: &Object,
    ) -> u64 {
        let is_interface = matches!(
            self.schema.schema().types.get(parent),
            Some(ExtendedType::Interface(_))
        );
        if !is_interface {
            return self.object_field_complexity(parent, field, child_complexity, arguments);
        }
        // the most expensive implementation wins
        self.implementers
            .get(parent)
            .map(|implementers| {
                implementers
                    .objects
                    .iter()
                    .map(|object| {
                        self.object_field_complexity(object, field, child_complexity, arguments)
                    })
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or_else(|| child_complexity.saturating_add(1))
    }

    fn object_field_complexity(
        &self,
        type_name: &str,
        field: &str,
        child_complexity: u64,
        arguments: &Object,
    ) -> u64 {
        match self
            .schema
            .complexity(type_name, field, child_complexity, arguments)
        {
            Some(cost) if cost >= child_complexity => cost,
            _ => child_complexity.saturating_add(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use apollo_compiler::Schema;
    use apollo_compiler::validation::Valid;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;
    use test_log::test;
    use tower::BoxError;

    use super::*;
    use crate::Executor;
    use crate::execution::FieldContext;
    use crate::execution::ObjectResolver;
    use crate::execution::ResolvedValue;
    use crate::graphql::Request;
    use crate::operation::RawParams;
    use crate::operation::TraceTiming;

    const SCHEMA: &str = r#"
type Query {
  scalar: String
  object: Element
  list(size: Int = 10): [Element!]!
  node: Node
  cheap: Element
}

type Element {
  name: String
  children: [Element!]!
}

interface Node {
  name: String
}

type Small implements Node {
  name: String
}

type Big implements Node {
  name: String
}
"#;

    struct CostSchema {
        schema: Valid<Schema>,
        calls: Arc<AtomicUsize>,
    }

    impl CostSchema {
        fn arc() -> Arc<Self> {
            Arc::new(Self {
                schema: Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap(),
                calls: Default::default(),
            })
        }
    }

    impl ExecutableSchema for CostSchema {
        fn schema(&self) -> &Valid<Schema> {
            &self.schema
        }

        fn complexity(
            &self,
            type_name: &str,
            field_name: &str,
            child_complexity: u64,
            arguments: &Object,
        ) -> Option<u64> {
            match (type_name, field_name) {
                ("Query", "list") => {
                    let size = arguments.get("size").and_then(|size| size.as_u64())?;
                    Some(size.saturating_mul(child_complexity))
                }
                // below the child complexity, ignored
                ("Query", "cheap") => Some(0),
                ("Big", "name") => Some(5),
                _ => None,
            }
        }

        fn query_root(&self) -> Arc<dyn ObjectResolver> {
            Arc::new(Root {
                calls: self.calls.clone(),
            })
        }
    }

    struct Root {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ObjectResolver for Root {
        fn type_name(&self) -> &str {
            "Query"
        }

        async fn resolve_field(&self, _ctx: &FieldContext) -> Result<ResolvedValue, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedValue::null())
        }
    }

    async fn complexity_of(query: &str, variables: serde_json_bytes::Value) -> u64 {
        let executor = Executor::new(CostSchema::arc());
        let params = RawParams::new(
            Request::builder()
                .query(query)
                .variables(variables.as_object().cloned().unwrap_or_default())
                .build(),
            TraceTiming::now(),
        );
        let context = executor.create_operation_context(params).await.unwrap();
        calculate(
            executor.schema().as_ref(),
            context.document.as_ref().unwrap(),
            context.operation.as_ref().unwrap(),
            &context.variables,
        )
    }

    #[test(tokio::test)]
    async fn counts_fields() {
        assert_eq!(complexity_of("{ scalar }", json!({})).await, 1);
        assert_eq!(
            complexity_of("{ scalar object { name children { name } } }", json!({})).await,
            5
        );
        assert_eq!(complexity_of("{ __typename }", json!({})).await, 1);
    }

    #[test(tokio::test)]
    async fn uses_overrides() {
        assert_eq!(complexity_of("{ list { name } }", json!({})).await, 10);
        assert_eq!(
            complexity_of(
                "query($size: Int) { list(size: $size) { name } }",
                json!({"size": 3})
            )
            .await,
            3
        );
        assert_eq!(complexity_of("{ cheap { name } }", json!({})).await, 2);
    }

    #[test(tokio::test)]
    async fn interfaces_take_the_most_expensive_implementation() {
        assert_eq!(complexity_of("{ node { name } }", json!({})).await, 6);
    }

    #[test(tokio::test)]
    async fn counts_fragments() {
        assert_eq!(
            complexity_of(
                "{ object { ...F ...F ... on Element { name } } } fragment F on Element { name }",
                json!({})
            )
            .await,
            4
        );
    }

    #[test(tokio::test)]
    async fn schema_introspection_is_free() {
        assert_eq!(
            complexity_of("{ __schema { types { name } } scalar }", json!({})).await,
            1
        );
    }

    #[test(tokio::test)]
    async fn rejects_above_limit() {
        let schema = CostSchema::arc();
        let mut executor = Executor::new(schema.clone());
        executor
            .use_extension(Arc::new(ComplexityLimit::fixed(2)))
            .unwrap();

        let error = executor
            .create_operation_context(RawParams::new(
                Request::builder().query("{ a: scalar b: scalar c: scalar }").build(),
                TraceTiming::now(),
            ))
            .await
            .unwrap_err();
        assert_eq!(error.errors.len(), 1);
        assert_eq!(
            error.errors[0].message,
            "operation has complexity 3, which exceeds the limit of 2"
        );
        assert_eq!(
            error.errors[0].extension_code().as_deref(),
            Some(COMPLEXITY_LIMIT_EXCEEDED)
        );
        assert_eq!(
            ComplexityStats::get(&error.context),
            Some(&ComplexityStats {
                complexity: 3,
                complexity_limit: 2
            })
        );
        let response = executor
            .dispatch_error(error.context, error.errors)
            .await;
        assert_eq!(response.data, json!(null));
        assert_eq!(schema.calls.load(Ordering::SeqCst), 0);

        let context = executor
            .create_operation_context(RawParams::new(
                Request::builder().query("{ a: scalar b: scalar }").build(),
                TraceTiming::now(),
            ))
            .await
            .unwrap();
        assert_eq!(ComplexityStats::get(&context).unwrap().complexity, 2);
    }

    #[test(tokio::test)]
    async fn introspection_query_is_free() {
        let mut executor = Executor::new(CostSchema::arc());
        executor
            .use_extension(Arc::new(ComplexityLimit::fixed(0)))
            .unwrap();
        let context = executor
            .create_operation_context(RawParams::new(
                Request::builder()
                    .query("query IntrospectionQuery { scalar object { name } }")
                    .build(),
                TraceTiming::now(),
            ))
            .await
            .unwrap();
        assert_eq!(
            ComplexityStats::get(&context),
            Some(&ComplexityStats {
                complexity: 0,
                complexity_limit: 0
            })
        );
    }

    #[test(tokio::test)]
    async fn dynamic_limit_sees_the_operation() {
        let mut executor = Executor::new(CostSchema::arc());
        executor
            .use_extension(Arc::new(ComplexityLimit::dynamic(|context| {
                if context.operation_name.as_deref() == Some("Trusted") {
                    100
                } else {
                    1
                }
            })))
            .unwrap();
        let query = "query Trusted { a: scalar b: scalar }";
        let params = RawParams::new(
            Request::builder()
                .query(query)
                .operation_name("Trusted")
                .build(),
            TraceTiming::now(),
        );
        assert!(executor.create_operation_context(params).await.is_ok());

        let params = RawParams::new(
            Request::builder().query("{ a: scalar b: scalar }").build(),
            TraceTiming::now(),
        );
        assert!(executor.create_operation_context(params).await.is_err());
    }
}
