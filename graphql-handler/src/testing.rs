//! A small executable schema for unit tests.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use serde_json_bytes::json;
use tower::BoxError;

use crate::execution::ExecutableSchema;
use crate::execution::FieldContext;
use crate::execution::ObjectResolver;
use crate::execution::ResolvedValue;

pub(crate) const SCHEMA: &str = r#"
scalar Upload

type Query {
  name: String!
  find(id: Int!): Element
  error: String
  panic: String
  hello(name: String = "world"): String!
  user: User
  node: Node
  elements(count: Int = 2): [Element!]!
  file(upload: Upload!): String
}

type Mutation {
  name: String!
}

type Element {
  id: ID!
  name: String
  children: [Element!]!
}

interface Node {
  id: ID!
}

type User implements Node {
  id: ID!
  name: String!
  friends: [User!]!
}
"#;

pub(crate) struct TestSchema {
    schema: Valid<Schema>,
    mutations: bool,
    /// Number of root fields resolved.
    pub(crate) calls: Arc<AtomicUsize>,
}

impl TestSchema {
    pub(crate) fn new(mutations: bool) -> Self {
        Self {
            schema: Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap(),
            mutations,
            calls: Default::default(),
        }
    }

    pub(crate) fn arc() -> Arc<Self> {
        Arc::new(Self::new(true))
    }

    pub(crate) fn without_mutations() -> Arc<Self> {
        Arc::new(Self::new(false))
    }
}

impl ExecutableSchema for TestSchema {
    fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    fn query_root(&self) -> Arc<dyn ObjectResolver> {
        Arc::new(QueryRoot {
            calls: self.calls.clone(),
        })
    }

    fn mutation_root(&self) -> Option<Arc<dyn ObjectResolver>> {
        self.mutations.then(|| {
            Arc::new(MutationRoot {
                calls: self.calls.clone(),
            }) as Arc<dyn ObjectResolver>
        })
    }
}

struct QueryRoot {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ObjectResolver for QueryRoot {
    fn type_name(&self) -> &str {
        "Query"
    }

    async fn resolve_field(&self, ctx: &FieldContext) -> Result<ResolvedValue, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match ctx.name() {
            "name" => Ok(ResolvedValue::leaf("test")),
            "find" => {
                let id = ctx.argument("id").cloned().unwrap_or_default();
                Ok(ResolvedValue::from_json(
                    "Element",
                    json!({"id": id, "name": null, "children": []}),
                ))
            }
            "error" => Err("resolver failed".into()),
            "panic" => panic!("resolver panicked"),
            "hello" => {
                let name = ctx
                    .argument("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or_default();
                Ok(ResolvedValue::leaf(format!("hello {name}")))
            }
            "user" | "node" => Ok(ResolvedValue::from_json(
                "User",
                json!({
                    "id": 1,
                    "name": "Ada",
                    "friends": [{"id": 2, "name": "Grace", "friends": []}]
                }),
            )),
            "elements" => {
                let count = ctx
                    .argument("count")
                    .and_then(|count| count.as_i64())
                    .unwrap_or_default();
                Ok(ResolvedValue::list((0..count).map(|id| {
                    ResolvedValue::from_json(
                        "Element",
                        json!({"id": id, "name": format!("element {id}"), "children": []}),
                    )
                })))
            }
            "file" => Ok(ctx
                .upload("upload")
                .map(|upload| ResolvedValue::leaf(upload.filename.clone()))
                .unwrap_or_else(ResolvedValue::null)),
            other => Err(format!("unexpected field {other}").into()),
        }
    }

    fn is_resolver(&self, _field_name: &str) -> bool {
        true
    }
}

struct MutationRoot {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ObjectResolver for MutationRoot {
    fn type_name(&self) -> &str {
        "Mutation"
    }

    async fn resolve_field(&self, _ctx: &FieldContext) -> Result<ResolvedValue, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResolvedValue::leaf("mutated"))
    }
}
