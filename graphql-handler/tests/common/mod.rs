#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use graphql_handler::ExecutableSchema;
use graphql_handler::FieldContext;
use graphql_handler::ObjectResolver;
use graphql_handler::ResolvedValue;
use graphql_handler::Server;
use graphql_handler::client::Client;
use serde_json_bytes::json;
use tower::BoxError;

pub const PATH: &str = "/graphql";

const SCHEMA: &str = r#"
scalar Upload

type Query {
  name: String!
  find(id: Int!): Element
  hello(name: String = "world"): String!
  user: User
  header(name: String!): String
  panic: String
  file(upload: Upload!): String
  files(uploads: [Upload!]!): [String!]!
}

type Mutation {
  rename(name: String!): String!
}

type Subscription {
  ticks: Int!
}

type Element {
  id: ID!
  name: String
}

type User {
  id: ID!
  name: String!
}
"#;

/// A schema whose resolvers count how often they are called.
pub struct TestSchema {
    schema: Valid<Schema>,
    pub calls: Arc<AtomicUsize>,
}

impl TestSchema {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            schema: Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap(),
            calls: Default::default(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
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
        Some(Arc::new(MutationRoot {
            calls: self.calls.clone(),
        }))
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
            "find" => Ok(ResolvedValue::from_json(
                "Element",
                json!({"id": ctx.argument("id").cloned().unwrap_or_default(), "name": "found"}),
            )),
            "hello" => {
                let name = ctx
                    .argument("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or_default();
                Ok(ResolvedValue::leaf(format!("hello {name}")))
            }
            "user" => Ok(ResolvedValue::from_json(
                "User",
                json!({"id": 1, "name": "Ada"}),
            )),
            "header" => {
                let name = ctx
                    .argument("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or_default();
                Ok(ctx
                    .operation
                    .headers
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(ResolvedValue::leaf)
                    .unwrap_or_else(ResolvedValue::null))
            }
            "panic" => panic!("resolver panicked"),
            "file" => Ok(ctx
                .upload("upload")
                .map(|upload| ResolvedValue::leaf(upload.filename.clone()))
                .unwrap_or_else(ResolvedValue::null)),
            "files" => {
                let uploads = ctx
                    .argument("uploads")
                    .and_then(|uploads| uploads.as_array())
                    .cloned()
                    .unwrap_or_default();
                let mut names = Vec::new();
                for upload in &uploads {
                    let Some(upload) = ctx.operation.uploads.get(upload) else {
                        return Err("missing upload".into());
                    };
                    let content = upload.bytes().await?;
                    names.push(ResolvedValue::leaf(format!(
                        "{}:{}",
                        upload.filename,
                        String::from_utf8_lossy(&content)
                    )));
                }
                Ok(ResolvedValue::list(names))
            }
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

    async fn resolve_field(&self, ctx: &FieldContext) -> Result<ResolvedValue, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = ctx
            .argument("name")
            .and_then(|name| name.as_str())
            .unwrap_or_default();
        Ok(ResolvedValue::leaf(format!("renamed to {name}")))
    }
}

/// A default server for `schema` and a client talking to it.
pub fn client(schema: Arc<TestSchema>) -> Client {
    client_for(Server::new_default(schema).unwrap())
}

pub fn client_for(server: Server) -> Client {
    Client::new(server.into_router(PATH), PATH)
}

/// Sends `request` to `router` and returns the status, headers and JSON body (`null` if empty).
pub async fn send(
    router: &axum::Router,
    request: http::Request<axum::body::Body>,
) -> (http::StatusCode, http::HeaderMap, serde_json::Value) {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, body)
}

pub fn post_json(body: serde_json::Value) -> http::Request<axum::body::Body> {
    http::Request::post(PATH)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}
