//! Evaluation of the field graph of an operation.
//!
//! The executor does not know how a field gets its value: schemas plug their resolvers in
//! through [`ExecutableSchema`] and [`ObjectResolver`]. The engine collects fields, runs each
//! resolution through the field middleware chain, completes the resolved values against the
//! schema and propagates nulls to the nearest nullable ancestor.

use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::executable::Field;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use async_trait::async_trait;
use thiserror::Error;
use tower::BoxError;

use crate::executor::ResponseContext;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::operation::OperationContext;
use crate::upload::Upload;

pub(crate) mod engine;
pub(crate) mod input_coercion;
pub(crate) mod result_coercion;

/// A schema together with the resolvers of its root operation types.
pub trait ExecutableSchema: Send + Sync + 'static {
    fn schema(&self) -> &Valid<Schema>;

    /// Cost override for one field.
    ///
    /// `child_complexity` is the cost of the field's selection set. Returning `None`, or a
    /// value below `child_complexity`, falls back to `1 + child_complexity`.
    fn complexity(
        &self,
        _type_name: &str,
        _field_name: &str,
        _child_complexity: u64,
        _arguments: &Object,
    ) -> Option<u64> {
        None
    }

    fn query_root(&self) -> Arc<dyn ObjectResolver>;

    /// `None` when the schema does not execute mutations.
    fn mutation_root(&self) -> Option<Arc<dyn ObjectResolver>> {
        None
    }
}

/// Resolves the fields of one object.
#[async_trait]
pub trait ObjectResolver: Send + Sync + 'static {
    /// The concrete object type this resolver represents, used for `__typename` and to resolve
    /// interface and union types.
    fn type_name(&self) -> &str;

    async fn resolve_field(&self, ctx: &FieldContext) -> Result<ResolvedValue, BoxError>;

    /// Whether the field is computed rather than read from a stored value.
    fn is_method(&self, _field_name: &str) -> bool {
        true
    }

    /// Whether the field is backed by a user written resolver.
    fn is_resolver(&self, _field_name: &str) -> bool {
        false
    }
}

/// The value of a resolved field.
pub enum ResolvedValue {
    /// * JSON null represents GraphQL null
    /// * An enum value is represented as a JSON string
    /// * Custom scalars are passed through as is
    Leaf(Value),

    /// Expected where the field type is an object, interface or union type.
    Object(Arc<dyn ObjectResolver>),

    /// Expected for list types.
    List(Vec<ResolvedValue>),
}

impl ResolvedValue {
    pub fn null() -> Self {
        Self::Leaf(Value::Null)
    }

    pub fn leaf(json: impl Into<Value>) -> Self {
        Self::Leaf(json.into())
    }

    pub fn object(resolver: impl ObjectResolver) -> Self {
        Self::Object(Arc::new(resolver))
    }

    pub fn opt_object(resolver: Option<impl ObjectResolver>) -> Self {
        match resolver {
            Some(resolver) => Self::object(resolver),
            None => Self::null(),
        }
    }

    pub fn list<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::List(iter.into_iter().collect())
    }

    /// Wraps plain JSON.
    ///
    /// Objects are resolved field by field from their keys, nested objects take the name of
    /// the field's type unless they carry a `__typename` key.
    pub fn from_json(type_name: &str, value: Value) -> Self {
        match value {
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(|item| Self::from_json(type_name, item))
                    .collect(),
            ),
            Value::Object(fields) => Self::object(JsonObject::new(type_name, fields)),
            leaf => Self::Leaf(leaf),
        }
    }
}

impl fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(value) => f.debug_tuple("Leaf").field(value).finish(),
            Self::Object(resolver) => f.debug_tuple("Object").field(&resolver.type_name()).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
        }
    }
}

/// An object resolved from a JSON object, every field is a plain lookup.
#[derive(Clone, Debug)]
pub struct JsonObject {
    type_name: String,
    fields: Object,
}

impl JsonObject {
    pub fn new(type_name: &str, fields: Object) -> Self {
        let type_name = fields
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or(type_name)
            .to_string();
        Self { type_name, fields }
    }
}

#[async_trait]
impl ObjectResolver for JsonObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    async fn resolve_field(&self, ctx: &FieldContext) -> Result<ResolvedValue, BoxError> {
        let value = self.fields.get(ctx.name()).cloned().unwrap_or(Value::Null);
        Ok(ResolvedValue::from_json(
            ctx.return_type().inner_named_type(),
            value,
        ))
    }

    fn is_method(&self, _field_name: &str) -> bool {
        false
    }
}

/// Per field execution state, created for every resolution and handed to field middleware
/// and resolvers.
///
/// The resolved value is not stored here: field middleware receives it as the return value
/// of [`FieldNext::run`](crate::middleware::FieldNext) and may replace it before completion.
pub struct FieldContext {
    pub operation: Arc<OperationContext>,
    pub response: Arc<ResponseContext>,
    pub parent: Option<Arc<FieldContext>>,
    /// The object type the field is selected on.
    pub object: Name,
    pub field: Node<Field>,
    /// Arguments with variables substituted and defaults applied.
    pub arguments: Object,
    /// Where the value lands in the response data.
    pub path: Path,
    pub is_method: bool,
    pub is_resolver: bool,
}

impl FieldContext {
    /// The field name, as declared in the schema.
    pub fn name(&self) -> &str {
        self.field.name.as_str()
    }

    /// The alias if any, otherwise the field name.
    pub fn response_key(&self) -> &str {
        self.field.response_key().as_str()
    }

    pub fn return_type(&self) -> &Type {
        self.field.ty()
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    /// The file an `Upload` argument refers to.
    pub fn upload(&self, name: &str) -> Option<&Upload> {
        self.operation.uploads.get(self.argument(name)?)
    }

    /// Reports an error for this field without failing it.
    pub fn add_error(&self, error: impl Into<BoxError>) {
        self.response.add_error(Some(&self.path), error.into());
    }
}

impl fmt::Debug for FieldContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldContext")
            .field("object", &self.object)
            .field("field", &self.field.name)
            .field("arguments", &self.arguments)
            .field("path", &self.path)
            .field("is_method", &self.is_method)
            .field("is_resolver", &self.is_resolver)
            .finish()
    }
}

/// How a field failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The resolver, or a field middleware, returned an error.
    #[error(transparent)]
    Resolver(BoxError),

    /// The resolver panicked, already turned into a presentable error.
    #[error("{0}")]
    Recovered(graphql::Error),
}
