use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::executable::DirectiveList;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use indexmap::IndexMap;
use tracing::Instrument;

use super::ExecutableSchema;
use super::ExecutionError;
use super::FieldContext;
use super::ObjectResolver;
use super::input_coercion::argument_values;
use super::result_coercion::complete_value;
use crate::executor::ResponseContext;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::middleware::Chain;
use crate::middleware::FieldResult;

/// <https://spec.graphql.org/October2021/#sec-Normal-and-Serial-Execution>
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    /// Allowed to resolve fields in any order, including in parallel
    Normal,
    /// Top-level fields of a mutation operation must be executed in order
    Sequential,
}

/// Return in `Err` when a field error occurred at some non-nullable place
///
/// <https://spec.graphql.org/October2021/#sec-Handling-Field-Errors>
pub(crate) struct PropagateNull;

/// Everything shared by the fields of one operation.
pub(crate) struct Execution {
    pub(crate) schema: Arc<dyn ExecutableSchema>,
    pub(crate) response: Arc<ResponseContext>,
    pub(crate) document: Arc<Valid<ExecutableDocument>>,
    pub(crate) field_middleware: Chain<Arc<FieldContext>, FieldResult>,
    /// Root introspection fields by response key, `None` when introspection is disabled.
    pub(crate) introspection: Option<Object>,
}

/// Executes the selected operation against `root`, field errors are collected in `response`.
///
/// Returns the response data, `null` when a field error propagated up to the root.
pub(crate) async fn execute_operation(
    schema: Arc<dyn ExecutableSchema>,
    field_middleware: Chain<Arc<FieldContext>, FieldResult>,
    response: Arc<ResponseContext>,
    document: Arc<Valid<ExecutableDocument>>,
    operation: Node<Operation>,
    root: Arc<dyn ObjectResolver>,
) -> Value {
    let introspection = introspect(schema.as_ref(), &response, &document, &operation);
    let execution = Execution {
        schema,
        response,
        document,
        field_middleware,
        introspection,
    };
    let Some(root_type) = execution
        .schema
        .schema()
        .get_object(&operation.selection_set.ty)
    else {
        execution.response.add_error(
            None,
            format!("root type {} is not defined", operation.selection_set.ty).into(),
        );
        return Value::Null;
    };
    let mode = if operation.operation_type == OperationType::Mutation {
        ExecutionMode::Sequential
    } else {
        ExecutionMode::Normal
    };
    let data = execute_selection_set(
        &execution,
        &Path::empty(),
        None,
        root_type,
        root,
        vec![&operation.selection_set],
        mode,
    )
    .instrument(tracing::debug_span!("execute"))
    .await;
    match data {
        Ok(data) => Value::Object(data),
        Err(PropagateNull) => Value::Null,
    }
}

/// Runs the introspection part of the operation when its root selects `__schema` or `__type`.
fn introspect(
    schema: &dyn ExecutableSchema,
    response: &ResponseContext,
    document: &Valid<ExecutableDocument>,
    operation: &Operation,
) -> Option<Object> {
    if response.operation.disable_introspection
        || operation.operation_type != OperationType::Query
    {
        return None;
    }
    if !selects_introspection(document, &operation.selection_set, &mut HashSet::new()) {
        return Some(Object::new());
    }
    let schema = schema.schema();
    let variables = Valid::assume_valid_ref(&response.operation.variables);
    match apollo_compiler::introspection::partial_execute(
        schema,
        &schema.implementers_map(),
        document,
        operation,
        variables,
    ) {
        Ok(result) => {
            for error in result.errors {
                response.add_error(None, error.message.into());
            }
            Some(result.data.unwrap_or_default())
        }
        Err(error) => {
            response.add_error(None, error.message().to_string().into());
            Some(Object::new())
        }
    }
}

fn selects_introspection<'a>(
    document: &'a ExecutableDocument,
    selection_set: &'a SelectionSet,
    visited: &mut HashSet<&'a Name>,
) -> bool {
    selection_set.selections.iter().any(|selection| match selection {
        Selection::Field(field) => is_introspection_field(&field.name),
        Selection::InlineFragment(inline) => {
            selects_introspection(document, &inline.selection_set, visited)
        }
        Selection::FragmentSpread(spread) => {
            visited.insert(&spread.fragment_name)
                && document
                    .fragments
                    .get(&spread.fragment_name)
                    .is_some_and(|fragment| {
                        selects_introspection(document, &fragment.selection_set, visited)
                    })
        }
    })
}

fn is_introspection_field(name: &str) -> bool {
    name == "__schema" || name == "__type"
}

/// <https://spec.graphql.org/October2021/#ExecuteSelectionSet()>
pub(crate) fn execute_selection_set<'a>(
    execution: &'a Execution,
    path: &'a Path,
    parent: Option<Arc<FieldContext>>,
    object_type: &'a ObjectType,
    object_value: Arc<dyn ObjectResolver>,
    selection_sets: Vec<&'a SelectionSet>,
    mode: ExecutionMode,
) -> BoxFuture<'a, Result<Object, PropagateNull>> {
    async move {
        let mut grouped_field_set = IndexMap::new();
        let mut visited_fragments = HashSet::new();
        for selection_set in selection_sets {
            collect_fields(
                execution,
                object_type,
                selection_set,
                &mut visited_fragments,
                &mut grouped_field_set,
            );
        }

        let fields = grouped_field_set.into_iter().map(|(response_key, fields)| {
            let parent = parent.clone();
            let object_value = object_value.clone();
            async move {
                let value = execute_field(
                    execution,
                    path.join(response_key.as_str()),
                    parent,
                    object_type,
                    object_value,
                    fields,
                )
                .await;
                (response_key, value)
            }
        });
        let results = match mode {
            ExecutionMode::Normal => join_all(fields).await,
            ExecutionMode::Sequential => {
                let mut results = Vec::new();
                for field in fields {
                    results.push(field.await);
                }
                results
            }
        };

        let mut response_map = Object::new();
        for (response_key, value) in results {
            response_map.insert(response_key.as_str(), value?);
        }
        Ok(response_map)
    }
    .boxed()
}

/// <https://spec.graphql.org/October2021/#CollectFields()>
fn collect_fields<'a>(
    execution: &'a Execution,
    object_type: &ObjectType,
    selection_set: &'a SelectionSet,
    visited_fragments: &mut HashSet<&'a Name>,
    grouped_fields: &mut IndexMap<Name, Vec<Node<Field>>>,
) {
    let variables = &execution.response.operation.variables;
    for selection in &selection_set.selections {
        if !is_included(selection.directives(), variables) {
            continue;
        }
        match selection {
            Selection::Field(field) => grouped_fields
                .entry(field.response_key().clone())
                .or_default()
                .push(field.clone()),
            Selection::FragmentSpread(spread) => {
                if !visited_fragments.insert(&spread.fragment_name) {
                    continue;
                }
                let Some(fragment) = execution.document.fragments.get(&spread.fragment_name)
                else {
                    continue;
                };
                if !does_fragment_type_apply(execution, object_type, fragment.type_condition()) {
                    continue;
                }
                collect_fields(
                    execution,
                    object_type,
                    &fragment.selection_set,
                    visited_fragments,
                    grouped_fields,
                )
            }
            Selection::InlineFragment(inline) => {
                if let Some(condition) = &inline.type_condition {
                    if !does_fragment_type_apply(execution, object_type, condition) {
                        continue;
                    }
                }
                collect_fields(
                    execution,
                    object_type,
                    &inline.selection_set,
                    visited_fragments,
                    grouped_fields,
                )
            }
        }
    }
}

/// <https://spec.graphql.org/October2021/#DoesFragmentTypeApply()>
fn does_fragment_type_apply(
    execution: &Execution,
    object_type: &ObjectType,
    fragment_type: &Name,
) -> bool {
    *fragment_type == object_type.name
        || execution
            .schema
            .schema()
            .is_subtype(fragment_type, &object_type.name)
}

/// Evaluates `@skip(if:)` and `@include(if:)`.
pub(crate) fn is_included(directives: &DirectiveList, variables: &Object) -> bool {
    let condition = |name: &str| {
        directives
            .get(name)
            .and_then(|directive| directive.specified_argument_by_name("if"))
            .map(|value| match value.as_ref() {
                apollo_compiler::ast::Value::Boolean(value) => *value,
                apollo_compiler::ast::Value::Variable(variable) => variables
                    .get(variable.as_str())
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                _ => false,
            })
    };
    !condition("skip").unwrap_or(false) && condition("include").unwrap_or(true)
}

/// <https://spec.graphql.org/October2021/#ExecuteField()>
async fn execute_field(
    execution: &Execution,
    path: Path,
    parent: Option<Arc<FieldContext>>,
    object_type: &ObjectType,
    object_value: Arc<dyn ObjectResolver>,
    fields: Vec<Node<Field>>,
) -> Result<Value, PropagateNull> {
    let field = &fields[0];
    let field_name = &field.name;
    if field_name.as_str() == "__typename" {
        return Ok(Value::String(object_value.type_name().into()));
    }
    if is_introspection_field(field_name) && parent.is_none() {
        return match &execution.introspection {
            Some(data) => Ok(data
                .get(field.response_key().as_str())
                .cloned()
                .unwrap_or(Value::Null)),
            None => {
                execution
                    .response
                    .add_error(Some(&path), "introspection disabled".into());
                try_nullify(field.ty(), Err(PropagateNull))
            }
        };
    }

    let Some(field_def) = object_type.fields.get(field_name) else {
        execution.response.add_error(
            Some(&path),
            format!("field {field_name} not defined on type {}", object_type.name).into(),
        );
        return Err(PropagateNull);
    };
    let field_context = Arc::new(FieldContext {
        operation: execution.response.operation.clone(),
        response: execution.response.clone(),
        parent,
        object: object_type.name.clone(),
        field: field.clone(),
        arguments: argument_values(
            field,
            field_def,
            &execution.response.operation.variables,
        ),
        path: path.clone(),
        is_method: object_value.is_method(field_name),
        is_resolver: object_value.is_resolver(field_name),
    });

    let resolved = match resolve_field(execution, field_context.clone(), object_value).await {
        Ok(resolved) => resolved,
        Err(error) => {
            execution.response.add_execution_error(&path, error);
            return try_nullify(field.ty(), Err(PropagateNull));
        }
    };
    let completed = complete_value(
        execution,
        path.clone(),
        field_context,
        field.ty(),
        resolved,
        &fields,
    )
    .await;
    try_nullify(field.ty(), completed)
}

/// Runs the field middleware chain around the resolver, faults become field errors.
async fn resolve_field(
    execution: &Execution,
    field_context: Arc<FieldContext>,
    object_value: Arc<dyn ObjectResolver>,
) -> Result<super::ResolvedValue, ExecutionError> {
    let chain = execution.field_middleware.clone();
    let path = field_context.path.clone();
    let resolution = AssertUnwindSafe(async move {
        chain
            .run(field_context, move |field_context| async move {
                object_value.resolve_field(&field_context).await
            })
            .await
    })
    .catch_unwind()
    .await;
    match resolution {
        Ok(Ok(resolved)) => Ok(resolved),
        Ok(Err(error)) => Err(ExecutionError::Resolver(error)),
        Err(payload) => Err(ExecutionError::Recovered(
            execution.response.recover(Some(&path), payload),
        )),
    }
}

/// Try to insert a propagated null if possible, or keep propagating it.
///
/// <https://spec.graphql.org/October2021/#sec-Handling-Field-Errors>
pub(crate) fn try_nullify(
    ty: &Type,
    result: Result<Value, PropagateNull>,
) -> Result<Value, PropagateNull> {
    match result {
        Ok(json) => Ok(json),
        Err(PropagateNull) => {
            if ty.is_non_null() {
                Err(PropagateNull)
            } else {
                Ok(Value::Null)
            }
        }
    }
}
