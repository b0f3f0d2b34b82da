//! Completes resolved values against the declared field type.

use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::executable::Field;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Type;
use futures::FutureExt;
use futures::future::BoxFuture;

use super::FieldContext;
use super::ResolvedValue;
use super::engine::Execution;
use super::engine::ExecutionMode;
use super::engine::PropagateNull;
use super::engine::execute_selection_set;
use super::engine::try_nullify;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Records a field error at `path` and starts null propagation.
fn raise(execution: &Execution, path: &Path, message: String) -> Result<Value, PropagateNull> {
    execution.response.add_error(Some(path), message.into());
    Err(PropagateNull)
}

/// Shapes `resolved` after `ty`, sub-selections of object values are executed in turn.
///
/// `Err` means a field error reached a non-null position and the parent must be nulled.
pub(crate) fn complete_value<'a>(
    execution: &'a Execution,
    path: Path,
    field_context: Arc<FieldContext>,
    ty: &'a Type,
    resolved: ResolvedValue,
    fields: &'a [Node<Field>],
) -> BoxFuture<'a, Result<Value, PropagateNull>> {
    async move {
        let resolved = match resolved {
            ResolvedValue::Leaf(Value::Null) if ty.is_non_null() => {
                return raise(execution, &path, "must not be null".to_string());
            }
            ResolvedValue::Leaf(Value::Null) => return Ok(Value::Null),
            ResolvedValue::List(items) => {
                let (Type::List(item_type) | Type::NonNullList(item_type)) = ty else {
                    return raise(
                        execution,
                        &path,
                        format!("{ty} is not a list type, but a list was resolved"),
                    );
                };
                let mut list = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let completed = complete_value(
                        execution,
                        path.join(index),
                        field_context.clone(),
                        item_type,
                        item,
                        fields,
                    )
                    .await;
                    // a null that cannot stay in the item nulls the whole list
                    match try_nullify(item_type, completed) {
                        Ok(value) => list.push(value),
                        Err(PropagateNull) => return try_nullify(ty, Err(PropagateNull)),
                    }
                }
                return Ok(Value::Array(list));
            }
            resolved => resolved,
        };

        if ty.is_list() {
            return raise(
                execution,
                &path,
                format!("{ty} is a list type, but a single value was resolved"),
            );
        }
        let name = ty.inner_named_type();
        let schema = execution.schema.schema();
        let Some(definition) = schema.types.get(name) else {
            return raise(execution, &path, format!("type {name} is not defined"));
        };

        let object = match resolved {
            ResolvedValue::Object(object) => object,
            ResolvedValue::Leaf(value) => {
                return coerce_leaf(name, definition, value)
                    .or_else(|message| raise(execution, &path, message));
            }
            ResolvedValue::List(_) => unreachable!("lists are completed above"),
        };
        let object_type = match definition {
            ExtendedType::Object(object_type) => object_type,
            ExtendedType::Interface(_) | ExtendedType::Union(_) => {
                let runtime = object.type_name();
                match schema.get_object(runtime) {
                    Some(object_type) if schema.is_subtype(name, runtime) => object_type,
                    _ => {
                        return raise(
                            execution,
                            &path,
                            format!("{runtime} is not a possible type of {name}"),
                        );
                    }
                }
            }
            _ => {
                return raise(
                    execution,
                    &path,
                    format!("{name} is a leaf type, but an object was resolved"),
                );
            }
        };
        execute_selection_set(
            execution,
            &path,
            Some(field_context),
            object_type,
            object,
            fields.iter().map(|field| &field.selection_set).collect(),
            ExecutionMode::Normal,
        )
        .await
        .map(Value::Object)
    }
    .boxed()
}

fn coerce_leaf(name: &str, definition: &ExtendedType, value: Value) -> Result<Value, String> {
    match definition {
        ExtendedType::Scalar(_) => coerce_scalar(name, value),
        ExtendedType::Enum(enum_type) => match value.as_str() {
            Some(variant) if enum_type.values.contains_key(variant) => Ok(value),
            _ => Err(format!("{value} is not a value of enum {name}")),
        },
        ExtendedType::InputObject(_) => Err(format!("input object {name} cannot be returned")),
        _ => Err(format!("{name} is a composite type, but a leaf value was resolved")),
    }
}

fn coerce_scalar(name: &str, value: Value) -> Result<Value, String> {
    let valid = match name {
        "Int" => value.as_i64().is_some_and(|int| i32::try_from(int).is_ok()),
        "Float" => value.is_number(),
        "String" => value.is_string(),
        "Boolean" => value.is_boolean(),
        "ID" if value.is_i64() || value.is_u64() => {
            return Ok(Value::String(value.to_string().into()));
        }
        "ID" => value.is_string(),
        // custom scalars are serialized as resolved
        _ => true,
    };
    if valid {
        Ok(value)
    } else {
        Err(format!("cannot use {value} as {name}"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn coerces_builtin_scalars() {
        assert_eq!(coerce_scalar("Int", json!(7)), Ok(json!(7)));
        assert_eq!(
            coerce_scalar("Int", json!(3_000_000_000_i64)),
            Err("cannot use 3000000000 as Int".to_string())
        );
        assert_eq!(coerce_scalar("Float", json!(1)), Ok(json!(1)));
        assert_eq!(
            coerce_scalar("Boolean", json!("yes")),
            Err("cannot use \"yes\" as Boolean".to_string())
        );
        assert_eq!(coerce_scalar("ID", json!(12)), Ok(json!("12")));
        assert_eq!(coerce_scalar("ID", json!("a")), Ok(json!("a")));
        assert_eq!(coerce_scalar("Json", json!({"a": 1})), Ok(json!({"a": 1})));
    }
}
