//! Coercion of variable values and field arguments.

use apollo_compiler::Schema;
use apollo_compiler::ast;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::Type;
use serde_json_bytes::ByteString;

use crate::error::VALIDATION_FAILED;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

fn variable_error(message: impl Into<String>, path: &Path) -> graphql::Error {
    graphql::Error::builder()
        .message(message)
        .path(path.clone())
        .extension_code(VALIDATION_FAILED)
        .build()
}

/// Coerces the request variables to the types the operation declares.
///
/// Stops at the first value that does not fit, the error path starts with `variable`.
pub(crate) fn coerce_variable_values(
    schema: &Schema,
    operation: &Operation,
    values: &Object,
) -> Result<Object, graphql::Error> {
    let mut coerced = Object::new();
    for definition in &operation.variables {
        let name = definition.name.as_str();
        let path = Path(vec!["variable".into(), name.into()]);
        match values.get(name) {
            Some(value) => {
                let value = coerce_value(schema, &definition.ty, value, &path)?;
                coerced.insert(name, value);
            }
            None => {
                if let Some(default) = &definition.default_value {
                    coerced.insert(name, value_to_json(default, &Object::new()));
                } else if definition.ty.is_non_null() {
                    return Err(variable_error("must be defined", &path));
                }
            }
        }
    }
    Ok(coerced)
}

fn coerce_value(
    schema: &Schema,
    ty: &Type,
    value: &Value,
    path: &Path,
) -> Result<Value, graphql::Error> {
    if value.is_null() {
        return if ty.is_non_null() {
            Err(variable_error("cannot be null", path))
        } else {
            Ok(Value::Null)
        };
    }
    let type_name = match ty {
        Type::List(inner) | Type::NonNullList(inner) => {
            return match value {
                Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| coerce_value(schema, inner, item, &path.join(index)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                // a single value stands for a list of one
                single => Ok(Value::Array(vec![coerce_value(
                    schema, inner, single, path,
                )?])),
            };
        }
        Type::Named(name) | Type::NonNullNamed(name) => name,
    };
    let mismatch = || {
        variable_error(
            format!("cannot use {} as {type_name}", value.kind_name()),
            path,
        )
    };
    match schema.types.get(type_name) {
        Some(ExtendedType::Scalar(_)) => match type_name.as_str() {
            "Int" => match value.as_i64() {
                Some(int) if i32::try_from(int).is_ok() => Ok(value.clone()),
                Some(int) => Err(variable_error(
                    format!("{int} overflows Int"),
                    path,
                )),
                None => Err(mismatch()),
            },
            "Float" if value.is_number() => Ok(value.clone()),
            "String" if value.is_string() => Ok(value.clone()),
            "Boolean" if value.is_boolean() => Ok(value.clone()),
            "ID" if value.is_string() || value.is_i64() || value.is_u64() => Ok(value.clone()),
            "Float" | "String" | "Boolean" | "ID" => Err(mismatch()),
            // custom scalars are passed through
            _ => Ok(value.clone()),
        },
        Some(ExtendedType::Enum(definition)) => match value.as_str() {
            Some(name) if definition.values.contains_key(name) => Ok(value.clone()),
            Some(name) => Err(variable_error(
                format!("{name} is not a valid {type_name}"),
                path,
            )),
            None => Err(mismatch()),
        },
        Some(ExtendedType::InputObject(definition)) => {
            let Value::Object(fields) = value else {
                return Err(mismatch());
            };
            if let Some((unknown, _)) = fields
                .iter()
                .find(|(key, _)| !definition.fields.contains_key(key.as_str()))
            {
                return Err(variable_error(
                    "unknown field",
                    &path.join(unknown.as_str()),
                ));
            }
            let mut coerced = Object::new();
            for (field_name, field) in &definition.fields {
                let field_path = path.join(field_name.as_str());
                match fields.get(field_name.as_str()) {
                    Some(field_value) => {
                        let field_value = coerce_value(schema, &field.ty, field_value, &field_path)?;
                        coerced.insert(field_name.as_str(), field_value);
                    }
                    None => {
                        if let Some(default) = &field.default_value {
                            coerced.insert(field_name.as_str(), value_to_json(default, &Object::new()));
                        } else if field.ty.is_non_null() {
                            return Err(variable_error("must be defined", &field_path));
                        }
                    }
                }
            }
            Ok(Value::Object(coerced))
        }
        Some(_) | None => Err(variable_error(
            format!("{type_name} is not an input type"),
            path,
        )),
    }
}

/// The arguments of `field`, variables substituted and defaults applied.
///
/// Arguments whose variable was not provided and that have no default are left out.
pub(crate) fn argument_values(
    field: &Field,
    definition: &FieldDefinition,
    variables: &Object,
) -> Object {
    let mut arguments = Object::new();
    for argument_definition in &definition.arguments {
        let name = argument_definition.name.as_str();
        let provided = field
            .arguments
            .iter()
            .find(|argument| argument.name == argument_definition.name)
            .and_then(|argument| match argument.value.as_ref() {
                ast::Value::Variable(variable) => variables.get(variable.as_str()).cloned(),
                value => Some(value_to_json(value, variables)),
            });
        if let Some(value) = provided {
            arguments.insert(name, value);
        } else if let Some(default) = &argument_definition.default_value {
            arguments.insert(name, value_to_json(default, variables));
        }
    }
    arguments
}

/// Converts a literal from the document to JSON.
pub(crate) fn value_to_json(value: &ast::Value, variables: &Object) -> Value {
    match value {
        ast::Value::Null => Value::Null,
        ast::Value::Enum(name) => Value::String(name.as_str().into()),
        ast::Value::Variable(name) => variables
            .get(name.as_str())
            .cloned()
            .unwrap_or(Value::Null),
        ast::Value::String(string) => Value::String(string.as_str().into()),
        ast::Value::Float(float) => number(float.as_str()),
        ast::Value::Int(int) => number(int.as_str()),
        ast::Value::Boolean(boolean) => Value::Bool(*boolean),
        ast::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| value_to_json(item, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .filter(|(_, field)| match field.as_ref() {
                    ast::Value::Variable(name) => variables.contains_key(name.as_str()),
                    _ => true,
                })
                .map(|(name, field)| {
                    (
                        ByteString::from(name.as_str()),
                        value_to_json(field, variables),
                    )
                })
                .collect(),
        ),
    }
}

fn number(literal: &str) -> Value {
    if let Ok(int) = literal.parse::<i64>() {
        return Value::from(int);
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
