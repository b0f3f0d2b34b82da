use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;

use crate::graphql::Error;
use crate::json_ext::Object;

/// A GraphQL response, as written on the wire.
///
/// Fields serialize in the order `errors`, `data`, `extensions`.
/// `data` is always present, `null` when execution did not start or failed at the root.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Response {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Error>,
    pub data: Value,
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        extensions: Map<ByteString, Value>,
    ) -> Self {
        Self {
            errors,
            data: data.unwrap_or_default(),
            extensions,
        }
    }

    /// A response with no data, carrying only `errors`.
    pub fn from_errors(errors: Vec<Error>) -> Self {
        Self {
            errors,
            ..Default::default()
        }
    }

    /// A response with a single error made of `message`.
    pub fn error_message(message: impl Into<String>) -> Self {
        Self::from_errors(vec![Error::builder().message(message).build()])
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::Path;

    #[test]
    fn serializes_errors_before_data() {
        let response = Response::error_message("transport not supported");
        assert_eq!(
            String::from_utf8(response.to_bytes().unwrap().to_vec()).unwrap(),
            r#"{"errors":[{"message":"transport not supported"}],"data":null}"#
        );
    }

    #[test]
    fn omits_empty_errors_and_extensions() {
        let response = Response::builder()
            .data(json!({"name": "test"}))
            .build();
        assert_eq!(
            String::from_utf8(response.to_bytes().unwrap().to_vec()).unwrap(),
            r#"{"data":{"name":"test"}}"#
        );
    }

    #[test]
    fn error_fields_in_wire_order() {
        let response = Response::builder()
            .error(
                Error::builder()
                    .message("cannot use bool as Int")
                    .path(Path::from_slice(&["variable", "id"]))
                    .extension_code("GRAPHQL_VALIDATION_FAILED")
                    .build(),
            )
            .build();
        assert_eq!(
            String::from_utf8(response.to_bytes().unwrap().to_vec()).unwrap(),
            r#"{"errors":[{"message":"cannot use bool as Int","path":["variable","id"],"extensions":{"code":"GRAPHQL_VALIDATION_FAILED"}}],"data":null}"#
        );
    }
}
