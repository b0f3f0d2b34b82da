use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::error::RequestDecodeError;
use crate::json_ext::Object;

/// The parameters of one GraphQL operation, read from a JSON body, a query string or the
/// `operations` part of a multipart form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Request {
    /// The document. Missing when the request only names a persisted query by its hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Picks the operation to run when the document holds more than one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Object::is_empty"
    )]
    pub variables: Object,

    /// Protocol extensions, `persistedQuery` among them.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Object::is_empty"
    )]
    pub extensions: Object,
}

// `"variables": null` is common for operations without variables.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Object, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Object>::deserialize(deserializer)?.unwrap_or_default())
}

/// The raw query string members, `variables` and `extensions` still JSON encoded.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryString {
    #[serde(default)]
    query: String,
    #[serde(default)]
    operation_name: String,
    #[serde(default)]
    variables: String,
    #[serde(default)]
    extensions: String,
}

#[buildstructor::buildstructor]
impl Request {
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            extensions,
        }
    }

    /// Reads a request out of a URL query string. Empty members count as absent.
    pub fn from_urlencoded_query(query: &str) -> Result<Request, RequestDecodeError> {
        let raw: QueryString =
            serde_urlencoded::from_str(query).map_err(RequestDecodeError::QueryString)?;
        Ok(Request {
            variables: json_member(&raw.variables).map_err(RequestDecodeError::Variables)?,
            extensions: json_member(&raw.extensions).map_err(RequestDecodeError::Extensions)?,
            query: Some(raw.query).filter(|query| !query.is_empty()),
            operation_name: Some(raw.operation_name).filter(|name| !name.is_empty()),
        })
    }
}

fn json_member(raw: &str) -> Result<Object, serde_json::Error> {
    if raw.is_empty() {
        return Ok(Object::new());
    }
    Ok(serde_json::from_str::<Option<Object>>(raw)?.unwrap_or_default())
}
