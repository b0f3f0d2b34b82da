//! The GraphQL-over-HTTP payloads: requests, responses and the errors they carry.

mod request;
mod response;

use std::fmt;

pub use request::Request;
pub use response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::error::ErrorKind;
use crate::json_ext::Object;
use crate::json_ext::Path;

/// A 1-based line and column in the request document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            line: u32::try_from(line).unwrap_or(u32::MAX),
            column: u32::try_from(column).unwrap_or(u32::MAX),
        }
    }
}

/// One entry of the `errors` list of a [`Response`].
///
/// Field errors carry the [`Path`] of the field they were raised for, errors found in the
/// document carry its [`Location`]s. The machine readable code lives in `extensions.code`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct Error {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Builds an error; only the message is required.
    ///
    /// `extension_code` sets `extensions.code` unless `extensions` already holds one.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code
            && !extensions.contains_key("code")
        {
            extensions.insert("code", Value::String(code.into()));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// The `extensions.code` of this error, when it is a string or a number.
    pub fn extension_code(&self) -> Option<String> {
        match self.extensions.get("code")? {
            Value::String(code) => Some(code.as_str().to_string()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        }
    }

    /// How this error surfaces at the HTTP layer, derived from its code.
    pub fn kind(&self) -> ErrorKind {
        self.extension_code()
            .map(|code| ErrorKind::of(&code))
            .unwrap_or(ErrorKind::User)
    }

    /// Sets the path unless the error already has one.
    pub fn or_path(mut self, path: Option<&Path>) -> Self {
        if self.path.is_none() {
            self.path = path.cloned();
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}
