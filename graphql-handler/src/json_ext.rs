//! JSON helpers shared by requests, responses and variable handling.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// One element of a response or variable [`Path`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index in a list.
    Index(usize),

    /// A key in an object.
    Key(String),
}

impl From<&str> for PathElement {
    fn from(key: &str) -> Self {
        PathElement::Key(key.to_owned())
    }
}

impl From<String> for PathElement {
    fn from(key: String) -> Self {
        PathElement::Key(key)
    }
}

impl From<usize> for PathElement {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => f.write_str(key),
        }
    }
}

/// A path into a JSON document, serialized as a list of keys and indexes.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    /// Builds a path from string segments, numeric segments become list indexes.
    pub fn from_slice<T: AsRef<str>>(segments: &[T]) -> Self {
        Self(
            segments
                .iter()
                .map(|segment| {
                    let segment = segment.as_ref();
                    segment
                        .parse::<usize>()
                        .map(PathElement::Index)
                        .unwrap_or_else(|_| PathElement::Key(segment.to_owned()))
                })
                .collect(),
        )
    }

    /// Parses a dot separated path such as `variables.files.0`.
    pub fn parse_dotted(path: &str) -> Self {
        Self::from_slice(&path.split('.').collect::<Vec<_>>())
    }

    /// Returns a new path with `element` appended.
    pub fn join(&self, element: impl Into<PathElement>) -> Self {
        let mut elements = Vec::with_capacity(self.0.len() + 1);
        elements.extend(self.0.iter().cloned());
        elements.push(element.into());
        Path(elements)
    }

    pub fn push(&mut self, element: impl Into<PathElement>) {
        self.0.push(element.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }
}

impl From<Vec<PathElement>> for Path {
    fn from(elements: Vec<PathElement>) -> Self {
        Path(elements)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

/// Extension methods on JSON values.
pub trait ValueExt {
    /// Short name of the JSON kind, used in coercion messages.
    fn kind_name(&self) -> &'static str;

    /// Replaces the value found at `path`.
    ///
    /// Object keys are created when missing, list indexes must already exist. A numeric
    /// element names a key when it lands on an object and an index when it lands on a list.
    /// Returns `false` when the path does not fit the shape of the value.
    fn set_at_path(&mut self, path: &[PathElement], value: Value) -> bool;

    fn get_at_path(&self, path: &[PathElement]) -> Option<&Value>;
}

impl ValueExt for Value {
    fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(n) if n.is_f64() => "float",
            Value::Number(_) => "int",
            Value::String(_) => "string",
            Value::Array(_) => "list",
            Value::Object(_) => "object",
        }
    }

    fn set_at_path(&mut self, path: &[PathElement], value: Value) -> bool {
        let Some((first, rest)) = path.split_first() else {
            *self = value;
            return true;
        };
        match (self, first) {
            (Value::Object(map), element) => {
                let key = element.to_string();
                if rest.is_empty() {
                    map.insert(key, value);
                    true
                } else {
                    map.get_mut(key.as_str())
                        .is_some_and(|child| child.set_at_path(rest, value))
                }
            }
            (Value::Array(list), PathElement::Index(index)) => list
                .get_mut(*index)
                .is_some_and(|child| child.set_at_path(rest, value)),
            _ => false,
        }
    }

    fn get_at_path(&self, path: &[PathElement]) -> Option<&Value> {
        path.iter().try_fold(self, |current, element| match (current, element) {
            (Value::Object(map), PathElement::Key(key)) => map.get(key.as_str()),
            (Value::Object(map), PathElement::Index(index)) => map.get(index.to_string().as_str()),
            (Value::Array(list), PathElement::Index(index)) => list.get(*index),
            _ => None,
        })
    }
}
