//! Files received through `multipart/form-data` requests.
//!
//! Variables cannot carry file handles, so the multipart transport replaces every file
//! variable with a placeholder string and keeps the file in the operation's [`Uploads`].
//! Resolvers turn the argument they received back into the file with [`Uploads::get`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempPath;

use crate::json_ext::Value;

const PLACEHOLDER_PREFIX: &str = "<Placeholder for file '";
const PLACEHOLDER_SUFFIX: &str = "'>";

/// An uploaded file.
#[derive(Clone, Debug)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
    content: UploadContent,
}

#[derive(Clone, Debug)]
enum UploadContent {
    Memory(Bytes),
    // Removed from disk when the last reference is dropped.
    File(Arc<TempPath>),
}

impl Upload {
    pub(crate) fn in_memory(
        filename: String,
        content_type: Option<String>,
        content: Bytes,
    ) -> Self {
        Self {
            filename,
            content_type,
            size: content.len() as u64,
            content: UploadContent::Memory(content),
        }
    }

    pub(crate) fn on_disk(
        filename: String,
        content_type: Option<String>,
        size: u64,
        path: TempPath,
    ) -> Self {
        Self {
            filename,
            content_type,
            size,
            content: UploadContent::File(Arc::new(path)),
        }
    }

    /// Whether the file content was kept in memory rather than spilled to disk.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.content, UploadContent::Memory(_))
    }

    /// Path of the temporary file holding the content, if spilled to disk.
    pub fn path(&self) -> Option<&std::path::Path> {
        match &self.content {
            UploadContent::Memory(_) => None,
            UploadContent::File(path) => {
                let path: &std::path::Path = path;
                Some(path)
            }
        }
    }

    /// Reads the whole file.
    pub async fn bytes(&self) -> std::io::Result<Bytes> {
        match &self.content {
            UploadContent::Memory(bytes) => Ok(bytes.clone()),
            UploadContent::File(path) => {
                let path: &std::path::Path = path;
                tokio::fs::read(path).await.map(Bytes::from)
            }
        }
    }
}

/// The files of one request, keyed by their `map` entry.
#[derive(Clone, Debug, Default)]
pub struct Uploads {
    files: HashMap<String, Upload>,
}

impl Uploads {
    /// The value written into variables in place of the file registered under `key`.
    pub fn placeholder(key: &str) -> Value {
        Value::String(format!("{PLACEHOLDER_PREFIX}{key}{PLACEHOLDER_SUFFIX}").into())
    }

    pub(crate) fn insert(&mut self, key: String, upload: Upload) {
        self.files.insert(key, upload);
    }

    /// Returns the file a variable placeholder refers to.
    pub fn get(&self, value: &Value) -> Option<&Upload> {
        let key = value
            .as_str()?
            .strip_prefix(PLACEHOLDER_PREFIX)?
            .strip_suffix(PLACEHOLDER_SUFFIX)?;
        self.files.get(key)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
