//! The GraphQL multipart request protocol.
//!
//! See <https://github.com/jaydenseric/graphql-multipart-request-spec> for the wire format:
//! an `operations` field with the JSON request, a `map` field from file keys to variable paths
//! and one file field per key.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::BytesMut;
use bytesize::ByteSize;
use displaydoc::Display;
use http::Method;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use indexmap::IndexMap;
use mediatype::names::FORM_DATA;
use mediatype::names::MULTIPART;
use multer::Constraints;
use multer::Multipart;
use multer::SizeLimit;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::Body;
use super::Transport;
use crate::configuration::MultipartConfig;
use crate::executor::Executor;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::operation::RawParams;
use crate::operation::TraceTiming;
use crate::upload::Upload;
use crate::upload::Uploads;

const VARIABLES_PREFIX: &str = "variables.";

/// Failures to read a multipart request.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum FileUploadError {
    /// failed to parse multipart form
    InvalidMultipartForm(#[source] multer::Error),

    /// failed to parse multipart form, request body too large
    BodyTooLarge,

    /// operations form field could not be decoded
    InvalidOperations,

    /// map form field could not be decoded
    InvalidMap,

    /// invalid empty operations paths list for key {0}
    EmptyPaths(String),

    /// expected file header len for key {0}: {1}
    FileCount(String, usize),

    /// failed to open multipart file for key {0}
    OpenFile(String, #[source] std::io::Error),

    /// invalid operations paths for key {0}
    InvalidPath(String),

    /// invalid value for key {0}
    InvalidValue(String),
}

impl From<multer::Error> for FileUploadError {
    fn from(error: multer::Error) -> Self {
        match error {
            multer::Error::StreamSizeExceeded { .. } => Self::BodyTooLarge,
            error => Self::InvalidMultipartForm(error),
        }
    }
}

impl From<FileUploadError> for graphql::Error {
    fn from(value: FileUploadError) -> Self {
        Self::builder().message(value.to_string()).build()
    }
}

/// GraphQL operations with files, as `multipart/form-data`.
///
/// Files larger than `max_memory` are written to temporary files that are removed once the
/// operation is done with them.
#[derive(Clone, Debug)]
pub struct MultipartForm {
    /// Maximum size of a whole request body.
    pub max_upload_size: ByteSize,
    /// Largest file kept in memory.
    pub max_memory: ByteSize,
    /// Where larger files are spilled, the system temporary directory when `None`.
    pub temp_dir: Option<PathBuf>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::from(&MultipartConfig::default())
    }
}

impl From<&MultipartConfig> for MultipartForm {
    fn from(config: &MultipartConfig) -> Self {
        Self {
            max_upload_size: config.max_upload_size,
            max_memory: config.max_memory,
            temp_dir: config.temp_dir.clone(),
        }
    }
}

#[async_trait]
impl Transport for MultipartForm {
    fn supports(&self, request: &http::Request<Body>) -> bool {
        !super::is_upgrade(request)
            && request.method() == Method::POST
            && super::has_media_type(request, MULTIPART, FORM_DATA)
    }

    async fn handle(
        &self,
        request: http::Request<Body>,
        executor: &Executor,
    ) -> http::Response<Body> {
        let start = SystemTime::now();
        let mut params = match self.read_params(request).await {
            Ok(params) => params,
            Err(error) => {
                tracing::debug!(%error, "could not read multipart request");
                return super::write_json_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    error.to_string(),
                );
            }
        };
        params.read_time = TraceTiming::since(start);
        super::execute(executor, params).await
    }
}

impl MultipartForm {
    async fn read_params(&self, request: http::Request<Body>) -> Result<RawParams, FileUploadError> {
        let (parts, body) = request.into_parts();
        let boundary = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|header| header.to_str().ok())
            .ok_or(FileUploadError::InvalidMultipartForm(multer::Error::NoBoundary))
            .and_then(|content_type| Ok(multer::parse_boundary(content_type)?))?;
        let constraints = Constraints::new()
            .size_limit(SizeLimit::new().whole_stream(self.max_upload_size.as_u64()));
        let mut multipart =
            Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

        let mut operations = Vec::new();
        let mut maps = Vec::new();
        let mut files: HashMap<String, Vec<Upload>> = HashMap::new();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() {
                let upload = self.read_file(&name, field).await?;
                files.entry(name).or_default().push(upload);
                continue;
            }
            match name.as_str() {
                "operations" => operations.push(field.text().await?),
                "map" => maps.push(field.text().await?),
                _ => {}
            }
        }

        let [operations] = <[String; 1]>::try_from(operations)
            .map_err(|_| FileUploadError::InvalidOperations)?;
        let request: graphql::Request =
            serde_json::from_str(&operations).map_err(|_| FileUploadError::InvalidOperations)?;
        let [map] = <[String; 1]>::try_from(maps).map_err(|_| FileUploadError::InvalidMap)?;
        let map: IndexMap<String, Vec<String>> =
            serde_json::from_str(&map).map_err(|_| FileUploadError::InvalidMap)?;

        let mut params = RawParams::new(request, TraceTiming::default()).with_headers(parts.headers);
        let mut variables = Value::Object(std::mem::take(&mut params.variables));
        for (key, paths) in map {
            if paths.is_empty() {
                return Err(FileUploadError::EmptyPaths(key));
            }
            let uploads = files.remove(&key).unwrap_or_default();
            let [upload] = <[Upload; 1]>::try_from(uploads)
                .map_err(|uploads| FileUploadError::FileCount(key.clone(), uploads.len()))?;
            for path in paths {
                let Some(path) = path.strip_prefix(VARIABLES_PREFIX) else {
                    return Err(FileUploadError::InvalidPath(key));
                };
                if !variables.set_at_path(&Path::parse_dotted(path).0, Uploads::placeholder(&key)) {
                    return Err(FileUploadError::InvalidValue(key));
                }
            }
            params.uploads.insert(key, upload);
        }
        if let Value::Object(variables) = variables {
            params.variables = variables;
        } else {
            params.variables = Object::new();
        }
        Ok(params)
    }

    /// Reads one file, moving it to disk once it outgrows `max_memory`.
    async fn read_file(
        &self,
        key: &str,
        mut field: multer::Field<'_>,
    ) -> Result<Upload, FileUploadError> {
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(|mime| mime.to_string());
        let open_error = |error| FileUploadError::OpenFile(key.to_string(), error);

        let mut buffer = BytesMut::new();
        let mut size = 0;
        let mut on_disk: Option<(tokio::fs::File, TempPath)> = None;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            if let Some((file, _)) = &mut on_disk {
                file.write_all(&chunk).await.map_err(open_error)?;
                continue;
            }
            if size <= self.max_memory.as_u64() {
                buffer.extend_from_slice(&chunk);
                continue;
            }
            let mut builder = tempfile::Builder::new();
            builder.prefix("gqlgen-");
            let spilled = match &self.temp_dir {
                Some(dir) => builder.tempfile_in(dir),
                None => builder.tempfile(),
            };
            let (file, path) = spilled.map_err(open_error)?.into_parts();
            let mut file = tokio::fs::File::from_std(file);
            file.write_all(&buffer).await.map_err(open_error)?;
            file.write_all(&chunk).await.map_err(open_error)?;
            buffer.clear();
            on_disk = Some((file, path));
        }

        match on_disk {
            Some((mut file, path)) => {
                file.flush().await.map_err(open_error)?;
                tracing::trace!(key, size, "multipart file written to disk");
                Ok(Upload::on_disk(filename, content_type, size, path))
            }
            None => Ok(Upload::in_memory(filename, content_type, buffer.freeze())),
        }
    }
}
