//! An in-process client for testing GraphQL servers. Not for production use.
//!
//! Requests are sent straight to an axum [`Router`] without a network listener:
//!
//! ```ignore
//! let client = Client::new(server.into_router("/graphql"), "/graphql");
//! let data: serde_json::Value = client.post("{ name }", [var("id", 1)]).await?;
//! ```

use std::sync::Arc;

use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use bytes::BytesMut;
use cookie::Cookie;
use displaydoc::Display;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::StatusCode;
use http::header::AUTHORIZATION;
use http::header::CONTENT_TYPE;
use http::header::COOKIE;
use http_body_util::BodyExt;
use mediatype::MediaType;
use mediatype::names::BOUNDARY;
use mediatype::names::FORM_DATA;
use mediatype::names::MULTIPART;
use mime::APPLICATION_JSON;
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tower::ServiceExt;

use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::transport::Body;

/// Failures of a test request.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ClientError {
    /// could not build request: {0}
    Build(String),

    /// http {status}: {body}
    Http { status: StatusCode, body: String },

    /// could not read response: {0}
    Read(#[source] axum::Error),

    /// could not decode response: {0}
    Decode(#[source] serde_json::Error),

    /// graphql errors: {0:?}
    GraphQL(Vec<graphql::Error>),
}

/// A file sent as a variable.
///
/// Files are told apart by identity: the same `Arc` used for several variables is sent once.
#[derive(Clone, Debug)]
pub struct ClientFile {
    pub filename: String,
    pub content: Bytes,
}

impl ClientFile {
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            filename: filename.into(),
            content: content.into(),
        })
    }
}

/// An outgoing GraphQL request, changed by [`RequestOption`]s before it is sent.
#[derive(Debug, Default)]
pub struct ClientRequest {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Object,
    pub extensions: Object,
    pub headers: HeaderMap,
    files: Vec<(String, Arc<ClientFile>)>,
}

/// Changes a [`ClientRequest`]; see [`var`], [`operation_name`] and the other constructors.
#[derive(Clone)]
pub struct RequestOption(Arc<dyn Fn(&mut ClientRequest) + Send + Sync>);

impl RequestOption {
    pub fn new(option: impl Fn(&mut ClientRequest) + Send + Sync + 'static) -> Self {
        Self(Arc::new(option))
    }
}

/// Sets the variable `name`.
pub fn var(name: &str, value: impl Serialize) -> RequestOption {
    let name = name.to_string();
    let value = serde_json_bytes::to_value(value).unwrap_or_default();
    RequestOption::new(move |request| {
        request
            .variables
            .insert(name.as_str(), value.clone());
    })
}

pub fn operation_name(name: &str) -> RequestOption {
    let name = name.to_string();
    RequestOption::new(move |request| request.operation_name = Some(name.clone()))
}

pub fn extensions(extensions: Object) -> RequestOption {
    RequestOption::new(move |request| request.extensions = extensions.clone())
}

pub fn add_header(name: HeaderName, value: HeaderValue) -> RequestOption {
    RequestOption::new(move |request| {
        request.headers.append(name.clone(), value.clone());
    })
}

/// Sets `Authorization: Basic ..`.
pub fn basic_auth(username: &str, password: &str) -> RequestOption {
    let credentials = STANDARD.encode(format!("{username}:{password}"));
    let value = HeaderValue::from_str(&format!("Basic {credentials}"));
    RequestOption::new(move |request| {
        if let Ok(value) = &value {
            request.headers.insert(AUTHORIZATION, value.clone());
        }
    })
}

pub fn add_cookie(cookie: Cookie<'static>) -> RequestOption {
    let pair = cookie.stripped().to_string();
    RequestOption::new(move |request| {
        let cookies = match request
            .headers
            .get(COOKIE)
            .and_then(|cookies| cookies.to_str().ok())
        {
            Some(cookies) => format!("{cookies}; {pair}"),
            None => pair.clone(),
        };
        if let Ok(cookies) = HeaderValue::from_str(&cookies) {
            request.headers.insert(COOKIE, cookies);
        }
    })
}

/// Sends `file` for the variable at the dotted `path`, switching the request to multipart.
pub fn var_file(path: &str, file: Arc<ClientFile>) -> RequestOption {
    let path = path.to_string();
    RequestOption::new(move |request| request.files.push((path.clone(), file.clone())))
}

/// Sends `files` as the list variable at the dotted `path`.
pub fn var_files(path: &str, files: Vec<Arc<ClientFile>>) -> RequestOption {
    let path = path.to_string();
    RequestOption::new(move |request| {
        let mut variables = Value::Object(std::mem::take(&mut request.variables));
        insert_at(
            &mut variables,
            &Path::parse_dotted(&path).0,
            Value::Array(vec![Value::Null; files.len()]),
        );
        if let Value::Object(variables) = variables {
            request.variables = variables;
        }
        for (index, file) in files.iter().enumerate() {
            request.files.push((format!("{path}.{index}"), file.clone()));
        }
    })
}

/// Sends GraphQL requests to a router.
#[derive(Clone)]
pub struct Client {
    router: Router,
    uri: String,
    options: Vec<RequestOption>,
}

impl Client {
    pub fn new(router: Router, uri: impl Into<String>) -> Self {
        Self {
            router,
            uri: uri.into(),
            options: Vec::new(),
        }
    }

    /// Options applied to every request, before the per request ones.
    pub fn with_options(mut self, options: impl IntoIterator<Item = RequestOption>) -> Self {
        self.options.extend(options);
        self
    }

    /// Sends `query` and deserializes the response `data`, failing on any GraphQL error.
    pub async fn post<T: DeserializeOwned>(
        &self,
        query: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<T, ClientError> {
        let response = self.raw_post(query, options).await?;
        if !response.errors.is_empty() {
            return Err(ClientError::GraphQL(response.errors));
        }
        serde_json_bytes::from_value(response.data).map_err(ClientError::Decode)
    }

    /// Sends `query` and returns the whole response, extensions and errors included.
    pub async fn raw_post(
        &self,
        query: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<graphql::Response, ClientError> {
        let http_request = self.new_request(query, options)?;
        let response = match self.router.clone().oneshot(http_request).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(ClientError::Read)?
            .to_bytes();
        if status.is_client_error() || status.is_server_error() {
            return Err(ClientError::Http {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(ClientError::Decode)
    }

    fn new_request(
        &self,
        query: &str,
        options: impl IntoIterator<Item = RequestOption>,
    ) -> Result<http::Request<Body>, ClientError> {
        let mut request = ClientRequest {
            query: query.to_string(),
            ..Default::default()
        };
        for option in self.options.iter().cloned().chain(options) {
            (option.0)(&mut request);
        }

        let (content_type, body) = if request.files.is_empty() {
            let body = serde_json::to_vec(&operations(&request))
                .map_err(|error| ClientError::Build(error.to_string()))?;
            (
                HeaderValue::from_static(APPLICATION_JSON.essence_str()),
                Bytes::from(body),
            )
        } else {
            MultipartBody::new(std::mem::take(&mut request.files)).encode(&mut request)?
        };

        let mut http_request = http::Request::post(&self.uri)
            .body(Body::from(body))
            .map_err(|error| ClientError::Build(error.to_string()))?;
        *http_request.headers_mut() = std::mem::take(&mut request.headers);
        http_request.headers_mut().insert(CONTENT_TYPE, content_type);
        Ok(http_request)
    }
}

/// The JSON request, without `query` when it is empty so persisted query hashes can be sent alone.
fn operations(request: &ClientRequest) -> graphql::Request {
    graphql::Request::builder()
        .and_query((!request.query.is_empty()).then(|| request.query.clone()))
        .and_operation_name(request.operation_name.clone())
        .variables(request.variables.clone())
        .extensions(request.extensions.clone())
        .build()
}

/// A request body following the GraphQL multipart request convention.
struct MultipartBody {
    boundary: String,
    /// Distinct files with every variable path they are sent for.
    files: Vec<(Arc<ClientFile>, Vec<String>)>,
}

impl MultipartBody {
    fn new(paths: Vec<(String, Arc<ClientFile>)>) -> Self {
        let mut files: Vec<(Arc<ClientFile>, Vec<String>)> = Vec::new();
        for (path, file) in paths {
            match files.iter_mut().find(|(known, _)| Arc::ptr_eq(known, &file)) {
                Some((_, file_paths)) => file_paths.push(path),
                None => files.push((file, vec![path])),
            }
        }
        Self {
            boundary: format!("{:016x}", rand::rng().next_u64()),
            files,
        }
    }

    fn content_type(&self) -> Result<HeaderValue, ClientError> {
        let boundary = mediatype::Value::new(&self.boundary)
            .ok_or_else(|| ClientError::Build("invalid multipart boundary".to_string()))?;
        let params = [(BOUNDARY, boundary)];
        let mime = MediaType::from_parts(MULTIPART, FORM_DATA, None, &params);
        HeaderValue::from_str(&mime.to_string())
            .map_err(|error| ClientError::Build(error.to_string()))
    }

    /// Writes `{}` placeholders into the request variables and encodes the whole body.
    fn encode(self, request: &mut ClientRequest) -> Result<(HeaderValue, Bytes), ClientError> {
        let mut variables = Value::Object(std::mem::take(&mut request.variables));
        let mut map = Object::new();
        for (index, (_, paths)) in self.files.iter().enumerate() {
            for path in paths {
                insert_at(
                    &mut variables,
                    &Path::parse_dotted(path).0,
                    Value::Object(Object::new()),
                );
            }
            map.insert(
                index.to_string(),
                Value::Array(
                    paths
                        .iter()
                        .map(|path| Value::from(format!("variables.{path}")))
                        .collect(),
                ),
            );
        }
        if let Value::Object(variables) = variables {
            request.variables = variables;
        }

        let operations = serde_json::to_string(&operations(request))
            .map_err(|error| ClientError::Build(error.to_string()))?;
        let map = serde_json::to_string(&map).map_err(|error| ClientError::Build(error.to_string()))?;

        let mut body = BytesMut::new();
        self.write_field(&mut body, "name=\"operations\"", None, operations.as_bytes());
        self.write_field(&mut body, "name=\"map\"", None, map.as_bytes());
        for (index, (file, _)) in self.files.iter().enumerate() {
            self.write_field(
                &mut body,
                &format!("name=\"{index}\"; filename=\"{}\"", file.filename),
                Some("text/plain; charset=utf-8"),
                &file.content,
            );
        }
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Ok((self.content_type()?, body.freeze()))
    }

    fn write_field(
        &self,
        body: &mut BytesMut,
        disposition: &str,
        content_type: Option<&str>,
        content: &[u8],
    ) {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; {disposition}\r\n",
                self.boundary
            )
            .as_bytes(),
        );
        if let Some(content_type) = content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
}

/// Sets `value` at `path`, creating missing objects and growing lists on the way.
fn insert_at(target: &mut Value, path: &[PathElement], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *target = value;
        return;
    };
    let next = match first {
        PathElement::Index(index) => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            let Value::Array(list) = target else {
                return;
            };
            if list.len() <= *index {
                list.resize(index + 1, Value::Null);
            }
            &mut list[*index]
        }
        PathElement::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(Object::new());
            }
            let Value::Object(object) = target else {
                return;
            };
            object.entry(key.as_str()).or_insert(Value::Null)
        }
    };
    insert_at(next, rest, value);
}
