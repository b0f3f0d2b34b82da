//! Wire encodings a [`Server`](crate::Server) accepts.
//!
//! Transports are tried in registration order, the first one whose [`Transport::supports`]
//! returns `true` handles the request.

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderValue;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::header::UPGRADE;
use mediatype::MediaType;
use mediatype::Name;
use mime::APPLICATION_JSON;

pub use self::get::Get;
pub use self::multipart::FileUploadError;
pub use self::multipart::MultipartForm;
pub use self::options::Options;
pub use self::post::Post;
use crate::error::status_for;
use crate::executor::Executor;
use crate::graphql;
use crate::operation::OperationContext;
use crate::operation::OperationError;
use crate::operation::RawParams;

mod get;
mod multipart;
mod options;
mod post;

pub type Body = axum::body::Body;

/// One wire encoding of GraphQL requests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether this transport can handle `request`, from its method and headers only.
    fn supports(&self, request: &http::Request<Body>) -> bool;

    /// Reads the request, runs it through `executor` and writes the response.
    async fn handle(&self, request: http::Request<Body>, executor: &Executor)
    -> http::Response<Body>;
}

/// Builds the operation context and runs the operation.
pub(crate) async fn execute(executor: &Executor, params: RawParams) -> http::Response<Body> {
    match executor.create_operation_context(params).await {
        Ok(context) => respond(executor, context).await,
        Err(error) => respond_error(executor, *error).await,
    }
}

pub(crate) async fn respond(executor: &Executor, context: OperationContext) -> http::Response<Body> {
    let response = executor.dispatch_operation(context).await.produce().await;
    write_json(StatusCode::OK, &response)
}

/// Answers a request whose context could not be built, with the status its errors map to.
pub(crate) async fn respond_error(
    executor: &Executor,
    error: OperationError,
) -> http::Response<Body> {
    let status = status_for(&error.errors);
    let response = executor.dispatch_error(error.context, error.errors).await;
    write_json(status, &response)
}

pub(crate) fn write_json(status: StatusCode, response: &graphql::Response) -> http::Response<Body> {
    let body = match response.to_bytes() {
        Ok(body) => body,
        Err(error) => {
            tracing::error!(%error, "could not serialize the response");
            Bytes::from_static(br#"{"errors":[{"message":"internal system error"}],"data":null}"#)
        }
    };
    let mut http_response = http::Response::new(Body::from(body));
    *http_response.status_mut() = status;
    http_response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(APPLICATION_JSON.essence_str()),
    );
    http_response
}

/// A response made of a single error.
pub(crate) fn write_json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> http::Response<Body> {
    write_json(status, &graphql::Response::error_message(message))
}

pub(crate) fn is_upgrade(request: &http::Request<Body>) -> bool {
    request.headers().contains_key(UPGRADE)
}

/// Whether the request `Content-Type` has the media type `ty/subty`, parameters ignored.
pub(crate) fn has_media_type(request: &http::Request<Body>, ty: Name<'_>, subty: Name<'_>) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|header| header.to_str().ok())
        .and_then(|str| MediaType::parse(str).ok())
        .is_some_and(|media_type| media_type.ty == ty && media_type.subty == subty)
}
