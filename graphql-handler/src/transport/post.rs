use std::time::SystemTime;

use async_trait::async_trait;
use http::Method;
use http::StatusCode;
use http_body_util::BodyExt;
use mediatype::names::APPLICATION;
use mediatype::names::JSON;

use super::Body;
use super::Transport;
use crate::executor::Executor;
use crate::graphql;
use crate::operation::RawParams;
use crate::operation::TraceTiming;

/// GraphQL parameters as an `application/json` body.
#[derive(Clone, Copy, Debug, Default)]
pub struct Post;

#[async_trait]
impl Transport for Post {
    fn supports(&self, request: &http::Request<Body>) -> bool {
        !super::is_upgrade(request)
            && request.method() == Method::POST
            && super::has_media_type(request, APPLICATION, JSON)
    }

    async fn handle(
        &self,
        request: http::Request<Body>,
        executor: &Executor,
    ) -> http::Response<Body> {
        let start = SystemTime::now();
        let (parts, body) = request.into_parts();
        let graphql_request = match read_json(body).await {
            Ok(graphql_request) => graphql_request,
            Err(message) => return super::write_json_error(StatusCode::BAD_REQUEST, message),
        };
        let params = RawParams::new(graphql_request, TraceTiming::since(start))
            .with_headers(parts.headers);
        super::execute(executor, params).await
    }
}

async fn read_json(body: Body) -> Result<graphql::Request, String> {
    let bytes = body
        .collect()
        .await
        .map_err(|error| format!("json body could not be decoded: {error}"))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|error| format!("json body could not be decoded: {error}"))
}
