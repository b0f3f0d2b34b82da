use async_trait::async_trait;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::ALLOW;

use super::Body;
use super::Transport;
use crate::executor::Executor;

const ALLOWED_METHODS: &str = "OPTIONS, GET, POST";

/// Answers `OPTIONS` with the allowed methods and refuses `HEAD`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options;

#[async_trait]
impl Transport for Options {
    fn supports(&self, request: &http::Request<Body>) -> bool {
        request.method() == Method::OPTIONS || request.method() == Method::HEAD
    }

    async fn handle(
        &self,
        request: http::Request<Body>,
        _executor: &Executor,
    ) -> http::Response<Body> {
        let mut response = http::Response::new(Body::empty());
        if request.method() == Method::OPTIONS {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        } else {
            *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestSchema;

    fn request(method: Method) -> http::Request<Body> {
        http::Request::builder()
            .method(method)
            .uri("/graphql")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn lists_allowed_methods() {
        let executor = Executor::new(TestSchema::arc());
        let response = Options.handle(request(Method::OPTIONS), &executor).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ALLOW], "OPTIONS, GET, POST");
    }

    #[tokio::test]
    async fn refuses_head() {
        let executor = Executor::new(TestSchema::arc());
        let response = Options.handle(request(Method::HEAD), &executor).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(!response.headers().contains_key(ALLOW));
    }

    #[test]
    fn supports_options_and_head_only() {
        assert!(Options.supports(&request(Method::OPTIONS)));
        assert!(Options.supports(&request(Method::HEAD)));
        assert!(!Options.supports(&request(Method::GET)));
    }
}
