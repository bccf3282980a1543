//! Optional bearer-token middleware.
//!
//! When `--auth-token` is configured every route except `/health` needs
//! `Authorization: Bearer <token>`. Browsers cannot set headers on WebSocket
//! upgrades, so `?token=<token>` is accepted too.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// The token a request presented, header first, then query string.
fn presented_token(req: &Request<Body>) -> Option<&str> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    from_header.or_else(|| {
        req.uri()
            .query()?
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    })
}

pub async fn auth_middleware(
    State(expected_token): State<String>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    if presented_token(&req) == Some(expected_token.as_str()) {
        return Ok(next.run(req).await);
    }

    debug!(
        component = "auth",
        event = "auth.rejected",
        path = %req.uri().path(),
        "Rejected request without a valid token"
    );
    Err(StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn header_token_is_found() {
        let req = request("/status", Some("Bearer s3cret"));
        assert_eq!(presented_token(&req), Some("s3cret"));
    }

    #[test]
    fn query_token_is_found() {
        let req = request("/ws/main?role=page&token=s3cret", None);
        assert_eq!(presented_token(&req), Some("s3cret"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let req = request("/status", Some("Basic czNjcmV0"));
        assert_eq!(presented_token(&req), None);
    }
}
