//! Request-derived identity used for rate limiting and event enrichment.

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_client_ip::InsecureClientIp;

use crate::event::UNKNOWN_USER_AGENT;

/// Shared bucket for requests whose origin cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Best-effort client address: forwarding headers first, then the socket peer.
/// Never rejects; unidentifiable clients share the `unknown` identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(match InsecureClientIp::from_request_parts(parts, state).await {
            Ok(InsecureClientIp(ip)) => ClientId(ip.to_string()),
            Err(_) => ClientId(UNKNOWN_CLIENT.to_owned()),
        })
    }
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_USER_AGENT)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, Request};

    use super::*;

    async fn client_id(request: Request<()>) -> ClientId {
        let (mut parts, _) = request.into_parts();
        ClientId::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn prefers_forwarded_for() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_id(request).await, ClientId("203.0.113.7".to_string()));
    }

    #[tokio::test]
    async fn falls_back_to_unknown() {
        let request = Request::builder().body(()).unwrap();
        assert_eq!(client_id(request).await, ClientId(UNKNOWN_CLIENT.to_string()));
    }

    #[test]
    fn user_agent_defaults_to_unknown() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_agent(&headers), UNKNOWN_USER_AGENT);

        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8.4.0"));
        assert_eq!(user_agent(&headers), "curl/8.4.0");
    }
}
