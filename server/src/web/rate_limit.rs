use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::engine::rate_limiter::RateLimiter;

/// Per-IP rate limiters for the HTTP surface.
pub struct ApiRateLimiters {
    /// Read-only REST endpoints. Burst of 60, refill 1 per second.
    pub api: RateLimiter<String>,
    /// WebSocket handshakes. Burst of 5, refill 1 per 12 seconds.
    pub ws: RateLimiter<String>,
}

impl Default for ApiRateLimiters {
    fn default() -> Self {
        Self {
            api: RateLimiter::new(60, 1.0),
            ws: RateLimiter::new(5, 12.0),
        }
    }
}

impl ApiRateLimiters {
    pub fn cleanup(&self, idle: Duration) {
        self.api.cleanup(idle);
        self.ws.cleanup(idle);
    }
}

/// Client IP for rate limiting. Proxy headers are trusted only from a loopback peer.
fn client_ip(req: &Request<Body>) -> String {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip());
    let from_loopback = peer_ip.is_some_and(|ip| ip.is_loopback());

    if from_loopback {
        if let Some(forwarded) = req.headers().get("x-forwarded-for")
            && let Ok(val) = forwarded.to_str()
            && let Some(first) = val.split(',').next()
        {
            return first.trim().to_string();
        }

        if let Some(real_ip) = req.headers().get("x-real-ip")
            && let Ok(val) = real_ip.to_str()
        {
            return val.trim().to_string();
        }
    }

    peer_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn limited(
    req: Request<Body>,
    next: Next,
    pick: fn(&ApiRateLimiters) -> &RateLimiter<String>,
    message: &'static str,
) -> Response {
    if let Some(limiters) = req.extensions().get::<Arc<ApiRateLimiters>>() {
        let ip = client_ip(&req);
        if !pick(limiters).check(&ip) {
            return (StatusCode::TOO_MANY_REQUESTS, message).into_response();
        }
    }
    next.run(req).await
}

/// Middleware for REST rate limiting.
pub async fn api_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(
        req,
        next,
        |l| &l.api,
        "Rate limit exceeded. Please try again later.",
    )
    .await
}

/// Middleware for WebSocket handshake rate limiting.
pub async fn ws_rate_limit(req: Request<Body>, next: Next) -> Response {
    limited(
        req,
        next,
        |l| &l.ws,
        "Too many connections. Please try again later.",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request_from(peer: &str, forwarded: Option<&str>) -> Request<Body> {
        let mut req = Request::new(Body::empty());
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        if let Some(value) = forwarded {
            req.headers_mut()
                .insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        }
        req
    }

    #[test]
    fn test_forwarded_header_trusted_from_loopback() {
        let req = request_from("127.0.0.1:5000", Some("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_ip(&req), "203.0.113.9");
    }

    #[test]
    fn test_forwarded_header_ignored_from_remote_peer() {
        let req = request_from("198.51.100.4:5000", Some("203.0.113.9"));
        assert_eq!(client_ip(&req), "198.51.100.4");
    }

    #[test]
    fn test_missing_peer_is_unknown() {
        let req = Request::new(Body::empty());
        assert_eq!(client_ip(&req), "unknown");
    }
}
