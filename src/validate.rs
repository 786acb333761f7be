//! Inbound request validation.
//!
//! A pure decision function over the connection's peer address, the request
//! line, the headers, and the current session configuration. Checks run in
//! a fixed order and short-circuit on the first failure so that nothing
//! about token validity is revealed to a non-loopback peer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hyper::http::{HeaderMap, Method, StatusCode};

use crate::config::SessionConfig;

/// Header carrying the session secret.
pub const AUTH_HEADER: &str = "x-auth-token";

pub const ANALYZE_PATH: &str = "/analyze";
pub const CANCEL_PATH: &str = "/cancel";

/// The route an accepted request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Analyze,
    Cancel,
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotLoopback,
    InvalidToken,
    UnknownRoute,
    BodyTooLarge,
}

impl RejectReason {
    /// Client-visible status for this rejection.
    pub fn status(self) -> StatusCode {
        match self {
            RejectReason::NotLoopback => StatusCode::FORBIDDEN,
            RejectReason::InvalidToken => StatusCode::UNAUTHORIZED,
            RejectReason::UnknownRoute => StatusCode::BAD_REQUEST,
            RejectReason::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NotLoopback => "not_loopback",
            RejectReason::InvalidToken => "invalid_token",
            RejectReason::UnknownRoute => "unknown_route",
            RejectReason::BodyTooLarge => "body_too_large",
        }
    }
}

/// Outcome of validating one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(RequestKind),
    Rejected(RejectReason),
}

/// Validate an inbound request against the current session configuration.
///
/// Check order: loopback peer, then token, then route, then declared body
/// size. The size check uses the declared `Content-Length` so oversized
/// payloads are rejected before being read off the wire.
pub fn validate(
    peer: SocketAddr,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    content_length: Option<u64>,
    config: &SessionConfig,
) -> ValidationOutcome {
    if !is_loopback_peer(peer.ip()) {
        return ValidationOutcome::Rejected(RejectReason::NotLoopback);
    }

    let token = headers
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !config.secret.matches(token) {
        return ValidationOutcome::Rejected(RejectReason::InvalidToken);
    }

    let kind = match (method, path) {
        (&Method::POST, ANALYZE_PATH) => RequestKind::Analyze,
        (&Method::POST, CANCEL_PATH) => RequestKind::Cancel,
        _ => return ValidationOutcome::Rejected(RejectReason::UnknownRoute),
    };

    if content_length.unwrap_or(0) > config.limits.max_body_bytes {
        return ValidationOutcome::Rejected(RejectReason::BodyTooLarge);
    }

    ValidationOutcome::Accepted(kind)
}

/// The peer must be exactly the IPv4 or IPv6 loopback address, not merely
/// inside 127.0.0.0/8.
fn is_loopback_peer(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4 == Ipv4Addr::LOCALHOST,
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionLimits;
    use crate::token::SecretToken;
    use hyper::http::HeaderValue;

    fn test_config() -> SessionConfig {
        SessionConfig {
            port: 45000,
            secret: SecretToken::generate(),
            limits: SessionLimits::default(),
        }
    }

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().expect("socket addr")
    }

    fn auth_headers(config: &SessionConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTH_HEADER,
            HeaderValue::from_str(config.secret.expose()).expect("header value"),
        );
        headers
    }

    #[test]
    fn remote_peer_rejected_even_with_correct_token() {
        let config = test_config();
        let headers = auth_headers(&config);
        let outcome = validate(
            peer("10.0.0.5:39000"),
            &Method::POST,
            ANALYZE_PATH,
            &headers,
            Some(100),
            &config,
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Rejected(RejectReason::NotLoopback)
        );
    }

    #[test]
    fn broader_loopback_block_is_not_loopback() {
        let config = test_config();
        let headers = auth_headers(&config);
        let outcome = validate(
            peer("127.0.0.2:39000"),
            &Method::POST,
            ANALYZE_PATH,
            &headers,
            Some(100),
            &config,
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Rejected(RejectReason::NotLoopback)
        );
    }

    #[test]
    fn ipv6_loopback_accepted() {
        let config = test_config();
        let headers = auth_headers(&config);
        let outcome = validate(
            peer("[::1]:39000"),
            &Method::POST,
            CANCEL_PATH,
            &headers,
            Some(10),
            &config,
        );
        assert_eq!(outcome, ValidationOutcome::Accepted(RequestKind::Cancel));
    }

    #[test]
    fn wrong_token_rejected_regardless_of_route() {
        let config = test_config();
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_HEADER, HeaderValue::from_static("wrong"));
        for path in [ANALYZE_PATH, CANCEL_PATH, "/nope"] {
            let outcome = validate(
                peer("127.0.0.1:39000"),
                &Method::POST,
                path,
                &headers,
                Some(10),
                &config,
            );
            assert_eq!(
                outcome,
                ValidationOutcome::Rejected(RejectReason::InvalidToken)
            );
        }
    }

    #[test]
    fn missing_token_header_rejected() {
        let config = test_config();
        let outcome = validate(
            peer("127.0.0.1:39000"),
            &Method::POST,
            ANALYZE_PATH,
            &HeaderMap::new(),
            Some(10),
            &config,
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Rejected(RejectReason::InvalidToken)
        );
    }

    #[test]
    fn unknown_route_rejected() {
        let config = test_config();
        let headers = auth_headers(&config);
        for (method, path) in [
            (Method::GET, ANALYZE_PATH),
            (Method::PUT, CANCEL_PATH),
            (Method::POST, "/status"),
        ] {
            let outcome = validate(
                peer("127.0.0.1:39000"),
                &method,
                path,
                &headers,
                Some(10),
                &config,
            );
            assert_eq!(
                outcome,
                ValidationOutcome::Rejected(RejectReason::UnknownRoute)
            );
        }
    }

    #[test]
    fn declared_length_over_limit_rejected() {
        let config = test_config();
        let headers = auth_headers(&config);
        let outcome = validate(
            peer("127.0.0.1:39000"),
            &Method::POST,
            ANALYZE_PATH,
            &headers,
            Some(config.limits.max_body_bytes + 1),
            &config,
        );
        assert_eq!(
            outcome,
            ValidationOutcome::Rejected(RejectReason::BodyTooLarge)
        );
    }

    #[test]
    fn declared_length_at_limit_accepted() {
        let config = test_config();
        let headers = auth_headers(&config);
        let outcome = validate(
            peer("127.0.0.1:39000"),
            &Method::POST,
            ANALYZE_PATH,
            &headers,
            Some(config.limits.max_body_bytes),
            &config,
        );
        assert_eq!(outcome, ValidationOutcome::Accepted(RequestKind::Analyze));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(RejectReason::NotLoopback.status(), StatusCode::FORBIDDEN);
        assert_eq!(RejectReason::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(RejectReason::UnknownRoute.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RejectReason::BodyTooLarge.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
