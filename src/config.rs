//! Per-start-attempt server session configuration.

use std::io;
use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

use crate::token::SecretToken;

/// Default ceiling on bind-and-listen attempts before giving up.
pub const DEFAULT_MAX_START_ATTEMPTS: u32 = 10;
/// Default wall-clock budget for a single request, engine call included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default cap on a request body (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
/// Declared ceiling on concurrently handled requests.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: u32 = 20;

/// Static limits applied to every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_start_attempts: u32,
    pub request_timeout: Duration,
    pub max_body_bytes: u64,
    /// Declared on the configuration but not enforced by the accept loop;
    /// see DESIGN.md.
    pub max_concurrent_requests: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_start_attempts: DEFAULT_MAX_START_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

/// Immutable bundle produced once per start attempt: the probed loopback
/// port, the session secret, and the static limits.
///
/// A failed bind discards the whole instance; the retry allocates a new one
/// so a stale port/secret pair never stays discoverable.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: u16,
    pub secret: SecretToken,
    pub limits: SessionLimits,
}

impl SessionConfig {
    /// Probe an ephemeral loopback port and pair it with a fresh secret.
    ///
    /// The probe socket is bound to `127.0.0.1:0`, the assigned port read
    /// back, and the socket released before the real listener rebinds it.
    /// Another process can win the port in that window; a lost race shows
    /// up as a bind failure and consumes one start attempt.
    pub fn allocate(limits: SessionLimits) -> io::Result<Self> {
        let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = probe.local_addr()?.port();
        drop(probe);
        Ok(Self {
            port,
            secret: SecretToken::generate(),
            limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_assigns_ephemeral_port() {
        let config = SessionConfig::allocate(SessionLimits::default()).expect("allocate");
        assert_ne!(config.port, 0);
    }

    #[test]
    fn allocate_generates_fresh_secret_each_time() {
        let limits = SessionLimits::default();
        let a = SessionConfig::allocate(limits).expect("allocate");
        let b = SessionConfig::allocate(limits).expect("allocate");
        assert_ne!(a.secret.expose(), b.secret.expose());
    }

    #[test]
    fn default_limits() {
        let limits = SessionLimits::default();
        assert_eq!(limits.max_start_attempts, 10);
        assert_eq!(limits.request_timeout, Duration::from_secs(30));
        assert_eq!(limits.max_body_bytes, 1024 * 1024);
        assert_eq!(limits.max_concurrent_requests, 20);
    }
}
