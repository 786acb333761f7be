//! Loopback HTTP server: lifecycle, accept loop, per-connection dispatch.
//!
//! The server binds a freshly allocated loopback port, publishes the
//! `(port, secret)` pair for the co-located orchestrator, and fans each
//! accepted connection out to its own task. Every unit of work runs under a
//! cancellation signal linked to both the server-wide shutdown token and a
//! per-request deadline timer.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::CONTENT_LENGTH;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::{SessionConfig, SessionLimits};
use crate::engine::AnalysisEngine;
use crate::error::{EngineError, ServerError};
use crate::respond::{self, BodyResponse};
use crate::token::SecretToken;
use crate::validate::{validate, RequestKind, ValidationOutcome};

/// Published coordinates of a listening session. The orchestrator reads
/// these out-of-band to construct authenticated requests.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub port: u16,
    pub secret: SecretToken,
}

/// Server lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting(u32),
    Listening,
    Stopping,
    Stopped,
}

/// Cancellation that fires when either the server-wide shutdown signal
/// fires or the per-request deadline elapses, whichever comes first.
///
/// Dropping it cancels the token, which also releases the timer task.
struct RequestDeadline {
    token: CancellationToken,
    _guard: DropGuard,
}

impl RequestDeadline {
    fn new(shutdown: &CancellationToken, timeout: Duration) -> Self {
        let token = shutdown.child_token();
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });
        let guard = token.clone().drop_guard();
        Self {
            token,
            _guard: guard,
        }
    }

    /// A clone of the linked token, handed to the engine as its
    /// cooperative cancellation signal.
    fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// The local analysis request server.
///
/// `run` is fire-and-forget from the orchestrator's point of view: start
/// failures are logged, never returned, and liveness is discovered by
/// watching [`LocalAnalysisServer::session`].
pub struct LocalAnalysisServer {
    engine: Arc<dyn AnalysisEngine>,
    limits: SessionLimits,
    state: Mutex<ServerState>,
    shutdown: CancellationToken,
    session_tx: watch::Sender<Option<SessionHandle>>,
}

impl LocalAnalysisServer {
    pub fn new(engine: Arc<dyn AnalysisEngine>, limits: SessionLimits) -> Self {
        let (session_tx, _) = watch::channel(None);
        Self {
            engine,
            limits,
            state: Mutex::new(ServerState::NotStarted),
            shutdown: CancellationToken::new(),
            session_tx,
        }
    }

    /// Subscribe to the published session. The value is `None` until a
    /// listener is up and again after the server stops.
    pub fn session(&self) -> watch::Receiver<Option<SessionHandle>> {
        self.session_tx.subscribe()
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind with retry and serve until shutdown.
    ///
    /// Each attempt uses a freshly allocated config (new port **and** new
    /// secret). Returns when the accept loop exits or every attempt failed;
    /// calling it on an already started or stopped server is a logged
    /// no-op.
    pub async fn run(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                ServerState::NotStarted => *state = ServerState::Starting(1),
                other => {
                    warn!(state = ?other, "start ignored");
                    return;
                }
            }
        }

        let (listener, config) = match self.bind_with_retry().await {
            Ok(bound) => bound,
            Err(err) => {
                error!(error = %err, "server failed to start");
                self.finish();
                return;
            }
        };

        self.set_state(ServerState::Listening);
        let _ = self.session_tx.send(Some(SessionHandle {
            port: config.port,
            secret: config.secret.clone(),
        }));
        info!(port = config.port, "listening");

        self.accept_loop(listener, Arc::new(config)).await;
        self.finish();
    }

    /// Stop accepting connections and cancel all in-flight work.
    ///
    /// Synchronous and idempotent: it does not wait for in-flight handlers
    /// to unwind, but no new connection is dispatched after it returns.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                ServerState::Stopping | ServerState::Stopped => {
                    debug!("shutdown ignored, already stopping");
                    return;
                }
                ServerState::NotStarted => *state = ServerState::Stopped,
                ServerState::Starting(_) | ServerState::Listening => {
                    *state = ServerState::Stopping
                }
            }
        }
        info!("shutting down");
        self.shutdown.cancel();
    }

    async fn bind_with_retry(&self) -> Result<(TcpListener, SessionConfig), ServerError> {
        let attempts = self.limits.max_start_attempts;
        for attempt in 1..=attempts {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ServerState::Starting(attempt));

            let config = match SessionConfig::allocate(self.limits) {
                Ok(config) => config,
                Err(err) => {
                    let err = ServerError::PortAllocation(err);
                    warn!(attempt, error = %err, "start attempt failed");
                    continue;
                }
            };
            match TcpListener::bind((Ipv4Addr::LOCALHOST, config.port)).await {
                Ok(listener) => {
                    debug!(attempt, port = config.port, "bound listener");
                    return Ok((listener, config));
                }
                Err(err) => {
                    // The probed port was taken before we could rebind it;
                    // the next attempt gets a fresh port and secret.
                    let err = ServerError::Bind {
                        port: config.port,
                        source: err,
                    };
                    warn!(attempt, error = %err, "start attempt failed");
                }
            }
        }
        Err(ServerError::StartExhausted { attempts })
    }

    async fn accept_loop(&self, listener: TcpListener, config: Arc<SessionConfig>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let config = Arc::clone(&config);
                        let engine = Arc::clone(&self.engine);
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, peer, config, engine, shutdown).await;
                        });
                    }
                    Err(err) => {
                        error!(error = %err, "accept failed");
                    }
                }
            }
        }
    }

    fn set_state(&self, next: ServerState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = next;
    }

    fn finish(&self) {
        self.set_state(ServerState::Stopped);
        let _ = self.session_tx.send(None);
        info!("stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<SessionConfig>,
    engine: Arc<dyn AnalysisEngine>,
    shutdown: CancellationToken,
) {
    let service = service_fn(move |request| {
        handle_request(
            request,
            peer,
            Arc::clone(&config),
            Arc::clone(&engine),
            shutdown.clone(),
        )
    });
    let connection = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service);
    if let Err(err) = connection.await {
        debug!(%peer, error = %err, "connection error");
    }
}

/// One request/response exchange: validate, read, decode, dispatch.
///
/// Every failure is mapped to a status code here; nothing escapes to the
/// accept loop.
async fn handle_request(
    request: Request<Incoming>,
    peer: SocketAddr,
    config: Arc<SessionConfig>,
    engine: Arc<dyn AnalysisEngine>,
    shutdown: CancellationToken,
) -> Result<BodyResponse, Infallible> {
    let deadline = RequestDeadline::new(&shutdown, config.limits.request_timeout);

    let (parts, body) = request.into_parts();
    let content_length = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let kind = match validate(
        peer,
        &parts.method,
        parts.uri.path(),
        &parts.headers,
        content_length,
        &config,
    ) {
        ValidationOutcome::Accepted(kind) => kind,
        ValidationOutcome::Rejected(reason) => {
            warn!(%peer, reason = reason.as_str(), "request rejected");
            return Ok(respond::close(reason.status()));
        }
    };

    // Hard cap on the actual bytes read, independent of the declared
    // Content-Length the validator checked.
    let limited = Limited::new(body, config.limits.max_body_bytes as usize);
    let collected = tokio::select! {
        _ = deadline.cancelled() => {
            return Ok(abandoned(&config, &shutdown, "reading request body"));
        }
        collected = limited.collect() => collected,
    };
    let bytes = match collected {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<http_body_util::LengthLimitError>().is_some() => {
            warn!(%peer, limit = config.limits.max_body_bytes, "request body over limit");
            return Ok(respond::close(StatusCode::PAYLOAD_TOO_LARGE));
        }
        Err(err) => {
            debug!(%peer, error = %err, "failed to read request body");
            return Ok(respond::close(StatusCode::BAD_REQUEST));
        }
    };

    match kind {
        RequestKind::Analyze => {
            let Some(analyze) = codec::decode_analyze(&bytes) else {
                debug!(%peer, "malformed analyze body");
                return Ok(respond::close(StatusCode::BAD_REQUEST));
            };
            let result = tokio::select! {
                _ = deadline.cancelled() => {
                    return Ok(abandoned(&config, &shutdown, "analysis"));
                }
                result = engine.analyze(analyze, deadline.token()) => result,
            };
            match result {
                Ok(issues) => match codec::encode_issues(&issues) {
                    Ok(body) => {
                        debug!(issues = issues.len(), "analysis completed");
                        Ok(respond::send(StatusCode::OK, body))
                    }
                    Err(err) => {
                        error!(error = %err, "failed to encode analysis response");
                        Ok(respond::close(StatusCode::INTERNAL_SERVER_ERROR))
                    }
                },
                Err(EngineError::Cancelled) => Ok(abandoned(&config, &shutdown, "analysis")),
                Err(err) => {
                    error!(error = %err, "analysis failed");
                    Ok(respond::close(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        }
        RequestKind::Cancel => {
            let Some(cancel) = codec::decode_cancel(&bytes) else {
                debug!(%peer, "malformed cancel body");
                return Ok(respond::close(StatusCode::BAD_REQUEST));
            };
            let found = tokio::select! {
                _ = deadline.cancelled() => {
                    return Ok(abandoned(&config, &shutdown, "cancellation"));
                }
                found = engine.cancel(&cancel.analysis_id) => found,
            };
            if found {
                Ok(respond::close(StatusCode::OK))
            } else {
                debug!(analysis_id = %cancel.analysis_id, "cancel target not found");
                Ok(respond::close(StatusCode::NOT_FOUND))
            }
        }
    }
}

/// 408 for a unit of work whose linked cancellation fired.
///
/// On shutdown the write may not reach the peer before the connection
/// drops; the status is best-effort in that case.
fn abandoned(config: &SessionConfig, shutdown: &CancellationToken, stage: &str) -> BodyResponse {
    if shutdown.is_cancelled() {
        info!(stage, "request abandoned on shutdown");
    } else {
        warn!(
            stage,
            timeout_secs = config.limits.request_timeout.as_secs(),
            "request timed out"
        );
    }
    respond::close(StatusCode::REQUEST_TIMEOUT)
}
