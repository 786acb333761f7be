//! Error types for the analysis bridge.
//!
//! Engine failures are surfaced to the client as status codes; server start
//! failures are logged and never propagate past `LocalAnalysisServer::run`.

use thiserror::Error;

/// Failure reported by the external analysis engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine observed the cancellation signal and abandoned the run.
    #[error("analysis was cancelled")]
    Cancelled,

    #[error("engine failure: {0}")]
    Failed(String),
}

/// Failures in the server start path.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to allocate a session port: {0}")]
    PortAllocation(#[from] std::io::Error),

    #[error("failed to bind 127.0.0.1:{port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("no listener after {attempts} start attempts")]
    StartExhausted { attempts: u32 },
}
