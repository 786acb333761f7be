//! Loopback-only HTTP bridge to a Roslyn analysis engine.
//!
//! This library accepts analysis and cancellation requests from a
//! co-located orchestrating process, authenticates them with a per-session
//! secret, bounds their execution time, and forwards validated work to an
//! external analysis engine.
//!
//! # Architecture
//!
//! - **[`server::LocalAnalysisServer`]**: binds a freshly allocated
//!   loopback port (retrying with a new port *and* secret on failure),
//!   publishes the `(port, secret)` pair through a watch channel, and fans
//!   each accepted connection out to its own task.
//!
//! - **[`engine::AnalysisEngine`]**: the seam to the external engine. The
//!   server hands it decoded requests and a cancellation token linked to
//!   both the request deadline and server shutdown.
//!
//! - **`validate`**, **`codec`**, **`respond`** modules: pure request
//!   validation (loopback, then token, then route, then size), null-on-
//!   malformed body decoding, and response construction.
//!
//! # HTTP surface
//!
//! - `POST /analyze`, header `X-Auth-Token: <secret>`, body
//!   `{"fileUris": [...], "activeRules": [...], ...}` →
//!   `200 {"roslynIssues": [...]}`
//! - `POST /cancel`, same header, body `{"analysisId": "..."}` →
//!   `200` or `404`
//!
//! Rejections: `403` non-loopback peer, `401` bad token, `400` unknown
//! route or malformed body, `413` oversized body, `408` deadline elapsed,
//! `500` engine or encoding failure.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod respond;
pub mod server;
pub mod token;
pub mod validate;

pub use codec::{AnalyzeRequest, CancelRequest, RoslynIssue};
pub use config::{SessionConfig, SessionLimits};
pub use engine::{AnalysisEngine, NullEngine};
pub use error::{EngineError, ServerError};
pub use server::{LocalAnalysisServer, ServerState, SessionHandle};
pub use token::SecretToken;
pub use validate::{validate, RejectReason, RequestKind, ValidationOutcome};
