//! Contract with the external analysis engine.
//!
//! The engine inspects source files and produces issues; this crate only
//! validates, bounds, and relays requests to it. The id-to-analysis mapping
//! that `cancel` consults lives inside the engine, not here.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::codec::{AnalyzeRequest, RoslynIssue};
use crate::error::EngineError;

/// The analysis engine behind the HTTP surface.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Run an analysis. `cancel` fires when the request deadline elapses or
    /// the server shuts down; a cooperative engine abandons work and
    /// returns [`EngineError::Cancelled`].
    async fn analyze(
        &self,
        request: AnalyzeRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<RoslynIssue>, EngineError>;

    /// Cancel a previously dispatched analysis. Returns `false` when the id
    /// is unknown or the analysis already finished.
    async fn cancel(&self, analysis_id: &str) -> bool;
}

/// Stand-in engine that produces no issues and knows no analysis ids.
///
/// Used by the standalone binary and by protocol-level tests to exercise
/// the HTTP surface without a real engine.
pub struct NullEngine;

#[async_trait]
impl AnalysisEngine for NullEngine {
    async fn analyze(
        &self,
        _request: AnalyzeRequest,
        _cancel: CancellationToken,
    ) -> Result<Vec<RoslynIssue>, EngineError> {
        Ok(Vec::new())
    }

    async fn cancel(&self, _analysis_id: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_engine_returns_no_issues() {
        let engine = NullEngine;
        let request = crate::codec::decode_analyze(
            br#"{"fileUris": ["file:///a.cs"], "activeRules": ["cpp:S100"]}"#,
        )
        .expect("valid body");
        let issues = engine
            .analyze(request, CancellationToken::new())
            .await
            .expect("analyze");
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn null_engine_knows_no_ids() {
        let engine = NullEngine;
        assert!(!engine.cancel("anything").await);
    }
}
