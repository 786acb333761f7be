//! Request and response body encoding.
//!
//! Decoding returns `None` for anything malformed; the caller maps that to
//! a 400 without distinguishing bad JSON from a structurally invalid
//! request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An analysis request from the trusted peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Documents to analyze. Must be non-empty.
    pub file_uris: Vec<String>,
    /// Rule keys active for this analysis. Must be non-empty.
    pub active_rules: Vec<String>,
    /// Engine-specific options, relayed without interpretation.
    #[serde(flatten)]
    pub options: serde_json::Map<String, Value>,
}

/// A request to cancel a previously dispatched analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub analysis_id: String,
}

/// An issue produced by the analysis engine, relayed verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct RoslynIssue(pub Value);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse<'a> {
    roslyn_issues: &'a [RoslynIssue],
}

/// Decode an analyze body. `None` on malformed JSON/schema and on an empty
/// `fileUris` or `activeRules` collection.
pub fn decode_analyze(body: &[u8]) -> Option<AnalyzeRequest> {
    let request: AnalyzeRequest = serde_json::from_slice(body).ok()?;
    if request.file_uris.is_empty() || request.active_rules.is_empty() {
        return None;
    }
    Some(request)
}

/// Decode a cancel body. `None` on malformed JSON or a missing
/// `analysisId`.
pub fn decode_cancel(body: &[u8]) -> Option<CancelRequest> {
    serde_json::from_slice(body).ok()
}

/// Encode the issue list into the `{"roslynIssues": [...]}` envelope.
///
/// Failure here means a non-serializable domain object, which is an
/// internal bug surfaced to the client as a 500 for that request.
pub fn encode_issues(issues: &[RoslynIssue]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&AnalysisResponse {
        roslyn_issues: issues,
    })
}
