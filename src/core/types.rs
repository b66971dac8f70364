use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder reply recorded when a turn produced nothing usable.
pub const NO_RESPONSE_SENTINEL: &str = "No response captured";

// ───────────────────────────────────────────────────────────────────────────
// Surface model
// ───────────────────────────────────────────────────────────────────────────

/// Opaque reference to one element on the chat surface.
///
/// The browser adapter tags elements with a `data-chatprobe-id` attribute and
/// hands the id back here; scripted surfaces use their own numbering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceHandle(pub String);

impl SurfaceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Best-effort guess at who wrote a message. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub text: String,
    #[serde(default)]
    pub author: Author,
    pub handle: SurfaceHandle,
}

/// Everything visible on the surface at one instant, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.text.as_str())
    }
}

/// A located reply whose text may still be changing. Its live text is pulled
/// through the surface by handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateReply {
    pub handle: SurfaceHandle,
    pub text_at_discovery: String,
}

// ───────────────────────────────────────────────────────────────────────────
// Verdicts & records
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Stabilized,
    Timeout,
    NotFound,
}

/// Outcome of one turn's completion detection. Produced exactly once per turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionVerdict {
    pub text: String,
    pub resolved: bool,
    pub reason: VerdictReason,
}

impl CompletionVerdict {
    pub fn stabilized(text: String) -> Self {
        Self {
            text,
            resolved: true,
            reason: VerdictReason::Stabilized,
        }
    }

    pub fn timed_out(text: String) -> Self {
        Self {
            text,
            resolved: false,
            reason: VerdictReason::Timeout,
        }
    }

    pub fn not_found() -> Self {
        Self {
            text: String::new(),
            resolved: false,
            reason: VerdictReason::NotFound,
        }
    }
}

/// Why a turn record holds what it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnReason {
    Stabilized,
    CompletionTimeout,
    AppearanceTimeout,
    InputUnavailable,
    Cancelled,
}

impl From<VerdictReason> for TurnReason {
    fn from(reason: VerdictReason) -> Self {
        match reason {
            VerdictReason::Stabilized => TurnReason::Stabilized,
            VerdictReason::Timeout => TurnReason::CompletionTimeout,
            VerdictReason::NotFound => TurnReason::AppearanceTimeout,
        }
    }
}

/// One entry of the run log. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Zero-based position of the prompt in the submitted sequence.
    pub prompt_index: usize,
    pub prompt_text: String,
    pub reply_text: String,
    pub captured_length: usize,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub reason: TurnReason,
}

impl TurnRecord {
    pub fn from_verdict(prompt_index: usize, prompt_text: &str, verdict: CompletionVerdict) -> Self {
        let reason = TurnReason::from(verdict.reason);
        if verdict.text.is_empty() {
            return Self::degraded(prompt_index, prompt_text, reason);
        }
        Self {
            prompt_index,
            prompt_text: prompt_text.to_string(),
            captured_length: verdict.text.chars().count(),
            reply_text: verdict.text,
            timestamp: now_rfc3339(),
            reason,
        }
    }

    /// Sentinel reply, zero length.
    pub fn degraded(prompt_index: usize, prompt_text: &str, reason: TurnReason) -> Self {
        Self {
            prompt_index,
            prompt_text: prompt_text.to_string(),
            reply_text: NO_RESPONSE_SENTINEL.to_string(),
            captured_length: 0,
            timestamp: now_rfc3339(),
            reason,
        }
    }

    pub fn is_captured(&self) -> bool {
        self.captured_length > 0
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Result of one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: uuid::Uuid,
    pub started_at: String,
    pub finished_at: String,
    pub records: Vec<TurnRecord>,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn captured_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_captured()).count()
    }
}

// ───────────────────────────────────────────────────────────────────────────
// HTTP request / response types
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub prompts: Option<Vec<String>>,
    /// Overrides the configured chat URL for this run only.
    #[serde(default)]
    pub chat_url: Option<String>,
}

/// What a run hands back to its trigger (HTTP caller or CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<crate::features::relay::AnalysisSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub prompt_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioListResponse {
    pub scenarios: Vec<ScenarioInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_verdict_text_degrades_to_sentinel() {
        let rec = TurnRecord::from_verdict(2, "ping", CompletionVerdict::timed_out(String::new()));
        assert_eq!(rec.reply_text, NO_RESPONSE_SENTINEL);
        assert_eq!(rec.captured_length, 0);
        assert_eq!(rec.reason, TurnReason::CompletionTimeout);
        assert_eq!(rec.prompt_index, 2);
    }

    #[test]
    fn captured_length_counts_chars_not_bytes() {
        let rec = TurnRecord::from_verdict(0, "hi", CompletionVerdict::stabilized("привіт".into()));
        assert_eq!(rec.captured_length, 6);
        assert!(rec.is_captured());
    }

    #[test]
    fn reasons_serialize_snake_case() {
        let v = serde_json::to_value(TurnReason::AppearanceTimeout).unwrap();
        assert_eq!(v, serde_json::json!("appearance_timeout"));
        let v = serde_json::to_value(VerdictReason::NotFound).unwrap();
        assert_eq!(v, serde_json::json!("not_found"));
    }
}
