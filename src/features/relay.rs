//! Transcript relay: delivers a finished run to the external analysis service
//! and brings its summary back.
//!
//! Wire format (what the analysis service expects):
//!
//! ```json
//! { "results": [{"question", "answer", "timestamp", "responseLength", "questionNumber"}],
//!   "timestamp": "...", "total_questions": N, "save_only_csv": true }
//! ```

use crate::core::config::RelaySettings;
use crate::types::{now_rfc3339, TurnRecord};
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("analysis service unreachable: {0}")]
    Transport(String),

    #[error("analysis service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("analysis service response not understood: {0}")]
    Decode(String),

    #[error("relay cancelled")]
    Cancelled,
}

/// One turn as the analysis service names things.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: String,
    pub response_length: usize,
    pub question_number: usize,
}

impl From<&TurnRecord> for RelayTurn {
    fn from(r: &TurnRecord) -> Self {
        Self {
            question: r.prompt_text.clone(),
            answer: r.reply_text.clone(),
            timestamp: r.timestamp.clone(),
            response_length: r.captured_length,
            question_number: r.prompt_index + 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPayload {
    pub results: Vec<RelayTurn>,
    pub timestamp: String,
    pub total_questions: usize,
    pub save_only_csv: bool,
}

impl RelayPayload {
    pub fn from_records(records: &[TurnRecord]) -> Self {
        Self {
            results: records.iter().map(RelayTurn::from).collect(),
            timestamp: now_rfc3339(),
            total_questions: records.len(),
            save_only_csv: true,
        }
    }
}

/// What the analysis service reports back. Every field is optional: the
/// service owns this shape and we only display it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSummary {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_questions: Option<u64>,
    #[serde(default)]
    pub ai_responses: Option<u64>,
    #[serde(default)]
    pub average_user_sentiment: Option<f64>,
    #[serde(default)]
    pub average_ai_sentiment: Option<f64>,
    #[serde(default)]
    pub average_sentiment_gap: Option<f64>,
    #[serde(default)]
    pub csv_file: Option<String>,
    #[serde(default)]
    pub chart_file: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AnalysisSummary {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    /// Human-readable pass/fail summary, one fact per line.
    pub fn render_lines(&self) -> Vec<String> {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_else(|| "n/a".to_string())
        }
        let mut lines = vec![
            format!(
                "Analysis: {}",
                if self.is_success() { "passed" } else { "failed" }
            ),
            format!("Questions: {}", opt(&self.total_questions)),
            format!("AI responses: {}", opt(&self.ai_responses)),
            format!("Average sentiment (human): {}", opt(&self.average_user_sentiment)),
            format!("Average sentiment (AI): {}", opt(&self.average_ai_sentiment)),
            format!("Average sentiment gap: {}", opt(&self.average_sentiment_gap)),
        ];
        if let Some(csv) = &self.csv_file {
            lines.push(format!("CSV: {}", csv));
        }
        if let Some(chart) = &self.chart_file {
            lines.push(format!("Chart: {}", chart));
        }
        if let Some(msg) = self.message.as_ref().filter(|_| !self.is_success()) {
            lines.push(format!("Message: {}", msg));
        }
        lines
    }
}

/// HTTP client for the analysis service.
#[derive(Clone, Debug)]
pub struct AnalysisRelay {
    client: reqwest::Client,
    analyze_url: String,
    health_url: String,
    max_retry: Duration,
}

impl AnalysisRelay {
    pub fn new(
        client: reqwest::Client,
        analyze_url: impl Into<String>,
        health_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            analyze_url: analyze_url.into(),
            health_url: health_url.into(),
            max_retry: Duration::from_secs(20),
        }
    }

    /// `None` when the relay is disabled in config.
    pub fn from_settings(client: reqwest::Client, settings: &RelaySettings) -> Option<Self> {
        if !settings.resolve_enabled() {
            return None;
        }
        Some(
            Self::new(
                client,
                settings.resolve_analyze_url(),
                settings.resolve_health_url(),
            )
            .with_max_retry(settings.resolve_max_retry()),
        )
    }

    pub fn with_max_retry(mut self, max_retry: Duration) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn analyze_url(&self) -> &str {
        &self.analyze_url
    }

    /// `true` iff the health endpoint answers 2xx.
    pub async fn health(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("relay health check failed ({}): {}", self.health_url, e);
                false
            }
        }
    }

    /// POST the transcript; transport errors and 5xx are retried with
    /// exponential backoff, 4xx and undecodable bodies are not. `cancel`
    /// aborts the request and any pending retry.
    pub async fn submit(
        &self,
        records: &[TurnRecord],
        cancel: &CancellationToken,
    ) -> Result<AnalysisSummary, RelayError> {
        let payload = RelayPayload::from_records(records);
        info!(
            "📤 Relaying {} turns to {}",
            payload.total_questions, self.analyze_url
        );

        let delivery = retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(250))
                .with_max_interval(Duration::from_secs(4))
                .with_max_elapsed_time(Some(self.max_retry))
                .build(),
            || async { self.post_once(&payload).await },
        );
        let summary = tokio::select! {
            () = cancel.cancelled() => {
                warn!("Relay to {} cancelled", self.analyze_url);
                return Err(RelayError::Cancelled);
            }
            res = delivery => res?,
        };

        if summary.is_success() {
            info!("✅ Analysis service accepted the transcript");
        } else {
            warn!(
                "Analysis service answered without success: {}",
                summary.message.as_deref().unwrap_or("no message")
            );
        }
        Ok(summary)
    }

    async fn post_once(
        &self,
        payload: &RelayPayload,
    ) -> Result<AnalysisSummary, backoff::Error<RelayError>> {
        let resp = self
            .client
            .post(&self.analyze_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(RelayError::Transport(e.to_string())))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = RelayError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            };
            return Err(if status.is_server_error() {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        resp.json::<AnalysisSummary>()
            .await
            .map_err(|e| backoff::Error::permanent(RelayError::Decode(e.to_string())))
    }
}
