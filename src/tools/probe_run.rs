use crate::features::{AnalysisRelay, TranscriptStore};
use crate::probe::TurnOrchestrator;
use crate::scraping::{BrowserSession, ChatPage};
use crate::types::{RunOutcome, RunReport, RunRequest};
use crate::AppState;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Reasons a run is refused or cannot be set up. Anything that goes wrong
/// once turns are underway becomes a degraded turn record instead.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("no prompts to send")]
    EmptyPrompts,

    #[error("a probe run is already in progress")]
    Busy,

    #[error("analysis service is not healthy ({0}); refusing to start")]
    RelayUnavailable(String),

    #[error("invalid chat URL: {0}")]
    InvalidChatUrl(String),

    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("browser error: {0}")]
    Browser(String),
}

/// Prompts for a request: an explicit list wins over a scenario name.
pub fn resolve_prompts(
    config: &crate::core::config::ProbeConfig,
    request: &RunRequest,
) -> Result<Vec<String>, ProbeError> {
    let prompts: Vec<String> = match (&request.prompts, &request.scenario) {
        (Some(list), _) => list.clone(),
        (None, Some(name)) => config
            .scenario(name)
            .ok_or_else(|| ProbeError::UnknownScenario(name.clone()))?
            .to_vec(),
        (None, None) => return Err(ProbeError::EmptyPrompts),
    };

    let prompts: Vec<String> = prompts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if prompts.is_empty() {
        return Err(ProbeError::EmptyPrompts);
    }
    Ok(prompts)
}

/// Request override → configured chat URL; must be absolute http(s).
pub fn resolve_chat_url(
    config: &crate::core::config::ProbeConfig,
    request: &RunRequest,
) -> Result<String, ProbeError> {
    let raw = request
        .chat_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| config.resolve_chat_url())
        .ok_or_else(|| {
            ProbeError::InvalidChatUrl(
                "no chat URL given; set chat_url in chatprobe.json or CHATPROBE_CHAT_URL".into(),
            )
        })?;

    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| ProbeError::InvalidChatUrl(format!("{}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(ProbeError::InvalidChatUrl(format!(
            "{}: unsupported scheme '{}'",
            raw, other
        ))),
    }
}

/// Clears the active-run slot however the run ends.
struct ActiveRun<'a>(&'a AppState);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.0.end_run();
    }
}

/// Execute one probe run end to end: validate, drive the chat page, store the
/// transcript, relay it for analysis.
pub async fn execute_probe_run(
    state: &AppState,
    request: RunRequest,
) -> Result<RunReport, ProbeError> {
    let config = state.config.clone();
    let prompts = resolve_prompts(&config, &request)?;
    let chat_url = resolve_chat_url(&config, &request)?;

    let _serial_guard = state.run_lock.try_lock().map_err(|_| ProbeError::Busy)?;

    let relay = AnalysisRelay::from_settings(state.http_client.clone(), &config.relay);
    if let Some(relay) = relay.as_ref() {
        if config.relay.resolve_require_healthy() && !relay.health().await {
            return Err(ProbeError::RelayUnavailable(
                config.relay.resolve_health_url(),
            ));
        }
    }

    if config.browser.resolve_executable().is_none() {
        return Err(ProbeError::BrowserUnavailable(
            "install Chrome, Chromium or Brave, or set CHROME_EXECUTABLE".into(),
        ));
    }

    let cancel = state.begin_run();
    let _active = ActiveRun(state);

    info!(
        "🧪 Probe run: {} prompts against {}{}",
        prompts.len(),
        chat_url,
        request
            .scenario
            .as_deref()
            .map(|s| format!(" (scenario '{}')", s))
            .unwrap_or_default()
    );

    let outcome = drive_browser(&config, &chat_url, &prompts, cancel.clone()).await?;
    Ok(finish_run(&config, relay.as_ref(), request.scenario, outcome, &cancel).await)
}

async fn drive_browser(
    config: &crate::core::config::ProbeConfig,
    chat_url: &str,
    prompts: &[String],
    cancel: CancellationToken,
) -> Result<RunOutcome, ProbeError> {
    let mut session = BrowserSession::launch(&config.browser)
        .await
        .map_err(|e| ProbeError::Browser(e.to_string()))?;

    let page = match session
        .open(chat_url, config.browser.resolve_page_settle_timeout(), &cancel)
        .await
    {
        Ok(page) => page,
        Err(e) => {
            session.close().await;
            return Err(ProbeError::Browser(e.to_string()));
        }
    };

    let chat = ChatPage::new(page, config.selectors.resolve(), cancel.clone());
    let outcome = TurnOrchestrator::new(&chat, &chat, &chat, config.timing.resolve(), cancel)
        .run(prompts)
        .await;

    session.close().await;
    Ok(outcome)
}

/// Persist the transcript, then hand it to the analysis service. Neither step
/// can fail the run: errors are logged and surfaced on the report. Cancelled
/// runs are stored but not relayed.
pub async fn finish_run(
    config: &crate::core::config::ProbeConfig,
    relay: Option<&AnalysisRelay>,
    scenario: Option<String>,
    outcome: RunOutcome,
    cancel: &CancellationToken,
) -> RunReport {
    let transcript_path = match config.transcripts.resolve_dir() {
        Some(dir) => match TranscriptStore::new(dir).save(&outcome).await {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!("Transcript not saved: {:#}", e);
                None
            }
        },
        None => {
            warn!("Transcript not saved: no home directory and CHATPROBE_TRANSCRIPT_DIR unset");
            None
        }
    };

    let (summary, relay_error) = match relay {
        Some(_) if outcome.cancelled => {
            info!("Run {} was cancelled; transcript kept, not relayed", outcome.run_id);
            (None, None)
        }
        Some(relay) if !outcome.records.is_empty() => match relay
            .submit(&outcome.records, cancel)
            .await
        {
            Ok(summary) => (Some(summary), None),
            Err(e) => {
                warn!("Relay failed: {}", e);
                (None, Some(e.to_string()))
            }
        },
        _ => (None, None),
    };

    info!(
        "🏁 Run {} finished: {}/{} replies captured{}",
        outcome.run_id,
        outcome.captured_count(),
        outcome.records.len(),
        if outcome.cancelled { " (cancelled)" } else { "" }
    );

    RunReport {
        scenario,
        outcome,
        summary,
        relay_error,
        transcript_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ProbeConfig, TranscriptSettings};
    use crate::types::{CompletionVerdict, TurnReason, TurnRecord};

    fn config_with_scenario() -> ProbeConfig {
        let mut cfg = ProbeConfig {
            chat_url: Some("https://chat.example.com/c/new".into()),
            ..Default::default()
        };
        cfg.scenarios.insert(
            "greeting".into(),
            vec!["hello".into(), "  ".into(), "how are you?".into()],
        );
        cfg
    }

    #[test]
    fn scenario_prompts_drop_blank_entries() {
        let req = RunRequest {
            scenario: Some("greeting".into()),
            ..Default::default()
        };
        let prompts = resolve_prompts(&config_with_scenario(), &req).unwrap();
        assert_eq!(prompts, vec!["hello".to_string(), "how are you?".to_string()]);
    }

    #[test]
    fn explicit_prompts_win_over_scenario() {
        let req = RunRequest {
            scenario: Some("greeting".into()),
            prompts: Some(vec!["only this".into()]),
            ..Default::default()
        };
        let prompts = resolve_prompts(&config_with_scenario(), &req).unwrap();
        assert_eq!(prompts, vec!["only this".to_string()]);
    }

    #[test]
    fn refusals_are_typed() {
        let cfg = config_with_scenario();
        let unknown = RunRequest {
            scenario: Some("nope".into()),
            ..Default::default()
        };
        assert!(matches!(
            resolve_prompts(&cfg, &unknown),
            Err(ProbeError::UnknownScenario(name)) if name == "nope"
        ));
        let empty = RunRequest {
            prompts: Some(vec![" ".into()]),
            ..Default::default()
        };
        assert!(matches!(resolve_prompts(&cfg, &empty), Err(ProbeError::EmptyPrompts)));
        assert!(matches!(
            resolve_prompts(&cfg, &RunRequest::default()),
            Err(ProbeError::EmptyPrompts)
        ));
    }

    #[test]
    fn chat_url_must_be_http() {
        let cfg = config_with_scenario();
        assert_eq!(
            resolve_chat_url(&cfg, &RunRequest::default()).unwrap(),
            "https://chat.example.com/c/new"
        );
        let bad = RunRequest {
            chat_url: Some("file:///etc/passwd".into()),
            ..Default::default()
        };
        assert!(matches!(resolve_chat_url(&cfg, &bad), Err(ProbeError::InvalidChatUrl(_))));
        let garbage = RunRequest {
            chat_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(matches!(resolve_chat_url(&cfg, &garbage), Err(ProbeError::InvalidChatUrl(_))));
    }

    #[tokio::test]
    async fn finish_run_stores_transcript_without_relay() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ProbeConfig {
            transcripts: TranscriptSettings {
                dir: Some(tmp.path().display().to_string()),
            },
            ..Default::default()
        };
        let outcome = RunOutcome {
            run_id: uuid::Uuid::new_v4(),
            started_at: "2026-01-02T03:04:05.000Z".into(),
            finished_at: "2026-01-02T03:05:05.000Z".into(),
            records: vec![TurnRecord::from_verdict(
                0,
                "hello",
                CompletionVerdict::stabilized("Hello! How can I help?".into()),
            )],
            cancelled: false,
        };

        let report = finish_run(
            &cfg,
            None,
            Some("greeting".into()),
            outcome,
            &CancellationToken::new(),
        )
        .await;
        assert!(report.summary.is_none());
        assert!(report.relay_error.is_none());
        let path = report.transcript_path.expect("transcript path");
        assert!(std::path::Path::new(&path).exists());
        assert_eq!(report.outcome.captured_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_is_stored_but_not_relayed() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = ProbeConfig {
            transcripts: TranscriptSettings {
                dir: Some(tmp.path().display().to_string()),
            },
            ..Default::default()
        };
        // Nothing listens here; a relay attempt would surface as relay_error.
        let relay = AnalysisRelay::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/analyze",
            "http://127.0.0.1:9/health",
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = RunOutcome {
            run_id: uuid::Uuid::new_v4(),
            started_at: "2026-01-02T03:04:05.000Z".into(),
            finished_at: "2026-01-02T03:04:09.000Z".into(),
            records: vec![TurnRecord::degraded(0, "hello", TurnReason::Cancelled)],
            cancelled: true,
        };

        let report = finish_run(&cfg, Some(&relay), None, outcome, &cancel).await;

        assert!(report.summary.is_none());
        assert!(report.relay_error.is_none());
        assert!(report.transcript_path.is_some());
    }
}
