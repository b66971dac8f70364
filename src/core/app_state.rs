use std::env;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,

    /// File-based config loaded from `chatprobe.json` (env-var fallback for all fields).
    pub config: Arc<crate::core::config::ProbeConfig>,

    // One browser-driven run at a time: a chat surface has a single conversation.
    pub run_lock: Arc<tokio::sync::Mutex<()>>,

    // Cancellation handle of the run currently holding `run_lock`.
    active_run: Arc<Mutex<Option<CancellationToken>>>,

    /// Fired once on process shutdown; every run token is a child of it.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("scenarios", &self.config.scenarios.len())
            .field("run_active", &self.run_active())
            .finish()
    }
}

impl AppState {
    pub fn new(http_client: reqwest::Client, config: crate::core::config::ProbeConfig) -> Self {
        Self {
            http_client,
            config: Arc::new(config),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
            active_run: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Client with `HTTP_TIMEOUT_SECS` / `HTTP_CONNECT_TIMEOUT_SECS` applied.
    pub fn build_http_client() -> anyhow::Result<reqwest::Client> {
        let http_timeout = env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let connect_timeout = env::var("HTTP_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        Ok(reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(http_timeout))
            .connect_timeout(std::time::Duration::from_secs(connect_timeout))
            .build()?)
    }

    /// Register a fresh run token (child of the shutdown token) and return it.
    pub fn begin_run(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        *self.slot() = Some(token.clone());
        token
    }

    pub fn end_run(&self) {
        self.slot().take();
    }

    /// Cancel the active run, if any. Returns whether one was running.
    pub fn cancel_active_run(&self) -> bool {
        match self.slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn run_active(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active_run.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_the_registered_run() {
        let state = AppState::new(reqwest::Client::new(), Default::default());
        assert!(!state.cancel_active_run());

        let token = state.begin_run();
        assert!(state.run_active());
        assert!(state.cancel_active_run());
        assert!(token.is_cancelled());

        state.end_run();
        assert!(!state.run_active());
    }

    #[test]
    fn shutdown_cancels_run_tokens() {
        let state = AppState::new(reqwest::Client::new(), Default::default());
        let token = state.begin_run();
        state.shutdown.cancel();
        assert!(token.is_cancelled());
    }
}
