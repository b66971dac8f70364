use super::surface_scripts as scripts;
use crate::core::config::Selectors;
use crate::probe::{ChatSurface, PromptInput, SurfaceError, TypingSignal};
use crate::types::{Snapshot, SnapshotEntry, SurfaceHandle};
use async_trait::async_trait;
use chromiumoxide::Page;
use rand::distr::{Distribution, Uniform};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Characters written per input event while typing a prompt.
const TYPE_CHUNK_CHARS: usize = 3;

/// A live chat page driven over CDP. Implements every surface capability the
/// probe core needs.
pub struct ChatPage {
    page: Page,
    selectors: Selectors,
    cancel: CancellationToken,
}

impl ChatPage {
    pub fn new(page: Page, selectors: Selectors, cancel: CancellationToken) -> Self {
        Self {
            page,
            selectors,
            cancel,
        }
    }

    async fn typing_pause(&self, dur: Duration) -> Result<(), SurfaceError> {
        crate::probe::pause(&self.cancel, dur)
            .await
            .map_err(|_| SurfaceError::Cancelled)
    }

    async fn eval<T: DeserializeOwned>(&self, js: String) -> Result<T, SurfaceError> {
        self.page
            .evaluate(js)
            .await
            .map_err(|e| SurfaceError::Script(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| SurfaceError::Script(format!("unexpected script result: {}", e)))
    }

    /// Evaluate a script that returns `JSON.stringify(...)` and decode it.
    async fn eval_json<T: DeserializeOwned>(&self, js: String) -> Result<T, SurfaceError> {
        let raw: String = self.eval(js).await?;
        serde_json::from_str(&raw)
            .map_err(|e| SurfaceError::Script(format!("malformed script payload: {}", e)))
    }
}

#[async_trait]
impl ChatSurface for ChatPage {
    async fn take_snapshot(&self) -> Result<Snapshot, SurfaceError> {
        let entries: Vec<SnapshotEntry> =
            self.eval_json(scripts::snapshot(&self.selectors)).await?;
        Ok(Snapshot::new(entries))
    }

    async fn read_text(&self, handle: &SurfaceHandle) -> Result<Option<String>, SurfaceError> {
        self.eval_json(scripts::read_text(handle)).await
    }
}

#[async_trait]
impl TypingSignal for ChatPage {
    async fn is_producing(&self) -> Result<bool, SurfaceError> {
        self.eval(scripts::is_producing(&self.selectors)).await
    }
}

#[async_trait]
impl PromptInput for ChatPage {
    async fn submit(&self, prompt: &str) -> Result<(), SurfaceError> {
        let found: bool = self.eval(scripts::find_input(&self.selectors)).await?;
        if !found {
            return Err(SurfaceError::InputUnavailable(
                "no chat textarea on the page".to_string(),
            ));
        }

        let chunks = chunk_chars(prompt, TYPE_CHUNK_CHARS);
        let pauses: Vec<u64> = {
            let mut rng = rand::rng();
            let dist = Uniform::new(8u64, 25).map_err(|e| SurfaceError::Script(e.to_string()))?;
            chunks.iter().map(|_| dist.sample(&mut rng)).collect()
        };

        let cleared: bool = self.eval(scripts::write_input("", true)).await?;
        if !cleared {
            return Err(SurfaceError::InputUnavailable(
                "chat input detached before typing".to_string(),
            ));
        }
        for (chunk, pause_ms) in chunks.iter().zip(pauses) {
            let ok: bool = self.eval(scripts::write_input(chunk, false)).await?;
            if !ok {
                return Err(SurfaceError::InputUnavailable(
                    "chat input detached while typing".to_string(),
                ));
            }
            self.typing_pause(Duration::from_millis(pause_ms)).await?;
        }

        // Let the UI enable its send button.
        self.typing_pause(Duration::from_millis(500)).await?;

        let how: String = self.eval(scripts::send(&self.selectors)).await?;
        match how.as_str() {
            "missing" => Err(SurfaceError::InputUnavailable(
                "chat input vanished before send".to_string(),
            )),
            other => {
                debug!("prompt sent via {}", other);
                info!("✅ Sent: {}", prompt.chars().take(60).collect::<String>());
                Ok(())
            }
        }
    }
}

fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|c| c.iter().collect())
        .collect()
}
