//! Deterministic, time-scripted chat surface for tests and dry runs.
//!
//! Each submitted prompt consumes the next [`ReplyScript`]: a timeline of what
//! the counterpart's reply looks like (and whether the typing signal is up)
//! at offsets from the moment of submission. Time is `tokio::time`, so tests
//! running with a paused clock replay exactly.
//!
//! ```no_run
//! use chatprobe::probe::scripted::{ReplyScript, ScriptedSurface};
//! use std::time::Duration;
//!
//! let surface = ScriptedSurface::new()
//!     .with_reply(
//!         ReplyScript::new()
//!             .typing(Duration::ZERO)
//!             .streaming(Duration::from_millis(300), "Hel")
//!             .text(Duration::from_millis(900), "Hello there"),
//!     );
//! ```

use super::surface::{ChatSurface, PromptInput, SurfaceError, TypingSignal};
use crate::types::{Author, Snapshot, SnapshotEntry, SurfaceHandle};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct ReplyStep {
    after: Duration,
    text: String,
    producing: bool,
}

/// Timeline of one reply, relative to the submission instant.
#[derive(Clone, Debug, Default)]
pub struct ReplyScript {
    steps: Vec<ReplyStep>,
    echo_prompt: bool,
    reject_input: bool,
}

impl ReplyScript {
    /// No reply at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// From `after`, the typing signal is up and no text is visible yet.
    pub fn typing(self, after: Duration) -> Self {
        self.step(after, "", true)
    }

    /// From `after`, the reply reads `text` while the typing signal is up.
    pub fn streaming(self, after: Duration, text: &str) -> Self {
        self.step(after, text, true)
    }

    /// From `after`, the reply reads `text` and the typing signal is down.
    pub fn text(self, after: Duration, text: &str) -> Self {
        self.step(after, text, false)
    }

    /// Raw step with an explicit typing flag.
    pub fn step(mut self, after: Duration, text: &str, producing: bool) -> Self {
        self.steps.push(ReplyStep {
            after,
            text: text.to_string(),
            producing,
        });
        self.steps.sort_by_key(|s| s.after);
        self
    }

    /// Render the submitted prompt on the surface (unattributed), like UIs
    /// that do not mark authorship.
    pub fn echo_prompt(mut self) -> Self {
        self.echo_prompt = true;
        self
    }

    /// Make `submit` fail with `InputUnavailable` for this turn.
    pub fn rejecting_input(mut self) -> Self {
        self.reject_input = true;
        self
    }

    fn state_at(&self, elapsed: Duration) -> Option<&ReplyStep> {
        self.steps.iter().rev().find(|s| s.after <= elapsed)
    }
}

struct ActiveReply {
    script: ReplyScript,
    started: Instant,
}

impl ActiveReply {
    fn current(&self) -> Option<&ReplyStep> {
        self.script.state_at(self.started.elapsed())
    }

    fn visible_text(&self) -> Option<&str> {
        self.current()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Default)]
struct Inner {
    history: Vec<(Author, String)>,
    scripts: VecDeque<ReplyScript>,
    active: Option<ActiveReply>,
    submitted: Vec<String>,
}

impl Inner {
    /// Settle the previous reply into history at whatever it shows right now.
    fn freeze_active(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(text) = active.visible_text() {
                self.history.push((Author::Assistant, text.to_string()));
            }
        }
    }
}

/// In-memory [`ChatSurface`] + [`TypingSignal`] + [`PromptInput`].
#[derive(Default)]
pub struct ScriptedSurface {
    inner: Mutex<Inner>,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages already on the surface before the first prompt.
    pub fn with_history(self, history: Vec<(Author, String)>) -> Self {
        self.lock().history = history;
        self
    }

    /// Queue the reply for the next submitted prompt.
    pub fn with_reply(self, script: ReplyScript) -> Self {
        self.lock().scripts.push_back(script);
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.lock().submitted.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ChatSurface for ScriptedSurface {
    async fn take_snapshot(&self) -> Result<Snapshot, SurfaceError> {
        let inner = self.lock();
        let mut entries: Vec<SnapshotEntry> = inner
            .history
            .iter()
            .enumerate()
            .map(|(i, (author, text))| SnapshotEntry {
                text: text.clone(),
                author: *author,
                handle: SurfaceHandle::new(i.to_string()),
            })
            .collect();
        if let Some(text) = inner.active.as_ref().and_then(|a| a.visible_text()) {
            entries.push(SnapshotEntry {
                text: text.to_string(),
                author: Author::Assistant,
                handle: SurfaceHandle::new(inner.history.len().to_string()),
            });
        }
        Ok(Snapshot::new(entries))
    }

    async fn read_text(&self, handle: &SurfaceHandle) -> Result<Option<String>, SurfaceError> {
        let inner = self.lock();
        let Ok(idx) = handle.as_str().parse::<usize>() else {
            return Ok(None);
        };
        if let Some((_, text)) = inner.history.get(idx) {
            return Ok(Some(text.clone()));
        }
        if idx == inner.history.len() {
            return Ok(inner
                .active
                .as_ref()
                .and_then(|a| a.visible_text())
                .map(str::to_string));
        }
        Ok(None)
    }
}

#[async_trait]
impl TypingSignal for ScriptedSurface {
    async fn is_producing(&self) -> Result<bool, SurfaceError> {
        let inner = self.lock();
        Ok(inner
            .active
            .as_ref()
            .and_then(|a| a.current())
            .map(|s| s.producing)
            .unwrap_or(false))
    }
}

#[async_trait]
impl PromptInput for ScriptedSurface {
    async fn submit(&self, prompt: &str) -> Result<(), SurfaceError> {
        let mut inner = self.lock();
        inner.freeze_active();
        let script = inner.scripts.pop_front().unwrap_or_default();
        if script.reject_input {
            return Err(SurfaceError::InputUnavailable(
                "scripted input rejected".to_string(),
            ));
        }
        inner.submitted.push(prompt.to_string());
        if script.echo_prompt {
            inner.history.push((Author::Unknown, prompt.to_string()));
        }
        inner.active = Some(ActiveReply {
            script,
            started: Instant::now(),
        });
        Ok(())
    }
}
