//! Capabilities the probe core consumes from a chat surface adapter.
//!
//! The core never knows *how* a surface is read. The browser adapter in
//! `scraping::chat_page` implements these against a live CDP page; tests use
//! `probe::scripted::ScriptedSurface`.

use crate::types::{Snapshot, SurfaceHandle};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("input control unavailable: {0}")]
    InputUnavailable(String),

    #[error("surface script failed: {0}")]
    Script(String),

    /// The run was cancelled while the adapter was waiting.
    #[error("interrupted by cancellation")]
    Cancelled,
}

/// Read access to the rendered conversation.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    async fn take_snapshot(&self) -> Result<Snapshot, SurfaceError>;

    /// Current text of one element, `None` if the element is gone.
    async fn read_text(&self, handle: &SurfaceHandle) -> Result<Option<String>, SurfaceError>;
}

/// "Is the counterpart producing output right now?"
#[async_trait]
pub trait TypingSignal: Send + Sync {
    async fn is_producing(&self) -> Result<bool, SurfaceError>;
}

/// Fire-and-forget prompt submission.
#[async_trait]
pub trait PromptInput: Send + Sync {
    async fn submit(&self, prompt: &str) -> Result<(), SurfaceError>;
}
