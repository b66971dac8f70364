//! Response-completion probe: locate the reply to a submitted prompt on a
//! streaming chat surface and decide when it has stopped changing.

pub mod detector;
pub mod locator;
pub mod orchestrator;
pub mod scripted;
pub mod surface;

pub use detector::{CompletionDetector, DetectorState, StabilityTracker, Tick};
pub use locator::NewReplyLocator;
pub use orchestrator::{RunContext, TurnOrchestrator};
pub use surface::{ChatSurface, PromptInput, SurfaceError, TypingSignal};

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("probe run cancelled")]
pub struct Cancelled;

/// Sleep for `dur` unless `cancel` fires first.
pub(crate) async fn pause(cancel: &CancellationToken, dur: Duration) -> Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }
    tokio::select! {
        () = cancel.cancelled() => Err(Cancelled),
        () = tokio::time::sleep(dur) => Ok(()),
    }
}
