use super::surface::ChatSurface;
use super::{pause, Cancelled};
use crate::core::config::Timing;
use crate::types::{Author, CandidateReply, Snapshot, SnapshotEntry};
use std::collections::HashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Finds the reply that is new relative to a pre-submission snapshot.
pub struct NewReplyLocator<'a> {
    surface: &'a dyn ChatSurface,
    timing: Timing,
    cancel: CancellationToken,
}

impl<'a> NewReplyLocator<'a> {
    pub fn new(surface: &'a dyn ChatSurface, timing: Timing, cancel: CancellationToken) -> Self {
        Self {
            surface,
            timing,
            cancel,
        }
    }

    /// Poll until a new reply shows up or the appearance timeout elapses.
    ///
    /// `Ok(None)` is the not-found outcome; only cancellation is an error.
    pub async fn locate(
        &self,
        prior: &Snapshot,
        prompt: &str,
    ) -> Result<Option<CandidateReply>, Cancelled> {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            match self.surface.take_snapshot().await {
                Ok(current) => {
                    if let Some(entry) = newest_reply(prior, &current, prompt) {
                        debug!(
                            "locator: reply {} found after {}ms ({} polls)",
                            entry.handle,
                            start.elapsed().as_millis(),
                            polls
                        );
                        return Ok(Some(CandidateReply {
                            handle: entry.handle.clone(),
                            text_at_discovery: entry.text.clone(),
                        }));
                    }
                }
                Err(e) => warn!("locator: snapshot failed (poll {}): {}", polls, e),
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timing.appearance_timeout {
                debug!(
                    "locator: nothing new after {}ms ({} polls)",
                    elapsed.as_millis(),
                    polls
                );
                return Ok(None);
            }
            let remaining = self.timing.appearance_timeout - elapsed;
            pause(&self.cancel, self.timing.poll_interval.min(remaining)).await?;
        }
    }
}

/// The last entry in `current` that is not accounted for by `prior`, is not an
/// echo of `prompt` and is not attributed to the user.
///
/// Old texts are matched as a multiset: a text seen `k` times in `prior`
/// absorbs only its first `k` occurrences in `current`, so a reply identical to
/// an earlier one is still recognised as new.
pub fn newest_reply<'s>(
    prior: &Snapshot,
    current: &'s Snapshot,
    prompt: &str,
) -> Option<&'s SnapshotEntry> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for text in prior.texts() {
        *seen.entry(text).or_insert(0) += 1;
    }

    let prompt = prompt.trim();
    let mut newest = None;
    for entry in &current.entries {
        if let Some(left) = seen.get_mut(entry.text.as_str()) {
            if *left > 0 {
                *left -= 1;
                continue;
            }
        }
        let text = entry.text.trim();
        if text.is_empty() || text == prompt || entry.author == Author::User {
            continue;
        }
        newest = Some(entry);
    }
    newest
}
