use super::locator::NewReplyLocator;
use super::surface::{ChatSurface, TypingSignal};
use super::{pause, Cancelled};
use crate::core::config::Timing;
use crate::types::{CandidateReply, CompletionVerdict, Snapshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorState {
    WaitingAppearance,
    Tracking,
    Stable,
    TimedOut,
}

fn log_state(state: DetectorState) {
    debug!("completion_detector_state={:?}", state);
}

/// One observation fed to the stability policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// The typing signal is up; text is not inspected.
    Producing,
    /// Signal down; current reply length in chars.
    Quiet { len: usize },
    /// Signal down but the reply could not be read.
    Unreadable,
}

/// Counts consecutive quiet ticks with an unchanged, plausible-length reply.
///
/// Pure value type: the same tick sequence always yields the same answers.
#[derive(Clone, Debug)]
pub struct StabilityTracker {
    required: u32,
    min_len: usize,
    last_len: Option<usize>,
    stable_ticks: u32,
}

impl StabilityTracker {
    pub fn new(required: u32, min_len: usize) -> Self {
        Self {
            required: required.max(1),
            min_len,
            last_len: None,
            stable_ticks: 0,
        }
    }

    pub fn from_timing(timing: &Timing) -> Self {
        Self::new(timing.required_stable_ticks, timing.min_reply_chars)
    }

    /// Feed one tick; returns `true` once the reply counts as finished.
    pub fn observe(&mut self, tick: Tick) -> bool {
        match tick {
            Tick::Producing | Tick::Unreadable => self.stable_ticks = 0,
            Tick::Quiet { len } => {
                if self.last_len == Some(len) && len > self.min_len {
                    self.stable_ticks += 1;
                } else {
                    self.stable_ticks = 0;
                    self.last_len = Some(len);
                }
            }
        }
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        self.stable_ticks >= self.required
    }

    pub fn stable_ticks(&self) -> u32 {
        self.stable_ticks
    }
}

/// Drives one turn from "prompt submitted" to a [`CompletionVerdict`].
pub struct CompletionDetector<'a> {
    surface: &'a dyn ChatSurface,
    typing: &'a dyn TypingSignal,
    timing: Timing,
    cancel: CancellationToken,
}

impl<'a> CompletionDetector<'a> {
    pub fn new(
        surface: &'a dyn ChatSurface,
        typing: &'a dyn TypingSignal,
        timing: Timing,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            surface,
            typing,
            timing,
            cancel,
        }
    }

    /// Locate the reply to `prompt` (relative to `prior`) and track it until it
    /// settles or the completion timeout expires.
    pub async fn resolve(
        &self,
        prior: &Snapshot,
        prompt: &str,
    ) -> Result<CompletionVerdict, Cancelled> {
        log_state(DetectorState::WaitingAppearance);
        let locator = NewReplyLocator::new(self.surface, self.timing, self.cancel.clone());
        match locator.locate(prior, prompt).await? {
            Some(candidate) => self.track(candidate).await,
            None => {
                log_state(DetectorState::TimedOut);
                Ok(CompletionVerdict::not_found())
            }
        }
    }

    /// The TRACKING phase on its own, for callers that located the reply already.
    pub async fn track(&self, candidate: CandidateReply) -> Result<CompletionVerdict, Cancelled> {
        log_state(DetectorState::Tracking);
        let start = Instant::now();
        let mut tracker = StabilityTracker::from_timing(&self.timing);
        let mut latest = candidate.text_at_discovery.trim().to_string();

        loop {
            let tick = match self.typing.is_producing().await {
                Ok(true) => Tick::Producing,
                Ok(false) => self.sample(&candidate, &mut latest).await,
                Err(e) => {
                    warn!("detector: typing probe failed, treating as idle: {}", e);
                    self.sample(&candidate, &mut latest).await
                }
            };

            if tracker.observe(tick) {
                log_state(DetectorState::Stable);
                debug!(
                    "detector: reply {} stable after {}ms ({} chars)",
                    candidate.handle,
                    start.elapsed().as_millis(),
                    latest.chars().count()
                );
                return Ok(CompletionVerdict::stabilized(latest));
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timing.completion_timeout {
                log_state(DetectorState::TimedOut);
                // Producing ticks never read the reply; take what is on the surface now.
                if let Ok(Some(text)) = self.surface.read_text(&candidate.handle).await {
                    let text = text.trim();
                    if !text.is_empty() {
                        latest = text.to_string();
                    }
                }
                warn!(
                    "detector: reply {} still changing after {}ms; keeping partial text ({} chars)",
                    candidate.handle,
                    elapsed.as_millis(),
                    latest.chars().count()
                );
                return Ok(CompletionVerdict::timed_out(latest));
            }
            let remaining = self.timing.completion_timeout - elapsed;
            pause(&self.cancel, self.timing.poll_interval.min(remaining)).await?;
        }
    }

    async fn sample(&self, candidate: &CandidateReply, latest: &mut String) -> Tick {
        match self.surface.read_text(&candidate.handle).await {
            Ok(Some(text)) => {
                let text = text.trim();
                let len = text.chars().count();
                if text != latest.as_str() {
                    *latest = text.to_string();
                }
                Tick::Quiet { len }
            }
            Ok(None) => {
                debug!("detector: reply {} vanished from the surface", candidate.handle);
                Tick::Unreadable
            }
            Err(e) => {
                warn!("detector: reading reply {} failed: {}", candidate.handle, e);
                Tick::Unreadable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(len: usize) -> Tick {
        Tick::Quiet { len }
    }

    #[test]
    fn needs_required_run_of_unchanged_quiet_ticks() {
        let mut t = StabilityTracker::new(3, 2);
        assert!(!t.observe(quiet(5))); // first sighting only records the length
        assert!(!t.observe(quiet(5)));
        assert!(!t.observe(quiet(5)));
        assert!(t.observe(quiet(5)));
    }

    #[test]
    fn producing_resets_the_run() {
        let mut t = StabilityTracker::new(2, 0);
        t.observe(quiet(7));
        t.observe(quiet(7));
        assert_eq!(t.stable_ticks(), 1);
        t.observe(Tick::Producing);
        assert_eq!(t.stable_ticks(), 0);
        assert!(!t.observe(quiet(7)));
        assert!(t.observe(quiet(7)));
    }

    #[test]
    fn growth_resets_and_remembers_new_length() {
        let mut t = StabilityTracker::new(1, 0);
        t.observe(quiet(5));
        assert!(!t.observe(quiet(10)));
        assert!(t.observe(quiet(10)));
    }

    #[test]
    fn short_text_never_stabilizes() {
        let mut t = StabilityTracker::new(1, 10);
        for _ in 0..20 {
            assert!(!t.observe(quiet(10)));
        }
    }

    #[test]
    fn alternating_signal_blocks_completion_until_quiet_run() {
        let mut t = StabilityTracker::new(2, 0);
        // typing flickers while the reply grows 5 → 10 → 15 → 20
        for len in [5, 10, 15, 20] {
            assert!(!t.observe(Tick::Producing));
            assert!(!t.observe(quiet(len)));
        }
        // growth has stopped but the signal keeps flickering
        for _ in 0..5 {
            assert!(!t.observe(quiet(20)));
            assert!(!t.observe(Tick::Producing));
        }
        // continuously quiet from here on
        assert!(!t.observe(quiet(20)));
        assert!(t.observe(quiet(20)));
    }

    #[test]
    fn unreadable_tick_resets_but_keeps_length() {
        let mut t = StabilityTracker::new(2, 0);
        t.observe(quiet(4));
        t.observe(quiet(4));
        t.observe(Tick::Unreadable);
        assert_eq!(t.stable_ticks(), 0);
        assert!(!t.observe(quiet(4)));
        assert!(t.observe(quiet(4)));
    }
}
