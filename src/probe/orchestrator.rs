use super::detector::CompletionDetector;
use super::surface::{ChatSurface, PromptInput, SurfaceError, TypingSignal};
use super::{pause, Cancelled};
use crate::core::config::Timing;
use crate::types::{now_rfc3339, RunOutcome, Snapshot, TurnReason, TurnRecord};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-run state. Created by [`TurnOrchestrator::run`] and consumed into the
/// [`RunOutcome`]; nothing survives between runs.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: String,
    records: Vec<TurnRecord>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: now_rfc3339(),
            records: Vec::new(),
        }
    }

    fn append(&mut self, record: TurnRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TurnRecord] {
        &self.records
    }

    fn finish(self, cancelled: bool) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: now_rfc3339(),
            records: self.records,
            cancelled,
        }
    }
}

/// Sequences prompts against one surface: snapshot, submit, resolve, record, pace.
pub struct TurnOrchestrator<'a> {
    surface: &'a dyn ChatSurface,
    typing: &'a dyn TypingSignal,
    input: &'a dyn PromptInput,
    timing: Timing,
    cancel: CancellationToken,
}

impl<'a> TurnOrchestrator<'a> {
    pub fn new(
        surface: &'a dyn ChatSurface,
        typing: &'a dyn TypingSignal,
        input: &'a dyn PromptInput,
        timing: Timing,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            surface,
            typing,
            input,
            timing,
            cancel,
        }
    }

    /// Run every prompt once, in order. Always returns a record per attempted
    /// prompt; on cancellation the log so far comes back with `cancelled = true`.
    pub async fn run(&self, prompts: &[String]) -> RunOutcome {
        let mut ctx = RunContext::new();
        info!("probe run {} started: {} prompts", ctx.run_id, prompts.len());

        let cancelled = self.run_turns(&mut ctx, prompts).await.is_err();
        if cancelled {
            warn!(
                "probe run {} cancelled after {} of {} turns",
                ctx.run_id,
                ctx.records().len(),
                prompts.len()
            );
        }

        let outcome = ctx.finish(cancelled);
        info!(
            "probe run {} finished: {} turns, {} replies captured",
            outcome.run_id,
            outcome.records.len(),
            outcome.captured_count()
        );
        outcome
    }

    async fn run_turns(&self, ctx: &mut RunContext, prompts: &[String]) -> Result<(), Cancelled> {
        for (index, prompt) in prompts.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Cancelled);
            }
            info!(
                "turn {}/{}: {}",
                index + 1,
                prompts.len(),
                preview(prompt, 50)
            );

            let record = self.run_turn(index, prompt).await?;
            let interrupted = record.reason == TurnReason::Cancelled;
            log_record(&record);
            ctx.append(record);
            if interrupted {
                return Err(Cancelled);
            }

            if index + 1 < prompts.len() {
                pause(&self.cancel, self.timing.inter_turn_delay).await?;
            }
        }
        Ok(())
    }

    /// `Err` only when cancellation stopped the prompt from going out; a
    /// submitted prompt always yields a record.
    async fn run_turn(&self, index: usize, prompt: &str) -> Result<TurnRecord, Cancelled> {
        let before = match self.surface.take_snapshot().await {
            Ok(s) => s,
            Err(e) => {
                // An empty baseline only widens what counts as new; the echo and
                // author filters still apply.
                warn!("turn {}: baseline snapshot failed: {}", index + 1, e);
                Snapshot::default()
            }
        };

        match self.input.submit(prompt).await {
            Ok(()) => {}
            Err(SurfaceError::Cancelled) => return Err(Cancelled),
            Err(e) => {
                warn!("turn {}: prompt not submitted: {}", index + 1, e);
                return Ok(TurnRecord::degraded(index, prompt, TurnReason::InputUnavailable));
            }
        }

        let detector =
            CompletionDetector::new(self.surface, self.typing, self.timing, self.cancel.clone());
        Ok(match detector.resolve(&before, prompt).await {
            Ok(verdict) => TurnRecord::from_verdict(index, prompt, verdict),
            Err(Cancelled) => TurnRecord::degraded(index, prompt, TurnReason::Cancelled),
        })
    }
}

fn log_record(record: &TurnRecord) {
    match record.reason {
        TurnReason::Stabilized => info!(
            "turn {} captured ({} chars): {}",
            record.prompt_index + 1,
            record.captured_length,
            preview(&record.reply_text, 80)
        ),
        reason => warn!(
            "turn {} degraded ({:?}, {} chars)",
            record.prompt_index + 1,
            reason,
            record.captured_length
        ),
    }
}

fn preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push('…');
    }
    out
}
