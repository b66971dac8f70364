use chatprobe::core::config::Timing;
use chatprobe::probe::scripted::{ReplyScript, ScriptedSurface};
use chatprobe::probe::{ChatSurface, TurnOrchestrator};
use chatprobe::types::{Author, RunOutcome, TurnReason, NO_RESPONSE_SENTINEL};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn fast_timing() -> Timing {
    Timing {
        poll_interval: ms(100),
        appearance_timeout: ms(1_000),
        completion_timeout: ms(3_000),
        required_stable_ticks: 3,
        min_reply_chars: 0,
        inter_turn_delay: ms(200),
    }
}

fn prompts(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn run(surface: &ScriptedSurface, list: &[&str]) -> RunOutcome {
    run_with(surface, list, CancellationToken::new()).await
}

async fn run_with(surface: &ScriptedSurface, list: &[&str], cancel: CancellationToken) -> RunOutcome {
    TurnOrchestrator::new(surface, surface, surface, fast_timing(), cancel)
        .run(&prompts(list))
        .await
}

#[tokio::test(start_paused = true)]
async fn every_prompt_gets_one_record_in_order() {
    let surface = ScriptedSurface::new()
        .with_reply(ReplyScript::new().text(ms(100), "answer one"))
        .with_reply(ReplyScript::new().text(ms(150), "answer two"))
        .with_reply(ReplyScript::new().text(ms(50), "answer three"));

    let out = run(&surface, &["first", "second", "third"]).await;

    assert!(!out.cancelled);
    assert_eq!(out.records.len(), 3);
    for (i, rec) in out.records.iter().enumerate() {
        assert_eq!(rec.prompt_index, i);
        assert_eq!(rec.reason, TurnReason::Stabilized);
    }
    let replies: Vec<&str> = out.records.iter().map(|r| r.reply_text.as_str()).collect();
    assert_eq!(replies, vec!["answer one", "answer two", "answer three"]);
    assert_eq!(out.records[1].prompt_text, "second");
    assert_eq!(surface.submitted(), prompts(&["first", "second", "third"]));
}

#[tokio::test(start_paused = true)]
async fn typing_that_never_stops_times_out_with_partial_text() {
    let surface = ScriptedSurface::new().with_reply(
        ReplyScript::new()
            .typing(Duration::ZERO)
            .streaming(ms(100), "Hel")
            .streaming(ms(500), "Hello there, this is the long streamed answer"),
    );

    let out = run(&surface, &["long question"]).await;

    let rec = &out.records[0];
    assert_eq!(rec.reason, TurnReason::CompletionTimeout);
    assert_eq!(rec.reply_text, "Hello there, this is the long streamed answer");
    assert_eq!(rec.captured_length, 45);
}

#[tokio::test(start_paused = true)]
async fn short_reply_stabilizes_and_stays_put() {
    let surface = ScriptedSurface::new().with_reply(ReplyScript::new().text(ms(200), "pon"));

    let out = run(&surface, &["ping"]).await;

    let rec = &out.records[0];
    assert_eq!(rec.reason, TurnReason::Stabilized);
    assert_eq!(rec.reply_text, "pon");
    assert_eq!(rec.captured_length, 3);

    let after = surface.take_snapshot().await.unwrap();
    assert_eq!(after.texts().last(), Some("pon"));
}

#[tokio::test(start_paused = true)]
async fn silence_records_the_sentinel() {
    let surface = ScriptedSurface::new().with_reply(ReplyScript::new());

    let out = run(&surface, &["ping"]).await;

    let rec = &out.records[0];
    assert_eq!(rec.reason, TurnReason::AppearanceTimeout);
    assert_eq!(rec.reply_text, NO_RESPONSE_SENTINEL);
    assert_eq!(rec.captured_length, 0);
    assert!(!rec.is_captured());
}

#[tokio::test(start_paused = true)]
async fn echoed_prompt_is_never_taken_for_the_reply() {
    let surface = ScriptedSurface::new()
        .with_reply(ReplyScript::new().echo_prompt())
        .with_reply(
            ReplyScript::new()
                .echo_prompt()
                .text(ms(300), "Here is my actual answer."),
        );

    let out = run(&surface, &["what is two plus two?", "and three plus three?"]).await;

    assert_eq!(out.records[0].reason, TurnReason::AppearanceTimeout);
    assert_eq!(out.records[0].reply_text, NO_RESPONSE_SENTINEL);
    assert_eq!(out.records[1].reason, TurnReason::Stabilized);
    assert_eq!(out.records[1].reply_text, "Here is my actual answer.");
}

#[tokio::test(start_paused = true)]
async fn flickering_signal_waits_for_the_final_growth() {
    let surface = ScriptedSurface::new().with_reply(
        ReplyScript::new()
            .typing(Duration::ZERO)
            .streaming(ms(100), &"a".repeat(5))
            .text(ms(200), &"a".repeat(10))
            .streaming(ms(300), &"a".repeat(15))
            .text(ms(400), &"a".repeat(20)),
    );

    let started = tokio::time::Instant::now();
    let out = run(&surface, &["grow"]).await;

    let rec = &out.records[0];
    assert_eq!(rec.reason, TurnReason::Stabilized);
    assert_eq!(rec.captured_length, 20);
    // last growth at 400ms, then three unchanged quiet polls after the first sighting
    assert!(started.elapsed() >= ms(700));
}

#[tokio::test(start_paused = true)]
async fn identical_surfaces_give_identical_records() {
    fn surface() -> ScriptedSurface {
        ScriptedSurface::new()
            .with_history(vec![(Author::Assistant, "Welcome! Ask me anything.".into())])
            .with_reply(
                ReplyScript::new()
                    .typing(Duration::ZERO)
                    .streaming(ms(250), "Sunny with")
                    .text(ms(600), "Sunny with a light breeze."),
            )
            .with_reply(ReplyScript::new())
    }

    let a = run(&surface(), &["weather?", "anything else?"]).await;
    let b = run(&surface(), &["weather?", "anything else?"]).await;

    let strip = |o: &RunOutcome| -> Vec<(usize, String, String, usize, TurnReason)> {
        o.records
            .iter()
            .map(|r| {
                (
                    r.prompt_index,
                    r.prompt_text.clone(),
                    r.reply_text.clone(),
                    r.captured_length,
                    r.reason,
                )
            })
            .collect()
    };
    assert_eq!(strip(&a), strip(&b));
    assert_eq!(a.records[0].reply_text, "Sunny with a light breeze.");
}

#[tokio::test(start_paused = true)]
async fn failed_submit_is_recorded_and_the_run_continues() {
    let surface = ScriptedSurface::new()
        .with_reply(ReplyScript::new().rejecting_input())
        .with_reply(ReplyScript::new().text(ms(100), "second reply"));

    let out = run(&surface, &["first", "second"]).await;

    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[0].reason, TurnReason::InputUnavailable);
    assert_eq!(out.records[0].reply_text, NO_RESPONSE_SENTINEL);
    assert_eq!(out.records[1].reason, TurnReason::Stabilized);
    assert_eq!(surface.submitted(), prompts(&["second"]));
}

#[tokio::test(start_paused = true)]
async fn repeated_reply_text_is_still_located() {
    let surface = ScriptedSurface::new()
        .with_reply(ReplyScript::new().text(ms(100), "Sure, happy to help."))
        .with_reply(ReplyScript::new().text(ms(100), "Sure, happy to help."));

    let out = run(&surface, &["can you help?", "really?"]).await;

    for rec in &out.records {
        assert_eq!(rec.reason, TurnReason::Stabilized);
        assert_eq!(rec.reply_text, "Sure, happy to help.");
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_the_partial_log() {
    let surface = ScriptedSurface::new()
        .with_reply(ReplyScript::new().text(ms(100), "first answer"))
        .with_reply(ReplyScript::new().typing(Duration::ZERO));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ms(1_500)).await;
        trigger.cancel();
    });

    let out = run_with(&surface, &["one", "two", "three"], cancel).await;

    assert!(out.cancelled);
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[0].reason, TurnReason::Stabilized);
    assert_eq!(out.records[1].reason, TurnReason::Cancelled);
    assert_eq!(surface.submitted(), prompts(&["one", "two"]));
}
