//! Turn scheduler behavior under paused time
//!
//! All tests run on a paused clock, so the fallback timers and scripted
//! completion delays fire deterministically and the elapsed-time assertions
//! are exact.

mod common;

use std::time::Duration;

use chorus_client::session::{PlaybackEvent, PlaybackStatus, TurnScheduler};

use common::{settle, turn, PlayScript, ScriptedSink};

/// A duration far past anything a test waits for, used to park a fallback
/// timer out of the way.
const FAR_OFF_MS: u64 = 600_000;

#[tokio::test(start_paused = true)]
async fn plays_every_turn_in_order_then_ends() {
    let sink = ScriptedSink::new([PlayScript::Fail, PlayScript::Fail, PlayScript::Fail]);
    let (scheduler, mut events) = TurnScheduler::new(sink.clone());

    scheduler.start(vec![turn(0, 1, 2000), turn(1, 2, 1500), turn(2, 1, 3000)]);

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 1, speaker_id: 2 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 2, speaker_id: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 3 })
    );

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.status, PlaybackStatus::Ended);
    assert_eq!(snapshot.cursor, None);
    assert_eq!(snapshot.batch_len, 0);
    assert_eq!(sink.started_urls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn empty_batch_leaves_scheduler_idle() {
    let sink = ScriptedSink::new([]);
    let (scheduler, mut events) = TurnScheduler::new(sink.clone());

    scheduler.start(Vec::new());
    settle().await;

    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.status, PlaybackStatus::Idle);
    assert_eq!(snapshot.cursor, None);
    assert!(events.try_recv().is_err());
    assert!(sink.started_urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn text_is_displayed_before_audio_resolves() {
    let sink = ScriptedSink::new([PlayScript::Stall]);
    let (scheduler, _events) = TurnScheduler::new(sink);
    let lines = scheduler.subscribe_lines();

    scheduler.start(vec![turn(0, 7, FAR_OFF_MS)]);
    settle().await;

    let line = lines.borrow().clone().unwrap();
    assert_eq!(line.speaker_id, 7);
    assert_eq!(line.text, "line 0");
    assert_eq!(scheduler.snapshot().status, PlaybackStatus::Playing);
    assert_eq!(scheduler.snapshot().cursor, Some(0));
}

#[tokio::test(start_paused = true)]
async fn completion_signal_advances_before_fallback_timer() {
    let sink = ScriptedSink::new([
        PlayScript::CompleteAfter(Duration::from_millis(1000)),
        PlayScript::Fail,
    ]);
    let (scheduler, mut events) = TurnScheduler::new(sink);

    let t0 = tokio::time::Instant::now();
    scheduler.start(vec![turn(0, 1, FAR_OFF_MS), turn(1, 2, 2000)]);

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 1, speaker_id: 2 })
    );
    // The completion signal at 1s won the race against the far-off fallback.
    assert_eq!(t0.elapsed(), Duration::from_millis(1000));

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 2 })
    );
    assert_eq!(t0.elapsed(), Duration::from_millis(3000));

    // The parked fallback firing later must not produce anything.
    tokio::time::advance(Duration::from_millis(FAR_OFF_MS)).await;
    settle().await;
    assert!(events.try_recv().is_err());
    assert_eq!(scheduler.snapshot().status, PlaybackStatus::Ended);
}

#[tokio::test(start_paused = true)]
async fn stalled_audio_advances_at_estimated_duration() {
    let sink = ScriptedSink::new([PlayScript::Stall, PlayScript::Fail]);
    let (scheduler, mut events) = TurnScheduler::new(sink.clone());

    let t0 = tokio::time::Instant::now();
    scheduler.start(vec![turn(0, 1, 2000), turn(1, 2, 2000)]);

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 1, speaker_id: 2 })
    );
    assert_eq!(t0.elapsed(), Duration::from_millis(2000));

    // Advancing past a stalled turn releases its handle.
    assert!(sink.control(0).is_stopped());

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 2 })
    );
}

#[tokio::test(start_paused = true)]
async fn failed_start_paces_by_estimated_duration() {
    let sink = ScriptedSink::new([
        PlayScript::Fail,
        PlayScript::CompleteAfter(Duration::from_millis(800)),
    ]);
    let (scheduler, mut events) = TurnScheduler::new(sink);

    let t0 = tokio::time::Instant::now();
    scheduler.start(vec![turn(0, 1, 2000), turn(1, 2, FAR_OFF_MS)]);

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 1, speaker_id: 2 })
    );
    assert_eq!(t0.elapsed(), Duration::from_millis(2000));

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 2 })
    );
    assert_eq!(t0.elapsed(), Duration::from_millis(2800));
}

#[tokio::test(start_paused = true)]
async fn cancel_is_idempotent_and_blocks_stale_callbacks() {
    let sink = ScriptedSink::new([PlayScript::Stall]);
    let (scheduler, mut events) = TurnScheduler::new(sink.clone());
    let lines = scheduler.subscribe_lines();

    scheduler.start(vec![turn(0, 1, FAR_OFF_MS)]);
    settle().await;
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );

    scheduler.cancel();
    assert_eq!(events.recv().await, Some(PlaybackEvent::Cancelled));
    assert_eq!(scheduler.snapshot().status, PlaybackStatus::Idle);
    assert!(sink.control(0).is_stopped());
    assert!(lines.borrow().is_none());

    // Second cancel is a no-op, not an error and not another event.
    scheduler.cancel();
    settle().await;
    assert!(events.try_recv().is_err());

    // The turn's completion signal and fallback timer are both stale now.
    sink.complete_next_stalled();
    settle().await;
    tokio::time::advance(Duration::from_millis(FAR_OFF_MS)).await;
    settle().await;
    assert!(events.try_recv().is_err());
    assert_eq!(scheduler.snapshot().status, PlaybackStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn new_start_supersedes_previous_session() {
    let sink = ScriptedSink::new([PlayScript::Stall, PlayScript::Fail, PlayScript::Fail]);
    let (scheduler, mut events) = TurnScheduler::new(sink.clone());

    scheduler.start(vec![turn(0, 1, FAR_OFF_MS)]);
    settle().await;
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );

    scheduler.start(vec![turn(1, 2, 2000), turn(2, 3, 2000)]);
    settle().await;

    // The first session's handle was released on replacement.
    assert!(sink.control(0).is_stopped());

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 2 })
    );

    // Its completion signal firing late must not advance the new session.
    sink.complete_next_stalled();
    settle().await;
    assert_eq!(scheduler.snapshot().cursor, Some(0));

    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 1, speaker_id: 3 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 2 })
    );

    assert_eq!(
        sink.started_urls(),
        vec![
            "http://localhost:8000/static/audio/0.wav",
            "http://localhost:8000/static/audio/1.wav",
            "http://localhost:8000/static/audio/2.wav",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn completion_and_fallback_produce_a_single_advance() {
    let sink = ScriptedSink::new([PlayScript::CompleteAfter(Duration::from_millis(1000))]);
    let (scheduler, mut events) = TurnScheduler::new(sink);

    scheduler.start(vec![turn(0, 1, 5000)]);
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 1 })
    );

    // Let the fallback timer fire after the fact.
    tokio::time::advance(Duration::from_millis(5000)).await;
    settle().await;
    assert!(events.try_recv().is_err());
    assert_eq!(scheduler.snapshot().status, PlaybackStatus::Ended);
}

#[tokio::test(start_paused = true)]
async fn begin_loading_releases_the_active_session() {
    let sink = ScriptedSink::new([PlayScript::Stall, PlayScript::Fail]);
    let (scheduler, mut events) = TurnScheduler::new(sink.clone());
    let lines = scheduler.subscribe_lines();

    scheduler.start(vec![turn(0, 1, FAR_OFF_MS)]);
    settle().await;
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );

    scheduler.begin_loading();
    let snapshot = scheduler.snapshot();
    assert_eq!(snapshot.status, PlaybackStatus::Loading);
    assert_eq!(snapshot.cursor, None);
    assert_eq!(snapshot.batch_len, 0);
    assert!(sink.control(0).is_stopped());
    assert!(lines.borrow().is_none());

    // The superseding response starts normally.
    scheduler.start(vec![turn(1, 2, 2000)]);
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 2 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 1 })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_start_never_leaves_stale_text_displayed() {
    // With no script left, every start stalls, so only the display
    // invariant is in play: once the scheduler is Idle, no line from the
    // losing start may remain visible.
    let sink = ScriptedSink::new([]);
    let (scheduler, _events) = TurnScheduler::new(sink);
    let lines = scheduler.subscribe_lines();

    for i in 0..1000 {
        let starter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler.start(vec![turn(0, 1, FAR_OFF_MS)]);
            })
        };
        let canceller = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler.cancel();
            })
        };
        starter.await.unwrap();
        canceller.await.unwrap();

        if scheduler.snapshot().status == PlaybackStatus::Idle {
            let shown = lines.borrow().clone();
            assert!(
                shown.is_none(),
                "iteration {i}: scheduler idle but a line is still displayed: {shown:?}"
            );
        }
        scheduler.cancel();
    }
}

#[tokio::test(start_paused = true)]
async fn scheduler_is_reusable_after_a_session_ends() {
    let sink = ScriptedSink::new([PlayScript::Fail, PlayScript::Fail]);
    let (scheduler, mut events) = TurnScheduler::new(sink);

    scheduler.start(vec![turn(0, 1, 2000)]);
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 1 })
    );

    scheduler.start(vec![turn(1, 2, 2000)]);
    assert_eq!(scheduler.snapshot().status, PlaybackStatus::Playing);
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::TurnStarted { index: 0, speaker_id: 2 })
    );
    assert_eq!(
        events.recv().await,
        Some(PlaybackEvent::SessionEnded { turns_played: 1 })
    );
}
