//! Tests for the timer engine.

use chrono::Duration;

use super::*;
use crate::model::{MatchAssignment, TeamId};
use crate::testutil::Fixture;

fn running_turn(fx: &Fixture) -> SpeakerTurn {
    fx.matches().advance_turn(fx.m.id).unwrap()
}

#[test]
fn advance_arms_timer_with_full_allocation() {
    let fx = Fixture::new().live(300);
    let turn = running_turn(&fx);

    let timer = fx.timers().get(fx.m.id).unwrap();
    assert_eq!(timer.active_turn_id, Some(turn.id));
    assert_eq!(timer.remaining_seconds, 300);
    assert!(!timer.paused);
    assert_eq!(timer.last_tick, fx.clock.now());
}

#[test]
fn initialize_resets_existing_timer() {
    let fx = Fixture::new().live(300);
    let turn = running_turn(&fx);
    fx.clock.advance_secs(30);
    fx.timers().pause(fx.m.id).unwrap();

    let timer = fx.timers().initialize(fx.m.id, Some(turn.id), 90).unwrap();
    assert_eq!(timer.remaining_seconds, 90);
    assert!(!timer.paused);
    assert_eq!(fx.timers().get(fx.m.id).unwrap(), timer);
}

#[test]
fn initialize_rejects_foreign_turn_and_oversized_allocation() {
    let fx = Fixture::new().live(300);
    let neighbour = fx
        .rounds()
        .assign_matches(
            fx.round.id,
            &[MatchAssignment {
                bench_number: 2,
                petitioner_team_id: TeamId::new_v4(),
                respondent_team_id: TeamId::new_v4(),
            }],
        )
        .unwrap()
        .remove(0);
    let foreign = fx
        .sequencer()
        .generate(
            neighbour.id,
            neighbour.petitioner_team_id,
            neighbour.respondent_team_id,
            300,
        )
        .unwrap()[0]
        .id;

    let err = fx.timers().initialize(fx.m.id, Some(foreign), 60).unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "active_turn_id", .. }));
    assert!(matches!(
        fx.timers().get(fx.m.id),
        Err(EngineError::NotFound { entity: "timer", .. })
    ));

    let err = fx
        .timers()
        .initialize(fx.m.id, Some(TurnId::new_v4()), 60)
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "turn", .. }));

    let err = fx.timers().initialize(fx.m.id, None, 3601).unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "remaining_seconds", .. }));
}

#[test]
fn tick_without_elapsed_time_changes_nothing() {
    let fx = Fixture::new().live(300);
    running_turn(&fx);
    let before = fx.timers().get(fx.m.id).unwrap();

    let outcome = fx.timers().tick(fx.m.id).unwrap();
    assert_eq!(outcome.timer, before);
    assert!(outcome.auto_completed_turn.is_none());
}

#[test]
fn tick_deducts_whole_elapsed_seconds() {
    let fx = Fixture::new().live(300);
    running_turn(&fx);

    fx.clock.advance(Duration::milliseconds(12_500));
    let timer = fx.timers().tick(fx.m.id).unwrap().timer;
    assert_eq!(timer.remaining_seconds, 288);

    // The carried half second counts towards the next tick.
    fx.clock.advance(Duration::milliseconds(600));
    let timer = fx.timers().tick(fx.m.id).unwrap().timer;
    assert_eq!(timer.remaining_seconds, 287);
}

#[test]
fn expiry_auto_completes_active_turn() {
    let fx = Fixture::new().live(60);
    let turn = running_turn(&fx);

    fx.clock.advance_secs(75);
    let outcome = fx.timers().tick(fx.m.id).unwrap();
    assert_eq!(outcome.timer.remaining_seconds, 0);
    assert_eq!(outcome.timer.active_turn_id, None);

    let completed = outcome.auto_completed_turn.expect("turn should auto-complete");
    assert_eq!(completed.id, turn.id);
    assert_eq!(completed.status, TurnStatus::Completed);
    assert_eq!(completed.actual_seconds, Some(75));
    assert_eq!(completed.ended_at, Some(fx.clock.now()));

    // A second tick at zero is a no-op.
    fx.clock.advance_secs(5);
    let again = fx.timers().tick(fx.m.id).unwrap();
    assert!(again.auto_completed_turn.is_none());
    assert_eq!(again.timer.remaining_seconds, 0);
}

#[test]
fn paused_time_is_never_counted() {
    let fx = Fixture::new().live(300);
    running_turn(&fx);

    fx.clock.advance_secs(10);
    let paused = fx.timers().pause(fx.m.id).unwrap();
    assert!(paused.paused);
    assert_eq!(paused.remaining_seconds, 290);

    fx.clock.advance_secs(500);
    let ticked = fx.timers().tick(fx.m.id).unwrap();
    assert_eq!(ticked.timer.remaining_seconds, 290);
    assert!(ticked.auto_completed_turn.is_none());

    fx.clock.advance_secs(100);
    fx.timers().resume(fx.m.id).unwrap();
    fx.clock.advance_secs(20);
    let timer = fx.timers().tick(fx.m.id).unwrap().timer;
    assert_eq!(timer.remaining_seconds, 270);
}

#[test]
fn pause_and_resume_are_idempotent() {
    let fx = Fixture::new().live(300);
    running_turn(&fx);

    fx.timers().pause(fx.m.id).unwrap();
    let again = fx.timers().pause(fx.m.id).unwrap();
    assert!(again.paused);
    assert_eq!(again.remaining_seconds, 300);

    fx.timers().resume(fx.m.id).unwrap();
    let again = fx.timers().resume(fx.m.id).unwrap();
    assert!(!again.paused);
    assert_eq!(again.remaining_seconds, 300);
}

#[test]
fn backwards_clock_deducts_nothing() {
    let fx = Fixture::new().live(300);
    running_turn(&fx);

    fx.clock.set(fx.clock.now() - Duration::seconds(30));
    let timer = fx.timers().tick(fx.m.id).unwrap().timer;
    assert_eq!(timer.remaining_seconds, 300);
    assert_eq!(timer.last_tick, fx.clock.now());
}

#[test]
fn missing_timer_is_not_found() {
    let fx = Fixture::new();
    for result in [
        fx.timers().get(fx.m.id),
        fx.timers().tick(fx.m.id).map(|o| o.timer),
        fx.timers().pause(fx.m.id),
        fx.timers().resume(fx.m.id),
    ] {
        assert!(matches!(
            result,
            Err(EngineError::NotFound { entity: "timer", .. })
        ));
    }
}
