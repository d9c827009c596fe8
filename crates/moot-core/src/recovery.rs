//! Startup reconciliation of live timers after a crash or restart.
//!
//! For every LIVE match the downtime since the last persisted tick is
//! charged to the running countdown with the same arithmetic a tick uses. A
//! countdown that ran out while the server was down completes its active
//! turn. Each match is recovered in its own transaction; a failure is logged
//! and reported, never propagated, and the match heals on its next tick.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::ClockSource;
use crate::error::EngineError;
use crate::match_machine;
use crate::model::{MatchId, TurnId};
use crate::status::{MatchStatus, TurnStatus};
use crate::store::{repo, Store};
use crate::timer::countdown;

/// What recovery did with one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryOutcome {
    /// Downtime was deducted; the turn keeps running.
    Adjusted,
    /// The countdown ran out during downtime and the active turn completed.
    TurnExpired,
    /// The timer is paused; nothing was deducted.
    Paused,
    /// The match has no timer yet.
    NoTimer,
    /// The match left LIVE before its transaction ran.
    NotLive,
    /// Recovery failed; the match stays LIVE.
    Failed(String),
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adjusted => f.write_str("ADJUSTED"),
            Self::TurnExpired => f.write_str("TURN_EXPIRED"),
            Self::Paused => f.write_str("PAUSED"),
            Self::NoTimer => f.write_str("NO_TIMER"),
            Self::NotLive => f.write_str("NOT_LIVE"),
            Self::Failed(reason) => write!(f, "FAILED: {reason}"),
        }
    }
}

/// Per-match result of [`RecoveryCoordinator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Recovered match.
    pub match_id: MatchId,
    /// What happened.
    pub outcome: RecoveryOutcome,
    /// Remaining seconds before recovery, if a timer exists.
    pub remaining_before: Option<u32>,
    /// Remaining seconds after recovery, if a timer exists.
    pub remaining_after: Option<u32>,
    /// Whole seconds a running timer was down since its last tick; 0 for a
    /// paused timer, which is never charged.
    pub downtime_seconds: u64,
    /// Turn completed because its time ran out while down.
    pub completed_turn: Option<TurnId>,
}

impl RecoveryReport {
    fn bare(match_id: MatchId, outcome: RecoveryOutcome) -> Self {
        Self {
            match_id,
            outcome,
            remaining_before: None,
            remaining_after: None,
            downtime_seconds: 0,
            completed_turn: None,
        }
    }
}

/// Reconciles persisted timers with wall-clock time at startup.
#[derive(Debug, Clone)]
pub struct RecoveryCoordinator {
    store: Store,
    clock: Arc<dyn ClockSource>,
}

impl RecoveryCoordinator {
    /// Creates a coordinator over `store`.
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn ClockSource>) -> Self {
        Self { store, clock }
    }

    /// Recovers every LIVE match.
    ///
    /// Per-match failures are reported as [`RecoveryOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the LIVE matches cannot be listed.
    pub fn run(&self) -> Result<Vec<RecoveryReport>, EngineError> {
        let now = self.clock.now();
        let live = self
            .store
            .read(|conn| repo::match_ids_with_status(conn, MatchStatus::Live))?;
        info!(live_matches = live.len(), "starting timer recovery");

        let reports: Vec<RecoveryReport> = live
            .into_iter()
            .map(|match_id| {
                self.store
                    .write(|tx| recover_locked(tx, match_id, now))
                    .unwrap_or_else(|err| {
                        warn!(match_id = %match_id, error = %err, "timer recovery failed");
                        RecoveryReport::bare(match_id, RecoveryOutcome::Failed(err.to_string()))
                    })
            })
            .collect();

        let expired = reports
            .iter()
            .filter(|r| r.outcome == RecoveryOutcome::TurnExpired)
            .count();
        let failed = reports
            .iter()
            .filter(|r| matches!(r.outcome, RecoveryOutcome::Failed(_)))
            .count();
        info!(
            recovered = reports.len(),
            expired_turns = expired,
            failed,
            "timer recovery finished"
        );
        Ok(reports)
    }
}

fn recover_locked(
    conn: &Connection,
    match_id: MatchId,
    now: DateTime<Utc>,
) -> Result<RecoveryReport, EngineError> {
    let m = repo::lock_match(conn, match_id)?;
    if m.status != MatchStatus::Live {
        return Ok(RecoveryReport::bare(match_id, RecoveryOutcome::NotLive));
    }
    let Some(mut timer) = repo::find_timer(conn, match_id)? else {
        return Ok(RecoveryReport::bare(match_id, RecoveryOutcome::NoTimer));
    };

    let remaining_before = timer.remaining_seconds;
    let downtime_seconds = if timer.paused {
        0
    } else {
        u64::try_from(now.signed_duration_since(timer.last_tick).num_seconds()).unwrap_or(0)
    };
    let step = countdown::apply(now, timer.last_tick, timer.remaining_seconds, timer.paused);
    timer.remaining_seconds = step.remaining_seconds;
    timer.last_tick = step.last_tick;

    let mut outcome = if timer.paused {
        RecoveryOutcome::Paused
    } else {
        RecoveryOutcome::Adjusted
    };
    let mut completed_turn = None;
    if step.expired && !timer.paused {
        if let Some(turn_id) = timer.active_turn_id.take() {
            if repo::lock_turn(conn, turn_id)?.status == TurnStatus::Active {
                match_machine::complete_turn_locked(conn, turn_id, now)?;
                warn!(
                    match_id = %match_id,
                    turn_id = %turn_id,
                    downtime_seconds,
                    "turn time ran out while the server was down; turn completed"
                );
                outcome = RecoveryOutcome::TurnExpired;
                completed_turn = Some(turn_id);
            }
        }
    }
    repo::upsert_timer(conn, &timer)?;

    Ok(RecoveryReport {
        match_id,
        outcome,
        remaining_before: Some(remaining_before),
        remaining_after: Some(timer.remaining_seconds),
        downtime_seconds,
        completed_turn,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::params;

    use super::*;
    use crate::testutil::Fixture;

    fn coordinator(fx: &Fixture) -> RecoveryCoordinator {
        RecoveryCoordinator::new(fx.store.clone(), fx.clock())
    }

    #[test]
    fn downtime_longer_than_remaining_completes_the_turn() {
        let fx = Fixture::new().live(300);
        let turn = fx.matches().advance_turn(fx.m.id).unwrap();

        fx.clock.advance_secs(400);
        let reports = coordinator(&fx).run().unwrap();
        assert_eq!(
            reports,
            vec![RecoveryReport {
                match_id: fx.m.id,
                outcome: RecoveryOutcome::TurnExpired,
                remaining_before: Some(300),
                remaining_after: Some(0),
                downtime_seconds: 400,
                completed_turn: Some(turn.id),
            }]
        );

        let turns = fx.matches().list_turns(fx.m.id).unwrap();
        assert_eq!(turns[0].status, TurnStatus::Completed);
        assert_eq!(turns[0].ended_at, Some(fx.clock.now()));
        let timer = fx.timers().get(fx.m.id).unwrap();
        assert_eq!(timer.remaining_seconds, 0);
        assert_eq!(timer.active_turn_id, None);

        // The match is still LIVE and the next turn can start.
        assert_eq!(fx.matches().advance_turn(fx.m.id).unwrap().turn_order, 2);
    }

    #[test]
    fn short_downtime_is_deducted_once() {
        let fx = Fixture::new().live(300);
        fx.matches().advance_turn(fx.m.id).unwrap();

        fx.clock.advance_secs(100);
        let reports = coordinator(&fx).run().unwrap();
        assert_eq!(reports[0].outcome, RecoveryOutcome::Adjusted);
        assert_eq!(reports[0].remaining_after, Some(200));

        let timer = fx.timers().tick(fx.m.id).unwrap().timer;
        assert_eq!(timer.remaining_seconds, 200);
        assert_eq!(
            fx.matches().list_turns(fx.m.id).unwrap()[0].status,
            TurnStatus::Active
        );
    }

    #[test]
    fn paused_timer_is_left_alone() {
        let fx = Fixture::new().live(300);
        fx.matches().advance_turn(fx.m.id).unwrap();
        fx.timers().pause(fx.m.id).unwrap();

        fx.clock.advance_secs(1_000);
        let reports = coordinator(&fx).run().unwrap();
        assert_eq!(reports[0].outcome, RecoveryOutcome::Paused);
        assert_eq!(reports[0].remaining_after, Some(300));
        assert_eq!(reports[0].downtime_seconds, 0);
    }

    #[test]
    fn live_match_without_timer_is_reported() {
        let fx = Fixture::new().live(300);
        let reports = coordinator(&fx).run().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, RecoveryOutcome::NoTimer);
    }

    #[test]
    fn scheduled_matches_are_skipped() {
        let fx = Fixture::new();
        assert!(coordinator(&fx).run().unwrap().is_empty());
    }

    #[test]
    fn corrupt_match_fails_without_aborting_recovery() {
        let fx = Fixture::new().live(300);
        let turn = fx.matches().advance_turn(fx.m.id).unwrap();
        fx.store
            .write(|tx| {
                tx.execute(
                    "UPDATE speaker_turns SET speaker_role = 'P9' WHERE id = ?1",
                    params![turn.id.to_string()],
                )?;
                Ok(())
            })
            .unwrap();

        fx.clock.advance_secs(400);
        let reports = coordinator(&fx).run().unwrap();
        assert!(matches!(reports[0].outcome, RecoveryOutcome::Failed(_)));
        assert_eq!(
            fx.matches().get_match(fx.m.id).unwrap().status,
            MatchStatus::Live
        );
        // Nothing was half-written.
        assert_eq!(fx.timers().get(fx.m.id).unwrap().remaining_seconds, 300);
    }
}
