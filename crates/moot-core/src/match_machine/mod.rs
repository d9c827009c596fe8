//! Match lifecycle: start, turn progression, completion, freeze and
//! integrity verification.
//!
//! ```text
//! SCHEDULED --start--> LIVE --begin_scoring--> SCORING
//!                        |                        |
//!                        +----complete_match------+--> COMPLETED --freeze--> FROZEN
//! ```
//!
//! Every mutation runs in one immediate transaction: lock, validate, write,
//! commit. Turn progression is strictly ordered; turn `n + 1` only becomes
//! ACTIVE once turn `n` is COMPLETED.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::clock::ClockSource;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::integrity::{FreezeInput, IntegrityLedger};
use crate::model::{
    IntegrityReport, JudgeId, Match, MatchId, ScoreLock, SpeakerTurn, TeamId, TurnId,
};
use crate::sequencer::{TurnSequencer, TURN_COUNT};
use crate::status::{ensure_transition, MatchStatus, RoundStatus, TurnStatus};
use crate::store::{repo, Store};
use crate::timer;

/// Drives a match through its lifecycle.
#[derive(Debug, Clone)]
pub struct MatchStateMachine {
    store: Store,
    clock: Arc<dyn ClockSource>,
    config: EngineConfig,
}

impl MatchStateMachine {
    /// Creates a state machine over `store`.
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn ClockSource>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Moves a SCHEDULED match with a complete turn sequence to LIVE.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match does not exist
    /// - [`EngineError::InvalidStateTransition`] if the match is not
    ///   SCHEDULED, does not have exactly six turns, or (when
    ///   `require_live_round` is set) its round is not LIVE
    /// - [`EngineError::Validation`] if the persisted turns deviate from the
    ///   fixed sequence
    pub fn start(&self, match_id: MatchId) -> Result<Match, EngineError> {
        let m = self.store.write(|tx| {
            let mut m = repo::lock_match(tx, match_id)?;
            ensure_transition(m.id, m.status, MatchStatus::Live, "match must be SCHEDULED")?;

            let turns = repo::list_turns(tx, match_id)?;
            if turns.len() != TURN_COUNT {
                return Err(EngineError::invalid_transition(
                    "match",
                    match_id,
                    m.status,
                    "move to LIVE",
                    format!("expected {TURN_COUNT} speaker turns, found {}", turns.len()),
                ));
            }
            TurnSequencer::validate(&m, &turns)?;

            if self.config.require_live_round {
                let round = repo::lock_round(tx, m.round_id)?;
                if round.status != RoundStatus::Live {
                    return Err(EngineError::invalid_transition(
                        "match",
                        match_id,
                        m.status,
                        "move to LIVE",
                        format!("round {} is {}, not LIVE", round.id, round.status),
                    ));
                }
            }

            m.status = MatchStatus::Live;
            repo::update_match(tx, &m)?;
            Ok(m)
        })?;
        info!(match_id = %match_id, bench_number = m.bench_number, "match started");
        Ok(m)
    }

    /// Activates the first PENDING turn of a LIVE match.
    ///
    /// When `arm_timer_on_advance` is set the match timer is pointed at the
    /// new turn with its full allocation in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match does not exist
    /// - [`EngineError::InvalidStateTransition`] if the match is not LIVE
    /// - [`EngineError::Conflict`] if a turn is already ACTIVE
    /// - [`EngineError::Validation`] if no PENDING turn remains
    pub fn advance_turn(&self, match_id: MatchId) -> Result<SpeakerTurn, EngineError> {
        let now = self.clock.now();
        let turn = self.store.write(|tx| {
            let m = repo::lock_match(tx, match_id)?;
            if m.status != MatchStatus::Live {
                return Err(EngineError::invalid_transition(
                    "match",
                    match_id,
                    m.status,
                    "advance turn",
                    "match must be LIVE",
                ));
            }

            let turns = repo::list_turns(tx, match_id)?;
            if let Some(active) = turns.iter().find(|t| t.status == TurnStatus::Active) {
                return Err(EngineError::conflict(
                    "match",
                    match_id,
                    format!("turn {} ({}) is still ACTIVE", active.turn_order, active.speaker_role),
                ));
            }
            let mut next = turns
                .into_iter()
                .find(|t| t.status == TurnStatus::Pending)
                .ok_or_else(|| EngineError::validation("turns", "no pending turns"))?;

            next.status = TurnStatus::Active;
            next.started_at = Some(now);
            repo::update_turn(tx, &next)?;
            if self.config.arm_timer_on_advance {
                timer::arm_locked(tx, &next, now)?;
            }
            Ok(next)
        })?;
        info!(
            match_id = %match_id,
            turn_id = %turn.id,
            turn_order = turn.turn_order,
            speaker_role = %turn.speaker_role,
            "turn activated"
        );
        Ok(turn)
    }

    /// Completes an ACTIVE turn, recording how long the speaker took.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the turn does not exist
    /// - [`EngineError::InvalidStateTransition`] if the turn is not ACTIVE
    ///   or its match is FROZEN
    pub fn complete_turn(&self, turn_id: TurnId) -> Result<SpeakerTurn, EngineError> {
        let now = self.clock.now();
        let turn = self.store.write(|tx| complete_turn_locked(tx, turn_id, now))?;
        info!(
            match_id = %turn.match_id,
            turn_id = %turn_id,
            turn_order = turn.turn_order,
            actual_seconds = ?turn.actual_seconds,
            "turn completed"
        );
        Ok(turn)
    }

    /// Hands a LIVE match whose turns are all done over to scoring.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match does not exist
    /// - [`EngineError::InvalidStateTransition`] if the match is not LIVE
    /// - [`EngineError::Validation`] if a turn is not yet completed
    pub fn begin_scoring(&self, match_id: MatchId) -> Result<Match, EngineError> {
        let m = self.store.write(|tx| {
            let mut m = repo::lock_match(tx, match_id)?;
            ensure_transition(m.id, m.status, MatchStatus::Scoring, "match must be LIVE")?;
            ensure_turns_done(tx, match_id)?;
            m.status = MatchStatus::Scoring;
            repo::update_match(tx, &m)?;
            Ok(m)
        })?;
        info!(match_id = %match_id, "match scoring started");
        Ok(m)
    }

    /// Records the winner and moves the match to COMPLETED.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match does not exist
    /// - [`EngineError::InvalidStateTransition`] unless LIVE or SCORING
    /// - [`EngineError::Validation`] for a missing or foreign winner, or
    ///   turns that are not completed
    pub fn complete_match(
        &self,
        match_id: MatchId,
        winner_team_id: Option<TeamId>,
    ) -> Result<Match, EngineError> {
        let m = self.store.write(|tx| {
            let mut m = repo::lock_match(tx, match_id)?;
            ensure_transition(
                m.id,
                m.status,
                MatchStatus::Completed,
                "match must be LIVE or SCORING",
            )?;
            let winner = winner_team_id
                .ok_or_else(|| EngineError::validation("winner_team_id", "a winner is required"))?;
            if !m.involves(winner) {
                return Err(EngineError::validation(
                    "winner_team_id",
                    format!("team {winner} does not play in match {match_id}"),
                ));
            }
            ensure_turns_done(tx, match_id)?;

            m.status = MatchStatus::Completed;
            m.winner_team_id = Some(winner);
            m.locked = true;
            repo::update_match(tx, &m)?;
            Ok(m)
        })?;
        info!(
            match_id = %match_id,
            winner_team_id = ?m.winner_team_id,
            "match completed"
        );
        Ok(m)
    }

    /// Freezes a COMPLETED match: persists the immutable [`ScoreLock`],
    /// locks every turn and moves the match to FROZEN.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match does not exist
    /// - [`EngineError::Conflict`] if the match already has a score lock
    /// - [`EngineError::InvalidStateTransition`] unless COMPLETED
    /// - [`EngineError::Validation`] for invalid scores, an empty or
    ///   duplicated judge list, or a winner other than the recorded one
    pub fn freeze(
        &self,
        match_id: MatchId,
        petitioner_score: f64,
        respondent_score: f64,
        winner_team_id: TeamId,
        judge_ids: &[JudgeId],
    ) -> Result<ScoreLock, EngineError> {
        let now = self.clock.now();
        let lock = self.store.write(|tx| {
            let mut m = repo::lock_match(tx, match_id)?;
            if repo::find_score_lock(tx, match_id)?.is_some() {
                return Err(EngineError::conflict("match", match_id, "match is already frozen"));
            }
            ensure_transition(m.id, m.status, MatchStatus::Frozen, "match must be COMPLETED")?;
            if m.winner_team_id != Some(winner_team_id) {
                return Err(EngineError::validation(
                    "winner_team_id",
                    format!("team {winner_team_id} is not the recorded winner"),
                ));
            }
            let judge_ids = sorted_unique_judges(judge_ids)?;

            let mut turns = repo::list_turns(tx, match_id)?;
            let turn_ids: Vec<TurnId> = turns.iter().map(|t| t.id).collect();
            let frozen_hash = IntegrityLedger::hash(&FreezeInput {
                match_id,
                turn_ids: &turn_ids,
                petitioner_score,
                respondent_score,
                winner_team_id,
                judge_ids: &judge_ids,
            })?;

            let lock = ScoreLock {
                match_id,
                total_petitioner_score: petitioner_score,
                total_respondent_score: respondent_score,
                winner_team_id,
                judge_ids,
                frozen_at: now,
                frozen_hash,
            };
            repo::insert_score_lock(tx, &lock)?;

            for turn in turns.iter_mut().filter(|t| t.status == TurnStatus::Completed) {
                turn.status = TurnStatus::Locked;
                repo::update_turn(tx, turn)?;
            }
            m.status = MatchStatus::Frozen;
            repo::update_match(tx, &m)?;
            Ok(lock)
        })?;
        info!(
            match_id = %match_id,
            frozen_hash = %lock.frozen_hash,
            judges = lock.judge_ids.len(),
            "match frozen"
        );
        Ok(lock)
    }

    /// Recomputes the freeze hash from current state and compares it with
    /// the stored one.
    ///
    /// A match without a score lock reports `valid = false` with no hashes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match does not exist.
    pub fn verify_integrity(&self, match_id: MatchId) -> Result<IntegrityReport, EngineError> {
        self.store.read(|conn| verify_locked(conn, match_id))
    }

    /// Like [`Self::verify_integrity`], but fails when the result is not
    /// valid.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match does not exist
    /// - [`EngineError::IntegrityViolation`] if the match is not frozen or
    ///   its hash no longer matches
    pub fn ensure_integrity(&self, match_id: MatchId) -> Result<IntegrityReport, EngineError> {
        self.store.read(|conn| ensure_locked(conn, match_id))
    }

    /// Returns a match.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match does not exist.
    pub fn get_match(&self, match_id: MatchId) -> Result<Match, EngineError> {
        self.store.read(|conn| repo::lock_match(conn, match_id))
    }

    /// Returns the turns of a match ordered by `turn_order`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match does not exist.
    pub fn list_turns(&self, match_id: MatchId) -> Result<Vec<SpeakerTurn>, EngineError> {
        self.store.read(|conn| {
            repo::lock_match(conn, match_id)?;
            repo::list_turns(conn, match_id)
        })
    }

    /// Returns the score lock of a frozen match.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no score lock.
    pub fn get_score_lock(&self, match_id: MatchId) -> Result<ScoreLock, EngineError> {
        self.store.read(|conn| {
            repo::find_score_lock(conn, match_id)?
                .ok_or_else(|| EngineError::not_found("score_lock", match_id))
        })
    }
}

/// Completes an ACTIVE turn inside the caller's transaction.
///
/// Shared by [`MatchStateMachine::complete_turn`], timer expiry and crash
/// recovery. Clears the match timer's `active_turn_id` when it points at the
/// completed turn.
pub(crate) fn complete_turn_locked(
    conn: &Connection,
    turn_id: TurnId,
    now: DateTime<Utc>,
) -> Result<SpeakerTurn, EngineError> {
    let mut turn = repo::lock_turn(conn, turn_id)?;
    let m = repo::lock_match(conn, turn.match_id)?;
    if m.status == MatchStatus::Frozen {
        return Err(EngineError::invalid_transition(
            "match",
            m.id,
            m.status,
            format!("complete turn {turn_id}"),
            "match is frozen",
        ));
    }
    ensure_transition(turn.id, turn.status, TurnStatus::Completed, "turn must be ACTIVE")?;

    turn.status = TurnStatus::Completed;
    turn.ended_at = Some(now);
    turn.actual_seconds = Some(elapsed_seconds(turn.started_at, now));
    repo::update_turn(conn, &turn)?;

    if let Some(mut timer) = repo::find_timer(conn, m.id)? {
        if timer.active_turn_id == Some(turn_id) {
            timer.active_turn_id = None;
            repo::upsert_timer(conn, &timer)?;
        }
    }
    Ok(turn)
}

/// Integrity check inside the caller's transaction or snapshot.
pub(crate) fn verify_locked(
    conn: &Connection,
    match_id: MatchId,
) -> Result<IntegrityReport, EngineError> {
    let m = repo::lock_match(conn, match_id)?;
    let frozen = m.status == MatchStatus::Frozen;
    let Some(lock) = repo::find_score_lock(conn, match_id)? else {
        return Ok(IntegrityReport {
            match_id,
            valid: false,
            frozen,
            stored_hash: None,
            computed_hash: None,
        });
    };

    let turn_ids: Vec<TurnId> = repo::list_turns(conn, match_id)?
        .iter()
        .map(|t| t.id)
        .collect();
    let input = FreezeInput {
        match_id,
        turn_ids: &turn_ids,
        petitioner_score: lock.total_petitioner_score,
        respondent_score: lock.total_respondent_score,
        winner_team_id: lock.winner_team_id,
        judge_ids: &lock.judge_ids,
    };
    // Tampered rows can hold scores the ledger refuses to encode; that is a
    // mismatch, not a failure of the check.
    let (hash_ok, computed_hash) = match IntegrityLedger::verify(&lock.frozen_hash, &input) {
        Ok((hash_ok, computed)) => (hash_ok, Some(computed)),
        Err(EngineError::Validation { .. }) => (false, None),
        Err(other) => return Err(other),
    };
    if !hash_ok {
        warn!(
            match_id = %match_id,
            stored_hash = %lock.frozen_hash,
            computed_hash = computed_hash.as_deref().unwrap_or("<unencodable>"),
            "freeze hash mismatch"
        );
    }

    Ok(IntegrityReport {
        match_id,
        valid: hash_ok && frozen,
        frozen,
        stored_hash: Some(lock.frozen_hash),
        computed_hash,
    })
}

/// [`verify_locked`] that turns an invalid report into an error.
pub(crate) fn ensure_locked(
    conn: &Connection,
    match_id: MatchId,
) -> Result<IntegrityReport, EngineError> {
    let report = verify_locked(conn, match_id)?;
    if report.valid {
        return Ok(report);
    }
    Err(EngineError::IntegrityViolation {
        match_id: match_id.to_string(),
        stored_hash: report.stored_hash.unwrap_or_else(|| "<none>".to_string()),
        computed_hash: report
            .computed_hash
            .unwrap_or_else(|| "<unencodable>".to_string()),
    })
}

fn ensure_turns_done(conn: &Connection, match_id: MatchId) -> Result<(), EngineError> {
    let turns = repo::list_turns(conn, match_id)?;
    let open = turns.iter().filter(|t| !t.status.is_done()).count();
    if turns.is_empty() || open > 0 {
        return Err(EngineError::validation(
            "turns",
            format!("{open} of {} turns are not completed", turns.len()),
        ));
    }
    Ok(())
}

fn sorted_unique_judges(judge_ids: &[JudgeId]) -> Result<Vec<JudgeId>, EngineError> {
    if judge_ids.is_empty() {
        return Err(EngineError::validation("judge_ids", "at least one judge is required"));
    }
    let mut sorted = judge_ids.to_vec();
    sorted.sort_unstable();
    if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(EngineError::validation(
            "judge_ids",
            format!("judge {} listed more than once", pair[0]),
        ));
    }
    Ok(sorted)
}

/// Whole seconds between `started_at` and `now`, floored and clamped at 0.
fn elapsed_seconds(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
    started_at.map_or(0, |start| {
        let secs = now.signed_duration_since(start).num_seconds().max(0);
        u32::try_from(secs).unwrap_or(u32::MAX)
    })
}
