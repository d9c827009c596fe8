//! Single entry point bundling every component over one store.
//!
//! The presentation layer (HTTP handlers, the daemon's tick loop) talks only
//! to [`Engine`]; each call maps to one operation of the underlying state
//! machines and runs in its own transaction.

use std::path::Path;
use std::sync::Arc;

use crate::clock::{ClockSource, SystemClock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::match_machine::MatchStateMachine;
use crate::model::{
    IntegrityReport, JudgeId, Match, MatchAssignment, MatchId, Round, RoundId, RoundType,
    ScoreLock, SpeakerTurn, TeamId, TimerState, TournamentId, TurnId,
};
use crate::recovery::{RecoveryCoordinator, RecoveryReport};
use crate::round_machine::RoundStateMachine;
use crate::sequencer::TurnSequencer;
use crate::status::MatchStatus;
use crate::store::{repo, Store};
use crate::timer::{TickOutcome, TimerEngine};

/// Facade over rounds, matches, turns, timers and recovery.
#[derive(Debug, Clone)]
pub struct Engine {
    store: Store,
    rounds: RoundStateMachine,
    matches: MatchStateMachine,
    sequencer: TurnSequencer,
    timers: TimerEngine,
    recovery: RecoveryCoordinator,
}

impl Engine {
    /// Opens (or creates) the database at `path` with the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let store = Store::open(path, &config)?;
        Ok(Self::new(store, Arc::new(SystemClock), config))
    }

    /// Builds an engine over an existing store and clock.
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn ClockSource>, config: EngineConfig) -> Self {
        Self {
            rounds: RoundStateMachine::new(store.clone()),
            matches: MatchStateMachine::new(store.clone(), Arc::clone(&clock), config.clone()),
            sequencer: TurnSequencer::new(store.clone(), config.clone()),
            timers: TimerEngine::new(store.clone(), Arc::clone(&clock), config),
            recovery: RecoveryCoordinator::new(store.clone(), clock),
            store,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    // Rounds

    /// See [`RoundStateMachine::create_round`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn create_round(
        &self,
        tournament_id: TournamentId,
        round_number: u32,
        round_type: RoundType,
        bench_count: u32,
    ) -> Result<Round, EngineError> {
        self.rounds
            .create_round(tournament_id, round_number, round_type, bench_count)
    }

    /// See [`RoundStateMachine::assign_matches`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn assign_matches(
        &self,
        round_id: RoundId,
        assignments: &[MatchAssignment],
    ) -> Result<Vec<Match>, EngineError> {
        self.rounds.assign_matches(round_id, assignments)
    }

    /// See [`RoundStateMachine::start_round`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn start_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.rounds.start_round(round_id)
    }

    /// See [`RoundStateMachine::complete_round`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn complete_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.rounds.complete_round(round_id)
    }

    /// See [`RoundStateMachine::freeze_round`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn freeze_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.rounds.freeze_round(round_id)
    }

    /// See [`RoundStateMachine::get_round`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown round.
    pub fn get_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.rounds.get_round(round_id)
    }

    /// See [`RoundStateMachine::list_matches`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown round.
    pub fn list_matches(&self, round_id: RoundId) -> Result<Vec<Match>, EngineError> {
        self.rounds.list_matches(round_id)
    }

    // Matches and turns

    /// See [`TurnSequencer::generate`].
    ///
    /// # Errors
    ///
    /// Propagates the sequencer's errors.
    pub fn generate_turns(
        &self,
        match_id: MatchId,
        petitioner_team_id: TeamId,
        respondent_team_id: TeamId,
        allocated_seconds: u32,
    ) -> Result<Vec<SpeakerTurn>, EngineError> {
        self.sequencer.generate(
            match_id,
            petitioner_team_id,
            respondent_team_id,
            allocated_seconds,
        )
    }

    /// See [`MatchStateMachine::start`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn start_match(&self, match_id: MatchId) -> Result<Match, EngineError> {
        self.matches.start(match_id)
    }

    /// See [`MatchStateMachine::advance_turn`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn advance_turn(&self, match_id: MatchId) -> Result<SpeakerTurn, EngineError> {
        self.matches.advance_turn(match_id)
    }

    /// See [`MatchStateMachine::complete_turn`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn complete_turn(&self, turn_id: TurnId) -> Result<SpeakerTurn, EngineError> {
        self.matches.complete_turn(turn_id)
    }

    /// See [`MatchStateMachine::begin_scoring`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn begin_scoring(&self, match_id: MatchId) -> Result<Match, EngineError> {
        self.matches.begin_scoring(match_id)
    }

    /// See [`MatchStateMachine::complete_match`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn complete_match(
        &self,
        match_id: MatchId,
        winner_team_id: Option<TeamId>,
    ) -> Result<Match, EngineError> {
        self.matches.complete_match(match_id, winner_team_id)
    }

    /// See [`MatchStateMachine::freeze`].
    ///
    /// # Errors
    ///
    /// Propagates the state machine's errors.
    pub fn freeze_match(
        &self,
        match_id: MatchId,
        petitioner_score: f64,
        respondent_score: f64,
        winner_team_id: TeamId,
        judge_ids: &[JudgeId],
    ) -> Result<ScoreLock, EngineError> {
        self.matches.freeze(
            match_id,
            petitioner_score,
            respondent_score,
            winner_team_id,
            judge_ids,
        )
    }

    /// See [`MatchStateMachine::verify_integrity`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown match.
    pub fn verify_match_integrity(
        &self,
        match_id: MatchId,
    ) -> Result<IntegrityReport, EngineError> {
        self.matches.verify_integrity(match_id)
    }

    /// See [`MatchStateMachine::get_match`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown match.
    pub fn get_match(&self, match_id: MatchId) -> Result<Match, EngineError> {
        self.matches.get_match(match_id)
    }

    /// See [`MatchStateMachine::list_turns`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown match.
    pub fn list_turns(&self, match_id: MatchId) -> Result<Vec<SpeakerTurn>, EngineError> {
        self.matches.list_turns(match_id)
    }

    /// See [`MatchStateMachine::get_score_lock`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match is not frozen.
    pub fn get_score_lock(&self, match_id: MatchId) -> Result<ScoreLock, EngineError> {
        self.matches.get_score_lock(match_id)
    }

    /// Ids of every LIVE match, for the tick loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_live_matches(&self) -> Result<Vec<MatchId>, EngineError> {
        self.store
            .read(|conn| repo::match_ids_with_status(conn, MatchStatus::Live))
    }

    // Timers

    /// See [`TimerEngine::initialize`].
    ///
    /// # Errors
    ///
    /// Propagates the timer engine's errors.
    pub fn initialize_timer(
        &self,
        match_id: MatchId,
        active_turn_id: Option<TurnId>,
        remaining_seconds: u32,
    ) -> Result<TimerState, EngineError> {
        self.timers
            .initialize(match_id, active_turn_id, remaining_seconds)
    }

    /// See [`TimerEngine::tick`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn tick(&self, match_id: MatchId) -> Result<TickOutcome, EngineError> {
        self.timers.tick(match_id)
    }

    /// See [`TimerEngine::pause`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn pause(&self, match_id: MatchId) -> Result<TimerState, EngineError> {
        self.timers.pause(match_id)
    }

    /// See [`TimerEngine::resume`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn resume(&self, match_id: MatchId) -> Result<TimerState, EngineError> {
        self.timers.resume(match_id)
    }

    /// See [`TimerEngine::get`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn get_timer_state(&self, match_id: MatchId) -> Result<TimerState, EngineError> {
        self.timers.get(match_id)
    }

    // Recovery

    /// See [`RecoveryCoordinator::run`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the LIVE matches cannot be listed.
    pub fn run_startup_recovery(&self) -> Result<Vec<RecoveryReport>, EngineError> {
        self.recovery.run()
    }
}
