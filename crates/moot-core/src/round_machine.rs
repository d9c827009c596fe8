//! Round lifecycle and bench assignment.
//!
//! ```text
//! SCHEDULED (assign_matches*) --start_round--> LIVE --complete_round--> COMPLETED --freeze_round--> FROZEN
//! ```
//!
//! Each mutation locks the round before reading its matches.

use std::collections::HashSet;

use tracing::info;

use crate::error::EngineError;
use crate::match_machine;
use crate::model::{Match, MatchAssignment, MatchId, Round, RoundId, RoundType, TournamentId};
use crate::status::{ensure_transition, MatchStatus, RoundStatus};
use crate::store::{repo, Store};

/// Drives a round through its lifecycle.
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    store: Store,
}

impl RoundStateMachine {
    /// Creates a state machine over `store`.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates a SCHEDULED round.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] if `round_number` or `bench_count` is 0
    /// - [`EngineError::Conflict`] if the tournament already has a round with
    ///   this number
    pub fn create_round(
        &self,
        tournament_id: TournamentId,
        round_number: u32,
        round_type: RoundType,
        bench_count: u32,
    ) -> Result<Round, EngineError> {
        if round_number == 0 {
            return Err(EngineError::validation("round_number", "must be at least 1"));
        }
        if bench_count == 0 {
            return Err(EngineError::validation("bench_count", "must be at least 1"));
        }
        let round = Round {
            id: RoundId::new_v4(),
            tournament_id,
            round_number,
            round_type,
            status: RoundStatus::Scheduled,
            bench_count,
        };
        self.store.write(|tx| {
            if repo::round_number_taken(tx, tournament_id, round_number)? {
                return Err(EngineError::conflict(
                    "round",
                    tournament_id,
                    format!("round {round_number} already exists in this tournament"),
                ));
            }
            repo::insert_round(tx, &round)
        })?;
        info!(
            round_id = %round.id,
            tournament_id = %tournament_id,
            round_number,
            round_type = %round_type,
            bench_count,
            "round created"
        );
        Ok(round)
    }

    /// Creates one SCHEDULED match per assignment, all or nothing.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the round does not exist
    /// - [`EngineError::InvalidStateTransition`] unless the round is
    ///   SCHEDULED
    /// - [`EngineError::Conflict`] if a bench is already taken, in this call
    ///   or by a persisted match
    /// - [`EngineError::Validation`] for an out-of-range bench, a team paired
    ///   with itself, or a team that already plays in this round
    pub fn assign_matches(
        &self,
        round_id: RoundId,
        assignments: &[MatchAssignment],
    ) -> Result<Vec<Match>, EngineError> {
        let created = self.store.write(|tx| {
            let round = repo::lock_round(tx, round_id)?;
            if round.status != RoundStatus::Scheduled {
                return Err(EngineError::invalid_transition(
                    "round",
                    round_id,
                    round.status,
                    "assign matches",
                    "round must be SCHEDULED",
                ));
            }
            if assignments.is_empty() {
                return Err(EngineError::validation(
                    "assignments",
                    "at least one assignment is required",
                ));
            }

            let existing = repo::list_matches(tx, round_id)?;
            let mut benches: HashSet<u32> = existing.iter().map(|m| m.bench_number).collect();
            let mut teams: HashSet<_> = existing
                .iter()
                .flat_map(|m| [m.petitioner_team_id, m.respondent_team_id])
                .collect();

            let mut created = Vec::with_capacity(assignments.len());
            for a in assignments {
                if !(1..=round.bench_count).contains(&a.bench_number) {
                    return Err(EngineError::validation(
                        "bench_number",
                        format!("{} outside 1..={}", a.bench_number, round.bench_count),
                    ));
                }
                if !benches.insert(a.bench_number) {
                    return Err(EngineError::conflict(
                        "round",
                        round_id,
                        format!("bench {} is already assigned", a.bench_number),
                    ));
                }
                if a.petitioner_team_id == a.respondent_team_id {
                    return Err(EngineError::validation(
                        "respondent_team_id",
                        format!("bench {}: a team cannot face itself", a.bench_number),
                    ));
                }
                for team in [a.petitioner_team_id, a.respondent_team_id] {
                    if !teams.insert(team) {
                        return Err(EngineError::validation(
                            "team_id",
                            format!("team {team} already plays in round {round_id}"),
                        ));
                    }
                }

                let m = Match {
                    id: MatchId::new_v4(),
                    round_id,
                    bench_number: a.bench_number,
                    petitioner_team_id: a.petitioner_team_id,
                    respondent_team_id: a.respondent_team_id,
                    status: MatchStatus::Scheduled,
                    winner_team_id: None,
                    locked: false,
                };
                repo::insert_match(tx, &m)?;
                created.push(m);
            }
            Ok(created)
        })?;
        info!(round_id = %round_id, matches = created.len(), "matches assigned");
        Ok(created)
    }

    /// Moves a SCHEDULED round with at least one match to LIVE.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the round does not exist
    /// - [`EngineError::InvalidStateTransition`] unless SCHEDULED with at
    ///   least one match
    pub fn start_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        let round = self.store.write(|tx| {
            let mut round = repo::lock_round(tx, round_id)?;
            ensure_transition(
                round.id,
                round.status,
                RoundStatus::Live,
                "round must be SCHEDULED",
            )?;
            if repo::list_matches(tx, round_id)?.is_empty() {
                return Err(EngineError::invalid_transition(
                    "round",
                    round_id,
                    round.status,
                    "move to LIVE",
                    "round has no matches",
                ));
            }
            round.status = RoundStatus::Live;
            repo::update_round_status(tx, &round)?;
            Ok(round)
        })?;
        info!(round_id = %round_id, round_number = round.round_number, "round started");
        Ok(round)
    }

    /// Moves a LIVE round whose matches are all COMPLETED or FROZEN to
    /// COMPLETED.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the round does not exist
    /// - [`EngineError::InvalidStateTransition`] unless LIVE
    /// - [`EngineError::Validation`] if a match is still running
    pub fn complete_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        let round = self.store.write(|tx| {
            let mut round = repo::lock_round(tx, round_id)?;
            ensure_transition(
                round.id,
                round.status,
                RoundStatus::Completed,
                "round must be LIVE",
            )?;
            let matches = repo::list_matches(tx, round_id)?;
            let open: Vec<u32> = matches
                .iter()
                .filter(|m| !m.status.is_finished())
                .map(|m| m.bench_number)
                .collect();
            if !open.is_empty() {
                return Err(EngineError::validation(
                    "matches",
                    format!("matches on benches {open:?} are not finished"),
                ));
            }
            round.status = RoundStatus::Completed;
            repo::update_round_status(tx, &round)?;
            Ok(round)
        })?;
        info!(round_id = %round_id, "round completed");
        Ok(round)
    }

    /// Freezes a COMPLETED round once every match is FROZEN, re-verifying
    /// each freeze hash.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the round does not exist
    /// - [`EngineError::InvalidStateTransition`] unless COMPLETED
    /// - [`EngineError::Validation`] if any match is not yet FROZEN
    /// - [`EngineError::IntegrityViolation`] if a frozen match no longer
    ///   matches its freeze hash
    pub fn freeze_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        let (round, verified) = self.store.write(|tx| {
            let mut round = repo::lock_round(tx, round_id)?;
            ensure_transition(
                round.id,
                round.status,
                RoundStatus::Frozen,
                "round must be COMPLETED",
            )?;
            let matches = repo::list_matches(tx, round_id)?;
            let unsealed: Vec<u32> = matches
                .iter()
                .filter(|m| m.status != MatchStatus::Frozen)
                .map(|m| m.bench_number)
                .collect();
            if !unsealed.is_empty() {
                return Err(EngineError::validation(
                    "matches",
                    format!("matches on benches {unsealed:?} are not frozen"),
                ));
            }
            for m in &matches {
                match_machine::ensure_locked(tx, m.id)?;
            }
            let verified = matches.len();
            round.status = RoundStatus::Frozen;
            repo::update_round_status(tx, &round)?;
            Ok((round, verified))
        })?;
        info!(round_id = %round_id, verified_matches = verified, "round frozen");
        Ok(round)
    }

    /// Returns a round.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the round does not exist.
    pub fn get_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.store.read(|conn| repo::lock_round(conn, round_id))
    }

    /// Returns the matches of a round ordered by bench.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the round does not exist.
    pub fn list_matches(&self, round_id: RoundId) -> Result<Vec<Match>, EngineError> {
        self.store.read(|conn| {
            repo::lock_round(conn, round_id)?;
            repo::list_matches(conn, round_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::params;
    use uuid::Uuid;

    use super::*;
    use crate::model::{JudgeId, TeamId};
    use crate::testutil::Fixture;

    fn pairing(bench_number: u32) -> MatchAssignment {
        MatchAssignment {
            bench_number,
            petitioner_team_id: TeamId::new_v4(),
            respondent_team_id: TeamId::new_v4(),
        }
    }

    fn empty_round(fx: &Fixture, round_number: u32) -> Round {
        fx.rounds()
            .create_round(fx.round.tournament_id, round_number, RoundType::Quarter, 3)
            .unwrap()
    }

    #[test]
    fn create_round_validates_and_rejects_duplicates() {
        let fx = Fixture::new();
        let rounds = fx.rounds();
        let round = empty_round(&fx, 2);
        assert_eq!(round.status, RoundStatus::Scheduled);
        assert_eq!(rounds.get_round(round.id).unwrap(), round);

        let dup = rounds
            .create_round(fx.round.tournament_id, 2, RoundType::Prelim, 3)
            .unwrap_err();
        assert!(matches!(dup, EngineError::Conflict { .. }));

        // Same number in another tournament is fine.
        rounds
            .create_round(TournamentId::new_v4(), 2, RoundType::Prelim, 3)
            .unwrap();

        assert!(matches!(
            rounds.create_round(fx.round.tournament_id, 0, RoundType::Prelim, 3),
            Err(EngineError::Validation { field: "round_number", .. })
        ));
        assert!(matches!(
            rounds.create_round(fx.round.tournament_id, 9, RoundType::Prelim, 0),
            Err(EngineError::Validation { field: "bench_count", .. })
        ));
    }

    #[test]
    fn assign_matches_creates_scheduled_matches_in_bench_order() {
        let fx = Fixture::new();
        let round = empty_round(&fx, 2);
        let created = fx
            .rounds()
            .assign_matches(round.id, &[pairing(3), pairing(1)])
            .unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|m| m.status == MatchStatus::Scheduled));

        let listed = fx.rounds().list_matches(round.id).unwrap();
        let benches: Vec<u32> = listed.iter().map(|m| m.bench_number).collect();
        assert_eq!(benches, vec![1, 3]);
    }

    #[test]
    fn duplicate_benches_are_rejected_atomically() {
        let fx = Fixture::new();
        let round = empty_round(&fx, 2);
        let rounds = fx.rounds();

        let err = rounds
            .assign_matches(round.id, &[pairing(1), pairing(2), pairing(1)])
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert!(rounds.list_matches(round.id).unwrap().is_empty());

        rounds.assign_matches(round.id, &[pairing(2)]).unwrap();
        let err = rounds
            .assign_matches(round.id, &[pairing(1), pairing(2)])
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));
        assert_eq!(rounds.list_matches(round.id).unwrap().len(), 1);
    }

    #[test]
    fn assignments_validate_benches_and_teams() {
        let fx = Fixture::new();
        let round = empty_round(&fx, 2);
        let rounds = fx.rounds();

        assert!(matches!(
            rounds.assign_matches(round.id, &[pairing(4)]),
            Err(EngineError::Validation { field: "bench_number", .. })
        ));
        assert!(matches!(
            rounds.assign_matches(round.id, &[]),
            Err(EngineError::Validation { .. })
        ));

        let team = TeamId::new_v4();
        let self_play = MatchAssignment {
            bench_number: 1,
            petitioner_team_id: team,
            respondent_team_id: team,
        };
        assert!(matches!(
            rounds.assign_matches(round.id, &[self_play]),
            Err(EngineError::Validation { field: "respondent_team_id", .. })
        ));

        let first = pairing(1);
        let twice = MatchAssignment {
            bench_number: 2,
            petitioner_team_id: TeamId::new_v4(),
            respondent_team_id: first.petitioner_team_id,
        };
        assert!(matches!(
            rounds.assign_matches(round.id, &[first, twice]),
            Err(EngineError::Validation { field: "team_id", .. })
        ));
    }

    #[test]
    fn assignment_requires_scheduled_round() {
        let fx = Fixture::new();
        fx.rounds().start_round(fx.round.id).unwrap();
        assert!(matches!(
            fx.rounds().assign_matches(fx.round.id, &[pairing(2)]),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn start_requires_a_match() {
        let fx = Fixture::new();
        let round = empty_round(&fx, 2);
        assert!(matches!(
            fx.rounds().start_round(round.id),
            Err(EngineError::InvalidStateTransition { .. })
        ));
        let live = fx.rounds().start_round(fx.round.id).unwrap();
        assert_eq!(live.status, RoundStatus::Live);
    }

    #[test]
    fn complete_waits_for_every_match() {
        let fx = Fixture::new().live(60);
        fx.rounds().start_round(fx.round.id).unwrap();
        assert!(matches!(
            fx.rounds().complete_round(fx.round.id),
            Err(EngineError::Validation { field: "matches", .. })
        ));

        fx.argue_all_turns();
        fx.matches()
            .complete_match(fx.m.id, Some(fx.m.respondent_team_id))
            .unwrap();
        let round = fx.rounds().complete_round(fx.round.id).unwrap();
        assert_eq!(round.status, RoundStatus::Completed);
    }

    fn completed_round_with_frozen_match(fx: &Fixture) {
        fx.rounds().start_round(fx.round.id).unwrap();
        fx.argue_all_turns();
        fx.matches()
            .complete_match(fx.m.id, Some(fx.m.petitioner_team_id))
            .unwrap();
        fx.matches()
            .freeze(
                fx.m.id,
                182.0,
                176.5,
                fx.m.petitioner_team_id,
                &[JudgeId(Uuid::from_u128(1)), JudgeId(Uuid::from_u128(2))],
            )
            .unwrap();
        fx.rounds().complete_round(fx.round.id).unwrap();
    }

    #[test]
    fn freeze_round_verifies_frozen_matches() {
        let fx = Fixture::new().live(60);
        completed_round_with_frozen_match(&fx);
        let round = fx.rounds().freeze_round(fx.round.id).unwrap();
        assert_eq!(round.status, RoundStatus::Frozen);
        assert!(matches!(
            fx.rounds().freeze_round(fx.round.id),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn freeze_round_requires_every_match_frozen() {
        let fx = Fixture::new().live(60);
        fx.rounds().start_round(fx.round.id).unwrap();
        fx.argue_all_turns();
        fx.matches()
            .complete_match(fx.m.id, Some(fx.m.petitioner_team_id))
            .unwrap();
        fx.rounds().complete_round(fx.round.id).unwrap();

        let err = fx.rounds().freeze_round(fx.round.id).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "matches", .. }));
        assert!(err.to_string().contains("[1]"), "{err}");
        assert_eq!(
            fx.rounds().get_round(fx.round.id).unwrap().status,
            RoundStatus::Completed
        );

        fx.matches()
            .freeze(
                fx.m.id,
                150.0,
                149.5,
                fx.m.petitioner_team_id,
                &[JudgeId(Uuid::from_u128(7))],
            )
            .unwrap();
        let round = fx.rounds().freeze_round(fx.round.id).unwrap();
        assert_eq!(round.status, RoundStatus::Frozen);
    }

    #[test]
    fn freeze_round_refuses_tampered_match() {
        let fx = Fixture::new().live(60);
        completed_round_with_frozen_match(&fx);
        fx.store
            .write(|tx| {
                tx.execute_batch("DROP TRIGGER score_locks_no_update;")?;
                tx.execute(
                    "UPDATE score_locks SET winner_team_id = ?1 WHERE match_id = ?2",
                    params![fx.m.respondent_team_id.to_string(), fx.m.id.to_string()],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            fx.rounds().freeze_round(fx.round.id),
            Err(EngineError::IntegrityViolation { .. })
        ));
        assert_eq!(
            fx.rounds().get_round(fx.round.id).unwrap().status,
            RoundStatus::Completed
        );
    }
}
