//! The fixed six-step speaker sequence.
//!
//! Every match argues in the same order:
//!
//! | order | role         | side       |
//! |-------|--------------|------------|
//! | 1     | `P1`         | petitioner |
//! | 2     | `P2`         | petitioner |
//! | 3     | `R1`         | respondent |
//! | 4     | `R2`         | respondent |
//! | 5     | `REBUTTAL_P` | petitioner |
//! | 6     | `REBUTTAL_R` | respondent |
//!
//! Freeze hashes and downstream analytics depend on this exact table.

use rusqlite::Connection;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{Match, MatchId, SpeakerRole, SpeakerTurn, TeamId, TurnId};
use crate::status::{MatchStatus, TurnStatus};
use crate::store::{repo, Store};

/// Roles in speaking order; position + 1 is the turn order.
pub const TURN_SEQUENCE: [SpeakerRole; 6] = [
    SpeakerRole::P1,
    SpeakerRole::P2,
    SpeakerRole::R1,
    SpeakerRole::R2,
    SpeakerRole::RebuttalP,
    SpeakerRole::RebuttalR,
];

/// Number of turns in every match.
pub const TURN_COUNT: usize = TURN_SEQUENCE.len();

/// Returns the 1-based turn order of `role`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn turn_order_of(role: SpeakerRole) -> u8 {
    TURN_SEQUENCE
        .iter()
        .position(|r| *r == role)
        .map_or(0, |idx| idx as u8 + 1)
}

/// Generates and validates speaker-turn sequences.
#[derive(Debug, Clone)]
pub struct TurnSequencer {
    store: Store,
    config: EngineConfig,
}

impl TurnSequencer {
    /// Creates a sequencer over `store`.
    #[must_use]
    pub const fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Creates the six PENDING turns for a scheduled match.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match does not exist
    /// - [`EngineError::Conflict`] if the match is not SCHEDULED or already
    ///   has turns
    /// - [`EngineError::Validation`] for a bad allocation or team ids that do
    ///   not belong to the match
    pub fn generate(
        &self,
        match_id: MatchId,
        petitioner_team_id: TeamId,
        respondent_team_id: TeamId,
        allocated_seconds: u32,
    ) -> Result<Vec<SpeakerTurn>, EngineError> {
        let turns = self.store.write(|tx| {
            self.generate_locked(
                tx,
                match_id,
                petitioner_team_id,
                respondent_team_id,
                allocated_seconds,
            )
        })?;
        info!(
            match_id = %match_id,
            allocated_seconds,
            "generated speaker turn sequence"
        );
        Ok(turns)
    }

    fn generate_locked(
        &self,
        conn: &Connection,
        match_id: MatchId,
        petitioner_team_id: TeamId,
        respondent_team_id: TeamId,
        allocated_seconds: u32,
    ) -> Result<Vec<SpeakerTurn>, EngineError> {
        let m = repo::lock_match(conn, match_id)?;
        if m.status != MatchStatus::Scheduled {
            return Err(EngineError::conflict(
                "match",
                match_id,
                format!("turns can only be generated while SCHEDULED, match is {}", m.status),
            ));
        }
        let existing = repo::count_turns(conn, match_id)?;
        if existing > 0 {
            return Err(EngineError::conflict(
                "match",
                match_id,
                format!("turns already generated ({existing} exist)"),
            ));
        }
        if allocated_seconds == 0 || allocated_seconds > self.config.max_allocated_seconds {
            return Err(EngineError::validation(
                "allocated_seconds",
                format!(
                    "must be within 1..={}, got {allocated_seconds}",
                    self.config.max_allocated_seconds
                ),
            ));
        }
        if petitioner_team_id == respondent_team_id {
            return Err(EngineError::validation(
                "respondent_team_id",
                "petitioner and respondent must be different teams",
            ));
        }
        if m.petitioner_team_id != petitioner_team_id || m.respondent_team_id != respondent_team_id
        {
            return Err(EngineError::validation(
                "team_id",
                format!(
                    "teams do not match bench assignment (petitioner {}, respondent {})",
                    m.petitioner_team_id, m.respondent_team_id
                ),
            ));
        }

        let turns = build_sequence(&m, allocated_seconds);
        for turn in &turns {
            repo::insert_turn(conn, turn)?;
        }
        Ok(turns)
    }

    /// Checks a persisted turn set against the global sequence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] describing the first deviation.
    pub fn validate(m: &Match, turns: &[SpeakerTurn]) -> Result<(), EngineError> {
        if turns.len() != TURN_COUNT {
            return Err(EngineError::validation(
                "turns",
                format!("expected {TURN_COUNT} turns, found {}", turns.len()),
            ));
        }
        let mut sorted: Vec<&SpeakerTurn> = turns.iter().collect();
        sorted.sort_by_key(|t| t.turn_order);
        for (expected_role, turn) in TURN_SEQUENCE.iter().zip(sorted) {
            if turn.match_id != m.id {
                return Err(EngineError::validation(
                    "turns",
                    format!("turn {} belongs to match {}", turn.id, turn.match_id),
                ));
            }
            if turn.speaker_role != *expected_role
                || turn.turn_order != turn_order_of(*expected_role)
            {
                return Err(EngineError::validation(
                    "turns",
                    format!(
                        "turn_order {} has role {}, expected {expected_role}",
                        turn.turn_order, turn.speaker_role
                    ),
                ));
            }
            if turn.team_id != m.team_for(expected_role.side()) {
                return Err(EngineError::validation(
                    "turns",
                    format!("{expected_role} is assigned to the wrong team"),
                ));
            }
        }
        Ok(())
    }
}

/// Builds the six PENDING turns for `m` without persisting them.
#[must_use]
pub fn build_sequence(m: &Match, allocated_seconds: u32) -> Vec<SpeakerTurn> {
    TURN_SEQUENCE
        .iter()
        .map(|&role| SpeakerTurn {
            id: TurnId::new_v4(),
            match_id: m.id,
            team_id: m.team_for(role.side()),
            speaker_role: role,
            turn_order: turn_order_of(role),
            allocated_seconds,
            actual_seconds: None,
            status: TurnStatus::Pending,
            started_at: None,
            ended_at: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoundId, Side};

    fn scheduled_match() -> Match {
        Match {
            id: MatchId::new_v4(),
            round_id: RoundId::new_v4(),
            bench_number: 1,
            petitioner_team_id: TeamId::new_v4(),
            respondent_team_id: TeamId::new_v4(),
            status: MatchStatus::Scheduled,
            winner_team_id: None,
            locked: false,
        }
    }

    #[test]
    fn sequence_orders_are_one_through_six() {
        let orders: Vec<u8> = TURN_SEQUENCE.iter().map(|r| turn_order_of(*r)).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn roles_map_to_the_fixed_sides() {
        let petitioner: Vec<SpeakerRole> = TURN_SEQUENCE
            .iter()
            .copied()
            .filter(|r| r.side() == Side::Petitioner)
            .collect();
        assert_eq!(
            petitioner,
            vec![SpeakerRole::P1, SpeakerRole::P2, SpeakerRole::RebuttalP]
        );
    }

    #[test]
    fn built_sequence_validates() {
        let m = scheduled_match();
        let turns = build_sequence(&m, 300);
        assert_eq!(turns.len(), TURN_COUNT);
        assert!(turns.iter().all(|t| t.status == TurnStatus::Pending));
        assert_eq!(turns[2].team_id, m.respondent_team_id);
        assert_eq!(turns[4].team_id, m.petitioner_team_id);
        TurnSequencer::validate(&m, &turns).unwrap();
    }

    #[test]
    fn swapped_roles_fail_validation() {
        let m = scheduled_match();
        let mut turns = build_sequence(&m, 300);
        turns[0].speaker_role = SpeakerRole::R1;
        turns[2].speaker_role = SpeakerRole::P1;
        assert!(matches!(
            TurnSequencer::validate(&m, &turns),
            Err(EngineError::Validation { field: "turns", .. })
        ));
    }

    #[test]
    fn wrong_side_fails_validation() {
        let m = scheduled_match();
        let mut turns = build_sequence(&m, 300);
        turns[5].team_id = m.petitioner_team_id;
        assert!(TurnSequencer::validate(&m, &turns).is_err());
    }

    #[test]
    fn short_sequence_fails_validation() {
        let m = scheduled_match();
        let mut turns = build_sequence(&m, 300);
        turns.pop();
        assert!(TurnSequencer::validate(&m, &turns).is_err());
    }
}
