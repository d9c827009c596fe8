//! Value types for rounds, matches, speaker turns, timers and score locks.
//!
//! Repository functions in [`crate::store`] return these fully populated;
//! nothing here fetches lazily.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::status::{MatchStatus, RoundStatus, TurnStatus};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Identifier of a tournament (owned by an external collaborator).
    TournamentId
);
define_id!(
    /// Identifier of a [`Round`].
    RoundId
);
define_id!(
    /// Identifier of a [`Match`].
    MatchId
);
define_id!(
    /// Identifier of a [`SpeakerTurn`].
    TurnId
);
define_id!(
    /// Identifier of a team (owned by an external collaborator).
    TeamId
);
define_id!(
    /// Identifier of a judge (owned by the scoring collaborator).
    JudgeId
);

/// Stage of the tournament a round belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundType {
    /// Preliminary round.
    Prelim,
    /// Quarter-final.
    Quarter,
    /// Semi-final.
    Semi,
    /// Final.
    Final,
}

impl RoundType {
    /// Persisted form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prelim => "PRELIM",
            Self::Quarter => "QUARTER",
            Self::Semi => "SEMI",
            Self::Final => "FINAL",
        }
    }
}

impl fmt::Display for RoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRELIM" => Ok(Self::Prelim),
            "QUARTER" => Ok(Self::Quarter),
            "SEMI" => Ok(Self::Semi),
            "FINAL" => Ok(Self::Final),
            other => Err(EngineError::CorruptRow {
                table: "rounds",
                detail: format!("unknown round type '{other}'"),
            }),
        }
    }
}

/// Side of the bench a speaker argues for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// The petitioner (appellant) team.
    Petitioner,
    /// The respondent team.
    Respondent,
}

/// Speaker slot within a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpeakerRole {
    /// First petitioner speaker.
    #[serde(rename = "P1")]
    P1,
    /// Second petitioner speaker.
    #[serde(rename = "P2")]
    P2,
    /// First respondent speaker.
    #[serde(rename = "R1")]
    R1,
    /// Second respondent speaker.
    #[serde(rename = "R2")]
    R2,
    /// Petitioner rebuttal.
    #[serde(rename = "REBUTTAL_P")]
    RebuttalP,
    /// Respondent sur-rebuttal.
    #[serde(rename = "REBUTTAL_R")]
    RebuttalR,
}

impl SpeakerRole {
    /// Persisted form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::R1 => "R1",
            Self::R2 => "R2",
            Self::RebuttalP => "REBUTTAL_P",
            Self::RebuttalR => "REBUTTAL_R",
        }
    }

    /// The side this role argues for.
    #[must_use]
    pub const fn side(self) -> Side {
        match self {
            Self::P1 | Self::P2 | Self::RebuttalP => Side::Petitioner,
            Self::R1 | Self::R2 | Self::RebuttalR => Side::Respondent,
        }
    }
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpeakerRole {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "R1" => Ok(Self::R1),
            "R2" => Ok(Self::R2),
            "REBUTTAL_P" => Ok(Self::RebuttalP),
            "REBUTTAL_R" => Ok(Self::RebuttalR),
            other => Err(EngineError::CorruptRow {
                table: "speaker_turns",
                detail: format!("unknown speaker role '{other}'"),
            }),
        }
    }
}

/// A numbered round of a tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Owning tournament.
    pub tournament_id: TournamentId,
    /// Position within the tournament, unique per tournament.
    pub round_number: u32,
    /// Tournament stage.
    pub round_type: RoundType,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Number of benches (courtrooms) available.
    pub bench_count: u32,
}

/// One bench's pairing of petitioner against respondent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Match identifier.
    pub id: MatchId,
    /// Owning round.
    pub round_id: RoundId,
    /// Bench number, unique per round.
    pub bench_number: u32,
    /// Team arguing for the petitioner.
    pub petitioner_team_id: TeamId,
    /// Team arguing for the respondent.
    pub respondent_team_id: TeamId,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Winner, set when the match completes.
    pub winner_team_id: Option<TeamId>,
    /// Set once the result has been recorded.
    pub locked: bool,
}

impl Match {
    /// Returns the team assigned to `side`.
    #[must_use]
    pub const fn team_for(&self, side: Side) -> TeamId {
        match side {
            Side::Petitioner => self.petitioner_team_id,
            Side::Respondent => self.respondent_team_id,
        }
    }

    /// Returns `true` if `team` is one of the two teams of this match.
    #[must_use]
    pub fn involves(&self, team: TeamId) -> bool {
        self.petitioner_team_id == team || self.respondent_team_id == team
    }
}

/// Requested bench assignment for [`crate::RoundStateMachine::assign_matches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAssignment {
    /// Bench number within the round.
    pub bench_number: u32,
    /// Petitioner team.
    pub petitioner_team_id: TeamId,
    /// Respondent team.
    pub respondent_team_id: TeamId,
}

/// One allocated speaking slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    /// Turn identifier.
    pub id: TurnId,
    /// Owning match.
    pub match_id: MatchId,
    /// Team speaking, derived from the role's side.
    pub team_id: TeamId,
    /// Speaker slot.
    pub speaker_role: SpeakerRole,
    /// Position in the fixed sequence, 1-based.
    pub turn_order: u8,
    /// Time allotted to the speaker.
    pub allocated_seconds: u32,
    /// Time actually used; set when the turn ends.
    pub actual_seconds: Option<u32>,
    /// Lifecycle status.
    pub status: TurnStatus,
    /// When the turn became active.
    pub started_at: Option<DateTime<Utc>>,
    /// When the turn was completed.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Persisted countdown for a live match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// Owning match.
    pub match_id: MatchId,
    /// Turn the countdown belongs to, if any.
    pub active_turn_id: Option<TurnId>,
    /// Whole seconds left.
    pub remaining_seconds: u32,
    /// Whether the countdown is suspended.
    pub paused: bool,
    /// Instant up to which elapsed time has been accounted.
    pub last_tick: DateTime<Utc>,
}

/// Immutable record of a frozen match result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreLock {
    /// Frozen match.
    pub match_id: MatchId,
    /// Petitioner total.
    pub total_petitioner_score: f64,
    /// Respondent total.
    pub total_respondent_score: f64,
    /// Winning team.
    pub winner_team_id: TeamId,
    /// Judges whose scores were included, sorted.
    pub judge_ids: Vec<JudgeId>,
    /// When the freeze happened.
    pub frozen_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 over the canonical freeze input.
    pub frozen_hash: String,
}

/// Outcome of [`crate::MatchStateMachine::verify_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Checked match.
    pub match_id: MatchId,
    /// `true` when the recomputed hash equals the stored one and the match is
    /// frozen.
    pub valid: bool,
    /// Whether the match status is FROZEN.
    pub frozen: bool,
    /// Hash recorded at freeze, if a score lock exists.
    pub stored_hash: Option<String>,
    /// Hash recomputed from current state, if a score lock exists.
    pub computed_hash: Option<String>,
}
