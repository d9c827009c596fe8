//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::clock::{ClockSource, ManualClock};
use crate::config::EngineConfig;
use crate::match_machine::MatchStateMachine;
use crate::model::{Match, MatchId, Round, RoundId, RoundType, SpeakerTurn, TeamId, TournamentId};
use crate::round_machine::RoundStateMachine;
use crate::sequencer::TurnSequencer;
use crate::status::{MatchStatus, RoundStatus};
use crate::store::{repo, Store};
use crate::timer::TimerEngine;

/// Unix time the manual clock starts at.
pub const START: i64 = 1_700_000_000;

/// In-memory store holding one SCHEDULED round with one SCHEDULED match.
pub struct Fixture {
    pub store: Store,
    pub clock: Arc<ManualClock>,
    pub config: EngineConfig,
    pub round: Round,
    pub m: Match,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Store::in_memory(&config).expect("in-memory store");
        let round = Round {
            id: RoundId::new_v4(),
            tournament_id: TournamentId::new_v4(),
            round_number: 1,
            round_type: RoundType::Prelim,
            status: RoundStatus::Scheduled,
            bench_count: 4,
        };
        let m = Match {
            id: MatchId::new_v4(),
            round_id: round.id,
            bench_number: 1,
            petitioner_team_id: TeamId::new_v4(),
            respondent_team_id: TeamId::new_v4(),
            status: MatchStatus::Scheduled,
            winner_team_id: None,
            locked: false,
        };
        store
            .write(|tx| {
                repo::insert_round(tx, &round)?;
                repo::insert_match(tx, &m)
            })
            .expect("seed round and match");
        Self {
            store,
            clock: Arc::new(ManualClock::at_unix(START)),
            config,
            round,
            m,
        }
    }

    pub fn clock(&self) -> Arc<dyn ClockSource> {
        self.clock.clone()
    }

    pub fn sequencer(&self) -> TurnSequencer {
        TurnSequencer::new(self.store.clone(), self.config.clone())
    }

    pub fn matches(&self) -> MatchStateMachine {
        MatchStateMachine::new(self.store.clone(), self.clock(), self.config.clone())
    }

    pub fn rounds(&self) -> RoundStateMachine {
        RoundStateMachine::new(self.store.clone())
    }

    pub fn timers(&self) -> TimerEngine {
        TimerEngine::new(self.store.clone(), self.clock(), self.config.clone())
    }

    pub fn generate_turns(&self, allocated_seconds: u32) -> Vec<SpeakerTurn> {
        self.sequencer()
            .generate(
                self.m.id,
                self.m.petitioner_team_id,
                self.m.respondent_team_id,
                allocated_seconds,
            )
            .expect("generate turns")
    }

    /// Generates turns and starts the match.
    pub fn live(self, allocated_seconds: u32) -> Self {
        self.generate_turns(allocated_seconds);
        self.matches().start(self.m.id).expect("start match");
        self
    }

    /// Runs all six turns to completion, one second of speaking each.
    pub fn argue_all_turns(&self) {
        let machine = self.matches();
        for _ in 0..6 {
            let turn = machine.advance_turn(self.m.id).expect("advance");
            self.clock.advance_secs(1);
            machine.complete_turn(turn.id).expect("complete");
        }
    }
}
