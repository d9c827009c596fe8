//! # moot-core
//!
//! Round, match and speaker-turn execution engine for moot-court events.
//!
//! The engine drives one tournament round from bench assignment through
//! live oral argument to a frozen, tamper-evident result:
//!
//! - [`RoundStateMachine`] creates rounds and assigns teams to benches
//! - [`TurnSequencer`] lays out the fixed six-turn speaking order
//! - [`MatchStateMachine`] starts matches, advances and completes turns,
//!   records winners and freezes results
//! - [`TimerEngine`] runs the per-match countdown and auto-completes turns
//!   whose time runs out
//! - [`RecoveryCoordinator`] charges downtime to running timers at startup
//! - [`IntegrityLedger`] hashes frozen results so later edits are detectable
//!
//! ## Core Concepts
//!
//! - **Database as source of truth**: every operation is one `SQLite`
//!   transaction that takes the write lock before reading, so concurrent
//!   callers (threads or processes) serialize and re-validate
//! - **Closed lifecycles**: status enums carry a static adjacency table,
//!   checked in one place ([`status::ensure_transition`])
//! - **Freeze hash**: SHA-256 over a canonical document of the match id,
//!   sorted turn ids, scores, winner and sorted judge ids
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use moot_core::{
//!     EngineConfig, Engine, ManualClock, MatchAssignment, RoundType, Store, TeamId,
//!     TournamentId,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
//! let engine = Engine::new(Store::in_memory(&config)?, clock.clone(), config);
//!
//! let round = engine.create_round(TournamentId::new_v4(), 1, RoundType::Prelim, 2)?;
//! let (petitioner, respondent) = (TeamId::new_v4(), TeamId::new_v4());
//! let matches = engine.assign_matches(
//!     round.id,
//!     &[MatchAssignment {
//!         bench_number: 1,
//!         petitioner_team_id: petitioner,
//!         respondent_team_id: respondent,
//!     }],
//! )?;
//! let match_id = matches[0].id;
//!
//! engine.generate_turns(match_id, petitioner, respondent, 600)?;
//! engine.start_match(match_id)?;
//! let first = engine.advance_turn(match_id)?;
//! assert_eq!(first.turn_order, 1);
//!
//! clock.advance_secs(45);
//! let timer = engine.tick(match_id)?.timer;
//! assert_eq!(timer.remaining_seconds, 555);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod match_machine;
pub mod model;
pub mod recovery;
pub mod round_machine;
pub mod sequencer;
pub mod status;
pub mod store;
pub mod timer;

#[cfg(test)]
mod testutil;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use config::{ConfigError, DaemonConfig, EngineConfig, MootConfig};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind};
pub use integrity::{FreezeInput, IntegrityLedger};
pub use match_machine::MatchStateMachine;
pub use model::{
    IntegrityReport, JudgeId, Match, MatchAssignment, MatchId, Round, RoundId, RoundType,
    ScoreLock, Side, SpeakerRole, SpeakerTurn, TeamId, TimerState, TournamentId, TurnId,
};
pub use recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryReport};
pub use round_machine::RoundStateMachine;
pub use sequencer::{TurnSequencer, TURN_SEQUENCE};
pub use status::{Lifecycle, MatchStatus, RoundStatus, TurnStatus};
pub use store::Store;
pub use timer::{TickOutcome, TimerEngine};
