//! Database-backed countdown timer, one per live match.
//!
//! ```text
//! initialize --> running --tick--> running ... --remaining = 0--> expired
//!                   |  ^                                  |
//!                 pause resume                   active turn auto-completed
//!                   v  |
//!                  paused (tick only refreshes last_tick)
//! ```
//!
//! The persisted [`TimerState`] is the only record of the countdown; every
//! operation reads it under the write lock, applies
//! [`countdown::apply`] and writes it back in the same transaction.

pub mod countdown;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::clock::ClockSource;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::match_machine;
use crate::model::{MatchId, SpeakerTurn, TimerState, TurnId};
use crate::status::TurnStatus;
use crate::store::{repo, Store};

/// Result of a [`TimerEngine::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Timer after the tick.
    pub timer: TimerState,
    /// Turn completed because its time ran out.
    pub auto_completed_turn: Option<SpeakerTurn>,
}

/// Countdown operations.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    store: Store,
    clock: Arc<dyn ClockSource>,
    config: EngineConfig,
}

impl TimerEngine {
    /// Creates a timer engine over `store`.
    #[must_use]
    pub fn new(store: Store, clock: Arc<dyn ClockSource>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Creates or resets the timer of a match: running, `last_tick = now`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the match or turn does not exist
    /// - [`EngineError::Validation`] if the turn belongs to another match or
    ///   `remaining_seconds` exceeds the configured maximum allocation
    pub fn initialize(
        &self,
        match_id: MatchId,
        active_turn_id: Option<TurnId>,
        remaining_seconds: u32,
    ) -> Result<TimerState, EngineError> {
        if remaining_seconds > self.config.max_allocated_seconds {
            return Err(EngineError::validation(
                "remaining_seconds",
                format!(
                    "{remaining_seconds} exceeds the maximum allocation of {}",
                    self.config.max_allocated_seconds
                ),
            ));
        }
        let now = self.clock.now();
        let timer = self.store.write(|tx| {
            repo::lock_match(tx, match_id)?;
            if let Some(turn_id) = active_turn_id {
                let turn = repo::lock_turn(tx, turn_id)?;
                if turn.match_id != match_id {
                    return Err(EngineError::validation(
                        "active_turn_id",
                        format!("turn {turn_id} belongs to match {}", turn.match_id),
                    ));
                }
            }
            let timer = TimerState {
                match_id,
                active_turn_id,
                remaining_seconds,
                paused: false,
                last_tick: now,
            };
            repo::upsert_timer(tx, &timer)?;
            Ok(timer)
        })?;
        info!(match_id = %match_id, remaining_seconds, "timer initialized");
        Ok(timer)
    }

    /// Applies elapsed time; auto-completes the active turn at zero.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn tick(&self, match_id: MatchId) -> Result<TickOutcome, EngineError> {
        let now = self.clock.now();
        self.store.write(|tx| tick_locked(tx, match_id, now))
    }

    /// Suspends the countdown after accounting for time elapsed so far.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn pause(&self, match_id: MatchId) -> Result<TimerState, EngineError> {
        let now = self.clock.now();
        let timer = self.store.write(|tx| {
            let mut timer = tick_locked(tx, match_id, now)?.timer;
            timer.paused = true;
            timer.last_tick = now;
            repo::upsert_timer(tx, &timer)?;
            Ok(timer)
        })?;
        info!(match_id = %match_id, remaining_seconds = timer.remaining_seconds, "timer paused");
        Ok(timer)
    }

    /// Restarts a paused countdown from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn resume(&self, match_id: MatchId) -> Result<TimerState, EngineError> {
        let now = self.clock.now();
        let timer = self.store.write(|tx| {
            let mut timer = repo::lock_timer(tx, match_id)?;
            timer.paused = false;
            timer.last_tick = now;
            repo::upsert_timer(tx, &timer)?;
            Ok(timer)
        })?;
        info!(match_id = %match_id, remaining_seconds = timer.remaining_seconds, "timer resumed");
        Ok(timer)
    }

    /// Returns the persisted timer of a match.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the match has no timer.
    pub fn get(&self, match_id: MatchId) -> Result<TimerState, EngineError> {
        self.store.read(|conn| repo::lock_timer(conn, match_id))
    }
}

/// Tick body, run inside the caller's transaction.
pub(crate) fn tick_locked(
    conn: &Connection,
    match_id: MatchId,
    now: DateTime<Utc>,
) -> Result<TickOutcome, EngineError> {
    let mut timer = repo::lock_timer(conn, match_id)?;
    let step = countdown::apply(now, timer.last_tick, timer.remaining_seconds, timer.paused);
    if step.clock_regressed {
        warn!(match_id = %match_id, "clock moved backwards; timer re-anchored without deduction");
    }

    timer.remaining_seconds = step.remaining_seconds;
    timer.last_tick = step.last_tick;

    let mut auto_completed_turn = None;
    if step.expired && !timer.paused {
        if let Some(turn_id) = timer.active_turn_id.take() {
            let turn = repo::lock_turn(conn, turn_id)?;
            if turn.status == TurnStatus::Active {
                let completed = match_machine::complete_turn_locked(conn, turn_id, now)?;
                info!(
                    match_id = %match_id,
                    turn_id = %turn_id,
                    turn_order = completed.turn_order,
                    "turn time expired; turn auto-completed"
                );
                auto_completed_turn = Some(completed);
            }
        }
    }

    repo::upsert_timer(conn, &timer)?;
    debug!(
        match_id = %match_id,
        remaining_seconds = timer.remaining_seconds,
        consumed_seconds = step.consumed_seconds,
        paused = timer.paused,
        "timer ticked"
    );
    Ok(TickOutcome {
        timer,
        auto_completed_turn,
    })
}

/// Points the match timer at a newly active turn with its full allocation.
pub(crate) fn arm_locked(
    conn: &Connection,
    turn: &SpeakerTurn,
    now: DateTime<Utc>,
) -> Result<TimerState, EngineError> {
    let timer = TimerState {
        match_id: turn.match_id,
        active_turn_id: Some(turn.id),
        remaining_seconds: turn.allocated_seconds,
        paused: false,
        last_tick: now,
    };
    repo::upsert_timer(conn, &timer)?;
    Ok(timer)
}

#[cfg(test)]
mod tests;
