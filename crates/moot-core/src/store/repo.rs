//! Row mapping and queries.
//!
//! Functions here take a plain [`Connection`]; callers pass the
//! [`Transaction`](rusqlite::Transaction) they hold so that reads happen under
//! the write lock. The `lock_*` variants return [`EngineError::NotFound`] when
//! the row is missing and are the first statement of every mutation.

// SQLite stores small counters as i64; values written here always fit u32.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::EngineError;
use crate::model::{
    JudgeId, Match, MatchId, Round, RoundId, ScoreLock, SpeakerTurn, TeamId, TimerState,
    TournamentId, TurnId,
};
use crate::status::MatchStatus;

fn parse<T>(table: &'static str, column: &str, raw: &str) -> Result<T, EngineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| EngineError::CorruptRow {
        table,
        detail: format!("{column} = '{raw}': {e}"),
    })
}

fn parse_opt<T>(
    table: &'static str,
    column: &str,
    raw: Option<String>,
) -> Result<Option<T>, EngineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|s| parse(table, column, &s)).transpose()
}

pub(crate) fn to_ms(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_ms(table: &'static str, ms: i64) -> Result<DateTime<Utc>, EngineError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| EngineError::CorruptRow {
        table,
        detail: format!("timestamp {ms} out of range"),
    })
}

fn from_ms_opt(table: &'static str, ms: Option<i64>) -> Result<Option<DateTime<Utc>>, EngineError> {
    ms.map(|ms| from_ms(table, ms)).transpose()
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

struct RoundRow {
    id: String,
    tournament_id: String,
    round_number: i64,
    round_type: String,
    status: String,
    bench_count: i64,
}

impl RoundRow {
    const COLUMNS: &'static str =
        "id, tournament_id, round_number, round_type, status, bench_count";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tournament_id: row.get(1)?,
            round_number: row.get(2)?,
            round_type: row.get(3)?,
            status: row.get(4)?,
            bench_count: row.get(5)?,
        })
    }

    fn into_model(self) -> Result<Round, EngineError> {
        Ok(Round {
            id: parse("rounds", "id", &self.id)?,
            tournament_id: parse::<TournamentId>("rounds", "tournament_id", &self.tournament_id)?,
            round_number: self.round_number as u32,
            round_type: self.round_type.parse()?,
            status: self.status.parse()?,
            bench_count: self.bench_count as u32,
        })
    }
}

pub(crate) fn insert_round(conn: &Connection, round: &Round) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO rounds (id, tournament_id, round_number, round_type, status, bench_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            round.id.to_string(),
            round.tournament_id.to_string(),
            round.round_number,
            round.round_type.as_str(),
            round.status.as_str(),
            round.bench_count,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_round(conn: &Connection, id: RoundId) -> Result<Option<Round>, EngineError> {
    let sql = format!("SELECT {} FROM rounds WHERE id = ?1", RoundRow::COLUMNS);
    conn.query_row(&sql, params![id.to_string()], RoundRow::from_row)
        .optional()?
        .map(RoundRow::into_model)
        .transpose()
}

pub(crate) fn lock_round(conn: &Connection, id: RoundId) -> Result<Round, EngineError> {
    find_round(conn, id)?.ok_or_else(|| EngineError::not_found("round", id))
}

pub(crate) fn round_number_taken(
    conn: &Connection,
    tournament_id: TournamentId,
    round_number: u32,
) -> Result<bool, EngineError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM rounds WHERE tournament_id = ?1 AND round_number = ?2",
            params![tournament_id.to_string(), round_number],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn update_round_status(conn: &Connection, round: &Round) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE rounds SET status = ?1 WHERE id = ?2",
        params![round.status.as_str(), round.id.to_string()],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

struct MatchRow {
    id: String,
    round_id: String,
    bench_number: i64,
    petitioner_team_id: String,
    respondent_team_id: String,
    status: String,
    winner_team_id: Option<String>,
    locked: bool,
}

impl MatchRow {
    const COLUMNS: &'static str = "id, round_id, bench_number, petitioner_team_id, \
                                   respondent_team_id, status, winner_team_id, locked";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            round_id: row.get(1)?,
            bench_number: row.get(2)?,
            petitioner_team_id: row.get(3)?,
            respondent_team_id: row.get(4)?,
            status: row.get(5)?,
            winner_team_id: row.get(6)?,
            locked: row.get(7)?,
        })
    }

    fn into_model(self) -> Result<Match, EngineError> {
        Ok(Match {
            id: parse("matches", "id", &self.id)?,
            round_id: parse("matches", "round_id", &self.round_id)?,
            bench_number: self.bench_number as u32,
            petitioner_team_id: parse("matches", "petitioner_team_id", &self.petitioner_team_id)?,
            respondent_team_id: parse("matches", "respondent_team_id", &self.respondent_team_id)?,
            status: self.status.parse()?,
            winner_team_id: parse_opt::<TeamId>("matches", "winner_team_id", self.winner_team_id)?,
            locked: self.locked,
        })
    }
}

pub(crate) fn insert_match(conn: &Connection, m: &Match) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO matches (id, round_id, bench_number, petitioner_team_id, respondent_team_id,
                              status, winner_team_id, locked)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            m.id.to_string(),
            m.round_id.to_string(),
            m.bench_number,
            m.petitioner_team_id.to_string(),
            m.respondent_team_id.to_string(),
            m.status.as_str(),
            m.winner_team_id.map(|t| t.to_string()),
            m.locked,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_match(conn: &Connection, id: MatchId) -> Result<Option<Match>, EngineError> {
    let sql = format!("SELECT {} FROM matches WHERE id = ?1", MatchRow::COLUMNS);
    conn.query_row(&sql, params![id.to_string()], MatchRow::from_row)
        .optional()?
        .map(MatchRow::into_model)
        .transpose()
}

pub(crate) fn lock_match(conn: &Connection, id: MatchId) -> Result<Match, EngineError> {
    find_match(conn, id)?.ok_or_else(|| EngineError::not_found("match", id))
}

pub(crate) fn list_matches(
    conn: &Connection,
    round_id: RoundId,
) -> Result<Vec<Match>, EngineError> {
    let sql = format!(
        "SELECT {} FROM matches WHERE round_id = ?1 ORDER BY bench_number ASC",
        MatchRow::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![round_id.to_string()], MatchRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(MatchRow::into_model).collect()
}

pub(crate) fn match_ids_with_status(
    conn: &Connection,
    status: MatchStatus,
) -> Result<Vec<MatchId>, EngineError> {
    let mut stmt = conn.prepare("SELECT id FROM matches WHERE status = ?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![status.as_str()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.iter().map(|raw| parse("matches", "id", raw)).collect()
}

pub(crate) fn update_match(conn: &Connection, m: &Match) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE matches SET status = ?1, winner_team_id = ?2, locked = ?3 WHERE id = ?4",
        params![
            m.status.as_str(),
            m.winner_team_id.map(|t| t.to_string()),
            m.locked,
            m.id.to_string(),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Speaker turns
// ---------------------------------------------------------------------------

struct TurnRow {
    id: String,
    match_id: String,
    team_id: String,
    speaker_role: String,
    turn_order: i64,
    allocated_seconds: i64,
    actual_seconds: Option<i64>,
    status: String,
    started_at_ms: Option<i64>,
    ended_at_ms: Option<i64>,
}

impl TurnRow {
    const COLUMNS: &'static str = "id, match_id, team_id, speaker_role, turn_order, \
                                   allocated_seconds, actual_seconds, status, started_at_ms, \
                                   ended_at_ms";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            match_id: row.get(1)?,
            team_id: row.get(2)?,
            speaker_role: row.get(3)?,
            turn_order: row.get(4)?,
            allocated_seconds: row.get(5)?,
            actual_seconds: row.get(6)?,
            status: row.get(7)?,
            started_at_ms: row.get(8)?,
            ended_at_ms: row.get(9)?,
        })
    }

    fn into_model(self) -> Result<SpeakerTurn, EngineError> {
        Ok(SpeakerTurn {
            id: parse("speaker_turns", "id", &self.id)?,
            match_id: parse("speaker_turns", "match_id", &self.match_id)?,
            team_id: parse("speaker_turns", "team_id", &self.team_id)?,
            speaker_role: self.speaker_role.parse()?,
            turn_order: self.turn_order as u8,
            allocated_seconds: self.allocated_seconds as u32,
            actual_seconds: self.actual_seconds.map(|s| s as u32),
            status: self.status.parse()?,
            started_at: from_ms_opt("speaker_turns", self.started_at_ms)?,
            ended_at: from_ms_opt("speaker_turns", self.ended_at_ms)?,
        })
    }
}

pub(crate) fn insert_turn(conn: &Connection, turn: &SpeakerTurn) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO speaker_turns (id, match_id, team_id, speaker_role, turn_order,
                                    allocated_seconds, actual_seconds, status, started_at_ms,
                                    ended_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            turn.id.to_string(),
            turn.match_id.to_string(),
            turn.team_id.to_string(),
            turn.speaker_role.as_str(),
            turn.turn_order,
            turn.allocated_seconds,
            turn.actual_seconds,
            turn.status.as_str(),
            turn.started_at.map(to_ms),
            turn.ended_at.map(to_ms),
        ],
    )?;
    Ok(())
}

pub(crate) fn list_turns(
    conn: &Connection,
    match_id: MatchId,
) -> Result<Vec<SpeakerTurn>, EngineError> {
    let sql = format!(
        "SELECT {} FROM speaker_turns WHERE match_id = ?1 ORDER BY turn_order ASC",
        TurnRow::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![match_id.to_string()], TurnRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(TurnRow::into_model).collect()
}

pub(crate) fn count_turns(conn: &Connection, match_id: MatchId) -> Result<u32, EngineError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM speaker_turns WHERE match_id = ?1",
        params![match_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

pub(crate) fn find_turn(conn: &Connection, id: TurnId) -> Result<Option<SpeakerTurn>, EngineError> {
    let sql = format!("SELECT {} FROM speaker_turns WHERE id = ?1", TurnRow::COLUMNS);
    conn.query_row(&sql, params![id.to_string()], TurnRow::from_row)
        .optional()?
        .map(TurnRow::into_model)
        .transpose()
}

pub(crate) fn lock_turn(conn: &Connection, id: TurnId) -> Result<SpeakerTurn, EngineError> {
    find_turn(conn, id)?.ok_or_else(|| EngineError::not_found("turn", id))
}

pub(crate) fn update_turn(conn: &Connection, turn: &SpeakerTurn) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE speaker_turns
            SET status = ?1, actual_seconds = ?2, started_at_ms = ?3, ended_at_ms = ?4
          WHERE id = ?5",
        params![
            turn.status.as_str(),
            turn.actual_seconds,
            turn.started_at.map(to_ms),
            turn.ended_at.map(to_ms),
            turn.id.to_string(),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Timer state
// ---------------------------------------------------------------------------

pub(crate) fn find_timer(
    conn: &Connection,
    match_id: MatchId,
) -> Result<Option<TimerState>, EngineError> {
    let row = conn
        .query_row(
            "SELECT active_turn_id, remaining_seconds, paused, last_tick_ms
               FROM timer_states WHERE match_id = ?1",
            params![match_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(active, remaining, paused, last_tick_ms)| -> Result<TimerState, EngineError> {
        Ok(TimerState {
            match_id,
            active_turn_id: parse_opt::<TurnId>("timer_states", "active_turn_id", active)?,
            remaining_seconds: remaining.max(0) as u32,
            paused,
            last_tick: from_ms("timer_states", last_tick_ms)?,
        })
    })
    .transpose()
}

pub(crate) fn lock_timer(conn: &Connection, match_id: MatchId) -> Result<TimerState, EngineError> {
    find_timer(conn, match_id)?.ok_or_else(|| EngineError::not_found("timer", match_id))
}

pub(crate) fn upsert_timer(conn: &Connection, timer: &TimerState) -> Result<(), EngineError> {
    conn.execute(
        "INSERT INTO timer_states (match_id, active_turn_id, remaining_seconds, paused, last_tick_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(match_id) DO UPDATE SET
             active_turn_id = excluded.active_turn_id,
             remaining_seconds = excluded.remaining_seconds,
             paused = excluded.paused,
             last_tick_ms = excluded.last_tick_ms",
        params![
            timer.match_id.to_string(),
            timer.active_turn_id.map(|t| t.to_string()),
            timer.remaining_seconds,
            timer.paused,
            to_ms(timer.last_tick),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Score locks
// ---------------------------------------------------------------------------

pub(crate) fn insert_score_lock(conn: &Connection, lock: &ScoreLock) -> Result<(), EngineError> {
    let judge_ids: Vec<String> = lock.judge_ids.iter().map(ToString::to_string).collect();
    conn.execute(
        "INSERT INTO score_locks (match_id, total_petitioner_score, total_respondent_score,
                                  winner_team_id, judge_ids, frozen_at_ms, frozen_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            lock.match_id.to_string(),
            lock.total_petitioner_score,
            lock.total_respondent_score,
            lock.winner_team_id.to_string(),
            serde_json::to_string(&judge_ids)?,
            to_ms(lock.frozen_at),
            lock.frozen_hash,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_score_lock(
    conn: &Connection,
    match_id: MatchId,
) -> Result<Option<ScoreLock>, EngineError> {
    let row = conn
        .query_row(
            "SELECT total_petitioner_score, total_respondent_score, winner_team_id, judge_ids,
                    frozen_at_ms, frozen_hash
               FROM score_locks WHERE match_id = ?1",
            params![match_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    row.map(
        |(petitioner, respondent, winner, judges, frozen_at_ms, frozen_hash)| {
            let raw_judges: Vec<String> = serde_json::from_str(&judges)?;
            let judge_ids = raw_judges
                .iter()
                .map(|raw| parse::<JudgeId>("score_locks", "judge_ids", raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, EngineError>(ScoreLock {
                match_id,
                total_petitioner_score: petitioner,
                total_respondent_score: respondent,
                winner_team_id: parse("score_locks", "winner_team_id", &winner)?,
                judge_ids,
                frozen_at: from_ms("score_locks", frozen_at_ms)?,
                frozen_hash,
            })
        },
    )
    .transpose()
}
