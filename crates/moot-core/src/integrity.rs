//! Tamper-evident hashing of frozen match results.
//!
//! The freeze hash is SHA-256 over a canonical JSON document:
//!
//! - keys in lexicographic order, no insignificant whitespace
//! - turn ids and judge ids sorted ascending and rendered hyphenated
//! - scores rendered in their shortest round-trip decimal form
//!
//! The same inputs always produce the same 64-character lowercase hex digest,
//! independent of the order in which turns or judges were supplied.

use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::EngineError;
use crate::model::{JudgeId, MatchId, TeamId, TurnId};

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Largest score accepted for a side's total.
pub const MAX_SCORE: f64 = 1_000_000.0;

/// Everything a freeze hash commits to.
#[derive(Debug, Clone, Copy)]
pub struct FreezeInput<'a> {
    /// Frozen match.
    pub match_id: MatchId,
    /// Turns of the match, any order.
    pub turn_ids: &'a [TurnId],
    /// Petitioner total.
    pub petitioner_score: f64,
    /// Respondent total.
    pub respondent_score: f64,
    /// Winning team.
    pub winner_team_id: TeamId,
    /// Judges whose scores were included, any order.
    pub judge_ids: &'a [JudgeId],
}

// Field order is the canonical key order.
#[derive(Serialize)]
struct CanonicalFreeze {
    judge_ids: Vec<String>,
    match_id: String,
    petitioner_score: String,
    respondent_score: String,
    turn_ids: Vec<String>,
    winner_team_id: String,
}

/// Computes and checks freeze hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityLedger;

impl IntegrityLedger {
    /// Validates a score and returns its canonical text.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for non-finite, negative or
    /// oversized values.
    pub fn canonical_score(field: &'static str, value: f64) -> Result<String, EngineError> {
        if !value.is_finite() {
            return Err(EngineError::validation(field, "score must be a finite number"));
        }
        if !(0.0..=MAX_SCORE).contains(&value) {
            return Err(EngineError::validation(
                field,
                format!("score {value} outside 0..={MAX_SCORE}"),
            ));
        }
        // Collapse -0.0 so it cannot produce a second encoding of zero.
        let value = if value == 0.0 { 0.0 } else { value };
        Ok(format!("{value}"))
    }

    /// Returns the canonical byte encoding hashed by [`Self::hash`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if a score is invalid.
    pub fn canonical_bytes(input: &FreezeInput<'_>) -> Result<Vec<u8>, EngineError> {
        let mut turn_ids = input.turn_ids.to_vec();
        turn_ids.sort_unstable();
        let mut judge_ids = input.judge_ids.to_vec();
        judge_ids.sort_unstable();

        let doc = CanonicalFreeze {
            judge_ids: judge_ids.iter().map(ToString::to_string).collect(),
            match_id: input.match_id.to_string(),
            petitioner_score: Self::canonical_score("petitioner_score", input.petitioner_score)?,
            respondent_score: Self::canonical_score("respondent_score", input.respondent_score)?,
            turn_ids: turn_ids.iter().map(ToString::to_string).collect(),
            winner_team_id: input.winner_team_id.to_string(),
        };
        Ok(serde_json::to_vec(&doc)?)
    }

    /// Computes the lowercase hex SHA-256 freeze hash.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if a score is invalid.
    pub fn hash(input: &FreezeInput<'_>) -> Result<String, EngineError> {
        let bytes = Self::canonical_bytes(input)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Compares two hex digests in constant time.
    #[must_use]
    pub fn hashes_match(stored: &str, computed: &str) -> bool {
        stored.len() == HASH_HEX_LEN && bool::from(stored.as_bytes().ct_eq(computed.as_bytes()))
    }

    /// Recomputes the hash for `input` and compares it with `stored`.
    ///
    /// Returns the recomputed hash together with the verdict.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if a score is invalid.
    pub fn verify(stored: &str, input: &FreezeInput<'_>) -> Result<(bool, String), EngineError> {
        let computed = Self::hash(input)?;
        Ok((Self::hashes_match(stored, &computed), computed))
    }
}
