//! Closed status enums and the static transition tables.
//!
//! Each status type declares its successors once, in
//! [`Lifecycle::successors`]. State machines never compare statuses ad hoc to
//! decide legality; they call [`ensure_transition`], which is the single place
//! a disallowed edge turns into [`EngineError::InvalidStateTransition`].
//!
//! ```text
//! Round:  SCHEDULED -> LIVE -> COMPLETED -> FROZEN
//! Match:  SCHEDULED -> LIVE -> (SCORING) -> COMPLETED -> FROZEN
//! Turn:   PENDING -> ACTIVE -> COMPLETED -> LOCKED
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A status type with a fixed adjacency table.
pub trait Lifecycle: Copy + Eq + fmt::Display + fmt::Debug + 'static {
    /// Entity name used in error messages.
    const ENTITY: &'static str;

    /// Statuses reachable in one step from `self`.
    fn successors(self) -> &'static [Self];

    /// Returns `true` if `self -> next` is an edge of the table.
    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    /// Returns `true` if no transition leaves this status.
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// Checks `from -> to` against the adjacency table.
///
/// # Errors
///
/// Returns [`EngineError::InvalidStateTransition`] carrying `reason` when the
/// edge does not exist.
pub fn ensure_transition<S: Lifecycle>(
    id: impl fmt::Display,
    from: S,
    to: S,
    reason: &str,
) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        return Ok(());
    }
    let reason = if from.is_terminal() {
        format!("{from} is terminal")
    } else {
        reason.to_string()
    };
    Err(EngineError::invalid_transition(
        S::ENTITY,
        id,
        from,
        format!("move to {to}"),
        reason,
    ))
}

macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $entity:literal, $err_table:literal {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every status, in lifecycle order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Persisted and displayed form.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EngineError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(EngineError::CorruptRow {
                        table: $err_table,
                        detail: format!("unknown {} status '{other}'", $entity),
                    }),
                }
            }
        }
    };
}

status_enum! {
    /// Lifecycle of a [`Round`](crate::model::Round).
    RoundStatus, "round", "rounds" {
        /// Created; matches may still be assigned.
        Scheduled => "SCHEDULED",
        /// In progress.
        Live => "LIVE",
        /// Every match finished.
        Completed => "COMPLETED",
        /// Terminal and immutable.
        Frozen => "FROZEN",
    }
}

status_enum! {
    /// Lifecycle of a [`Match`](crate::model::Match).
    MatchStatus, "match", "matches" {
        /// Assigned; turns may be generated.
        Scheduled => "SCHEDULED",
        /// Turns are being argued.
        Live => "LIVE",
        /// All turns done; waiting on the scoring collaborator.
        Scoring => "SCORING",
        /// Winner recorded.
        Completed => "COMPLETED",
        /// Result sealed by a score lock.
        Frozen => "FROZEN",
    }
}

status_enum! {
    /// Lifecycle of a [`SpeakerTurn`](crate::model::SpeakerTurn).
    TurnStatus, "turn", "speaker_turns" {
        /// Not yet started.
        Pending => "PENDING",
        /// Currently speaking.
        Active => "ACTIVE",
        /// Finished speaking.
        Completed => "COMPLETED",
        /// Sealed by the match freeze.
        Locked => "LOCKED",
    }
}

impl Lifecycle for RoundStatus {
    const ENTITY: &'static str = "round";

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Scheduled => &[Self::Live],
            Self::Live => &[Self::Completed],
            Self::Completed => &[Self::Frozen],
            Self::Frozen => &[],
        }
    }
}

impl Lifecycle for MatchStatus {
    const ENTITY: &'static str = "match";

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Scheduled => &[Self::Live],
            Self::Live => &[Self::Scoring, Self::Completed],
            Self::Scoring => &[Self::Completed],
            Self::Completed => &[Self::Frozen],
            Self::Frozen => &[],
        }
    }
}

impl Lifecycle for TurnStatus {
    const ENTITY: &'static str = "turn";

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Active],
            Self::Active => &[Self::Completed],
            Self::Completed => &[Self::Locked],
            Self::Locked => &[],
        }
    }
}

impl TurnStatus {
    /// Returns `true` once the turn has finished speaking.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Locked)
    }
}

impl MatchStatus {
    /// Returns `true` for statuses a round may complete over.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Frozen)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn never_regresses<S: Lifecycle + Ord>(all: &[S]) {
        for &from in all {
            for &to in from.successors() {
                assert!(to > from, "{from} -> {to} regresses");
            }
        }
    }

    #[test]
    fn transitions_only_move_forward() {
        never_regresses(RoundStatus::ALL);
        never_regresses(MatchStatus::ALL);
        never_regresses(TurnStatus::ALL);
    }

    #[test]
    fn frozen_states_are_terminal() {
        assert!(RoundStatus::Frozen.is_terminal());
        assert!(MatchStatus::Frozen.is_terminal());
        assert!(TurnStatus::Locked.is_terminal());
        assert!(!MatchStatus::Scoring.is_terminal());
    }

    #[test]
    fn scoring_and_live_both_complete() {
        assert!(MatchStatus::Live.can_transition_to(MatchStatus::Completed));
        assert!(MatchStatus::Scoring.can_transition_to(MatchStatus::Completed));
        assert!(!MatchStatus::Scheduled.can_transition_to(MatchStatus::Completed));
    }

    #[test]
    fn ensure_transition_reports_terminal_source() {
        let err = ensure_transition("r-1", RoundStatus::Frozen, RoundStatus::Live, "ignored")
            .unwrap_err();
        match err {
            EngineError::InvalidStateTransition {
                from,
                requested,
                reason,
                ..
            } => {
                assert_eq!(from, "FROZEN");
                assert_eq!(requested, "move to LIVE");
                assert_eq!(reason, "FROZEN is terminal");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn status_strings_round_trip_and_reject_unknown() {
        for &s in MatchStatus::ALL {
            assert_eq!(s.as_str().parse::<MatchStatus>().unwrap(), s);
        }
        assert!(matches!(
            "PAUSED".parse::<TurnStatus>(),
            Err(EngineError::CorruptRow { table: "speaker_turns", .. })
        ));
    }

    proptest! {
        /// No walk through the table ever returns to an earlier status.
        #[test]
        fn prop_walks_are_strictly_increasing(choices in prop::collection::vec(0usize..4, 0..12)) {
            let mut current = MatchStatus::Scheduled;
            for pick in choices {
                let next = current.successors();
                if next.is_empty() {
                    break;
                }
                let chosen = next[pick % next.len()];
                prop_assert!(chosen > current);
                current = chosen;
            }
        }
    }
}
